//! Service sessions: the state machine behind every service card
//!
//! Per service there are two orthogonal pieces of state: an optional pending
//! lifecycle command, and whether the detail view (with its live streams) is
//! open. User actions and inbound events come in here; outbound work leaves
//! as [`Request`]s for the runtime to hand to a transport.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::channel::{Listener, ListenerRegistry};
use crate::dispatcher::{CommandDispatcher, DEFAULT_COMMAND_TIMEOUT, Outcome, Resolution};
use crate::model::{CommandKind, Service, ServiceId, StreamKind};
use crate::protocol::{InboundEvent, OutboundEvent};
use crate::reconciler::{ConnectionState, DiagnosticLevel, Reconciler};
use crate::subscriptions::SubscriptionManager;
use crate::toast::ToastTiming;
use crate::transport::{DiagnosticEvent, TransportEvent};

/// Work the runtime must perform on behalf of the panel
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    Emit(OutboundEvent),
    RefreshStatus {
        id: ServiceId,
    },
    UpdateEnvironment {
        id: ServiceId,
        vars: BTreeMap<String, String>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PanelSettings {
    pub command_timeout: Duration,
    pub toast: ToastTiming,
}

impl Default for PanelSettings {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            toast: ToastTiming::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activity {
    Idle { running: bool },
    CommandPending(CommandKind),
}

/// Snapshot of one service's session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionState {
    pub activity: Activity,
    pub detail_open: bool,
}

pub struct Panel {
    services: BTreeMap<ServiceId, Service>,
    dispatcher: CommandDispatcher,
    subscriptions: SubscriptionManager,
    listeners: ListenerRegistry,
    ui: Reconciler,
}

impl Panel {
    pub fn new(services: impl IntoIterator<Item = Service>, settings: PanelSettings) -> Self {
        let mut ui = Reconciler::new(settings.toast);
        let services: BTreeMap<ServiceId, Service> = services
            .into_iter()
            .map(|s| {
                ui.add_service(&s);
                (s.id.clone(), s)
            })
            .collect();

        Self {
            services,
            dispatcher: CommandDispatcher::new(settings.command_timeout),
            subscriptions: SubscriptionManager::new(),
            listeners: ListenerRegistry::new(),
            ui,
        }
    }

    // ---- user actions ----

    /// Issue a lifecycle command. Returns nothing while another command for
    /// the same service is still in flight.
    pub fn request_command(&mut self, id: &str, kind: CommandKind, now: Instant) -> Vec<Request> {
        let Some(service) = self.services.get(id) else {
            warn!(service = %id, "command for unknown service");
            return Vec::new();
        };
        if self.dispatcher.is_pending(id) {
            debug!(service = %id, %kind, "command already pending, ignoring");
            return Vec::new();
        }

        let event = self.dispatcher.dispatch(&service.id, kind, now);
        self.ui.reconcile(service, self.dispatcher.pending(id));
        info!(service = %id, %kind, "command dispatched");
        vec![Request::Emit(event)]
    }

    pub fn start(&mut self, id: &str, now: Instant) -> Vec<Request> {
        self.request_command(id, CommandKind::Start, now)
    }

    pub fn stop(&mut self, id: &str, now: Instant) -> Vec<Request> {
        self.request_command(id, CommandKind::Stop, now)
    }

    pub fn restart(&mut self, id: &str, now: Instant) -> Vec<Request> {
        self.request_command(id, CommandKind::Restart, now)
    }

    pub fn open_detail(&mut self, id: &str) -> Vec<Request> {
        let Some(service) = self.services.get(id) else {
            return Vec::new();
        };
        self.ui.set_detail_open(id, true);
        self.subscriptions
            .open(&mut self.listeners, &service.id)
            .into_iter()
            .map(Request::Emit)
            .collect()
    }

    /// Closing the view stops the streams but never cancels a pending command
    pub fn close_detail(&mut self, id: &str) -> Vec<Request> {
        let Some(service) = self.services.get(id) else {
            return Vec::new();
        };
        self.ui.set_detail_open(id, false);
        self.subscriptions
            .close(&mut self.listeners, &service.id)
            .into_iter()
            .map(Request::Emit)
            .collect()
    }

    pub fn clear_logs(&mut self, id: &str) {
        self.ui.clear_logs(id);
    }

    /// Target of the launch control, only while the service is running
    pub fn launch(&self, id: &str) -> Option<&str> {
        self.ui.view(id).and_then(|v| v.launch.url())
    }

    pub fn refresh_status(&self, id: &str) -> Vec<Request> {
        if !self.services.contains_key(id) {
            return Vec::new();
        }
        vec![Request::RefreshStatus { id: id.to_string() }]
    }

    pub fn refresh_all(&self) -> Vec<Request> {
        self.services
            .keys()
            .map(|id| Request::RefreshStatus { id: id.clone() })
            .collect()
    }

    pub fn update_environment(&self, id: &str, vars: BTreeMap<String, String>) -> Vec<Request> {
        if !self.services.contains_key(id) {
            return Vec::new();
        }
        vec![Request::UpdateEnvironment {
            id: id.to_string(),
            vars,
        }]
    }

    pub fn dismiss_toast(&mut self) {
        self.ui.dismiss_toast();
    }

    // ---- inbound ----

    pub fn handle_transport_event(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::Control(ev) => self.handle_event(ev, now),
            TransportEvent::Diagnostic(diag) => self.handle_diagnostic(diag),
        }
    }

    pub fn handle_event(&mut self, event: InboundEvent, now: Instant) {
        match &event {
            InboundEvent::CommandSucceeded { .. } | InboundEvent::CommandFailed { .. } => {
                if let Some(res) = self.dispatcher.resolve(&event) {
                    self.apply_resolution(res, now);
                }
                return;
            }
            InboundEvent::ServiceStatus {
                service_id,
                is_running,
            } => {
                self.apply_status(service_id, *is_running);
                return;
            }
            _ => {}
        }

        for listener in self.listeners.deliver(&event) {
            match (listener, &event) {
                (Listener::AppendLog { service_id }, InboundEvent::LogMessage { log, .. }) => {
                    self.ui.append_log(&service_id, log.clone());
                }
                (Listener::UpdateStats { service_id }, InboundEvent::StatsMessage { stats, .. }) => {
                    self.ui.update_stats(&service_id, *stats);
                }
                (
                    Listener::StreamFailed { service_id, kind },
                    InboundEvent::StreamFailed { message, error, .. },
                ) => {
                    self.stream_failed(&service_id, kind, message, error.as_deref(), now);
                }
                (listener, event) => {
                    debug!(?listener, event = %event.name(), "listener does not apply to event");
                }
            }
        }
    }

    pub fn handle_diagnostic(&mut self, event: DiagnosticEvent) {
        match event {
            DiagnosticEvent::Connected => {
                debug!("connected to control server");
                self.ui.record(DiagnosticLevel::Debug, "Connected to websocket server");
                self.ui.set_connection(ConnectionState::Connected);
            }
            DiagnosticEvent::Disconnected { reason } => {
                debug!(%reason, "disconnected from control server");
                self.ui.record(
                    DiagnosticLevel::Debug,
                    format!("Disconnected from websocket server: {}", reason),
                );
                self.ui.set_connection(ConnectionState::Disconnected { reason });
            }
            DiagnosticEvent::ConnectError { message } => {
                debug!(%message, "error connecting to control server");
                self.ui.record(
                    DiagnosticLevel::Debug,
                    format!("Error connecting to websocket server: {}", message),
                );
                self.ui.set_connection(ConnectionState::Disconnected { reason: message });
            }
        }
    }

    /// Authoritative running state from a status poll or server push
    pub fn apply_status(&mut self, id: &str, is_running: bool) {
        let Some(service) = self.services.get_mut(id) else {
            return;
        };
        service.is_running = is_running;
        self.ui.reconcile(service, self.dispatcher.pending(id));
    }

    pub fn status_refresh_failed(&mut self, id: &str, reason: &str) {
        warn!(service = %id, %reason, "status refresh failed");
        self.ui.record(
            DiagnosticLevel::Error,
            format!("status refresh for {} failed: {}", id, reason),
        );
    }

    pub fn environment_updated(&mut self, id: &str, result: Result<String, String>, now: Instant) {
        match result {
            Ok(message) => {
                info!(service = %id, "environment updated");
                self.ui.show_toast(message, now);
            }
            Err(reason) => {
                error!(service = %id, %reason, "environment update failed");
                self.ui.record(DiagnosticLevel::Error, format!("Error: {}", reason));
                self.ui.show_toast("Error updating environment variables", now);
            }
        }
    }

    /// The request for a command never left the client, so no acknowledgement
    /// will follow; resolve it now rather than waiting for the deadline.
    pub fn command_undeliverable(&mut self, id: &str, kind: CommandKind, reason: &str, now: Instant) {
        let Some(pending) = self.dispatcher.pending(id) else {
            return;
        };
        if pending.kind != kind {
            return;
        }
        let failure = InboundEvent::CommandFailed {
            service_id: id.to_string(),
            kind,
            message: format!("Could not send {} request", kind),
            error: Some(reason.to_string()),
        };
        if let Some(res) = self.dispatcher.resolve(&failure) {
            self.apply_resolution(res, now);
        }
    }

    /// Expire overdue commands and advance the toast
    pub fn tick(&mut self, now: Instant) {
        for res in self.dispatcher.expire(now) {
            self.apply_resolution(res, now);
        }
        self.ui.tick(now);
    }

    /// Earliest instant at which `tick` has something to do
    pub fn next_wakeup(&self, now: Instant) -> Option<Instant> {
        match (
            self.dispatcher.next_deadline(),
            self.ui.toast().next_transition(now),
        ) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // ---- queries ----

    pub fn ui(&self) -> &Reconciler {
        &self.ui
    }

    pub fn service(&self, id: &str) -> Option<&Service> {
        self.services.get(id)
    }

    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }

    pub fn service_ids(&self) -> Vec<ServiceId> {
        self.services.keys().cloned().collect()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.dispatcher.is_pending(id)
    }

    pub fn is_subscribed(&self, id: &str) -> bool {
        self.subscriptions.is_subscribed(id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.total()
    }

    pub fn session(&self, id: &str) -> Option<SessionState> {
        let service = self.services.get(id)?;
        let activity = match self.dispatcher.pending(id) {
            Some(p) => Activity::CommandPending(p.kind),
            None => Activity::Idle {
                running: service.is_running,
            },
        };
        Some(SessionState {
            activity,
            detail_open: self.subscriptions.is_subscribed(id),
        })
    }

    // ---- internals ----

    fn apply_resolution(&mut self, res: Resolution, now: Instant) {
        let Some(service) = self.services.get_mut(&res.service_id) else {
            return;
        };

        match res.outcome {
            Outcome::Succeeded { message } => {
                info!(service = %res.service_id, kind = %res.kind, "command succeeded");
                service.is_running = res.kind.running_after();
                let text = if message.is_empty() {
                    format!("Service {} {}", service.name, res.kind.past())
                } else {
                    message
                };
                self.ui.show_toast(text, now);
            }
            Outcome::Failed { message, error } => {
                let detail = error.unwrap_or_else(|| message.clone());
                error!(service = %res.service_id, kind = %res.kind, error = %detail, "command failed");
                self.ui.record(DiagnosticLevel::Error, detail);
                self.ui.show_toast(message, now);
            }
            Outcome::TimedOut => {
                self.ui.record(
                    DiagnosticLevel::Error,
                    format!("{} {}: no response from server", res.kind, res.service_id),
                );
                let text = format!(
                    "No response from server while {} {}",
                    res.kind.progressive().to_lowercase(),
                    service.name
                );
                self.ui.show_toast(text, now);
            }
        }

        self.ui.reconcile(service, None);
    }

    fn stream_failed(
        &mut self,
        id: &str,
        kind: StreamKind,
        message: &str,
        error: Option<&str>,
        now: Instant,
    ) {
        let detail = error.unwrap_or(message);
        error!(service = %id, stream = %kind, error = %detail, "stream failed");
        self.subscriptions.mark_failed(id, kind);
        self.ui.record(DiagnosticLevel::Error, detail.to_string());
        self.ui.show_toast(message.to_string(), now);
    }
}
