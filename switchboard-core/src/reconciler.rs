//! View state for the whole panel
//!
//! Everything the terminal draws comes from here: per-service controls,
//! launch link, log view, gauges, the toast, and the diagnostics journal.
//! The panel decides *when* something changes; only this module mutates
//! what is visible.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Instant, SystemTime};

use crate::dispatcher::PendingCommand;
use crate::model::{CommandKind, Service, ServiceId, ServiceStats};
use crate::toast::{Toast, ToastTiming};

const MAX_DIAGNOSTICS: usize = 500;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LaunchState {
    Enabled { url: String },
    Disabled,
}

impl LaunchState {
    pub fn url(&self) -> Option<&str> {
        match self {
            LaunchState::Enabled { url } => Some(url),
            LaunchState::Disabled => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServiceView {
    pub id: ServiceId,
    pub name: String,
    pub description: Option<String>,
    pub is_running: bool,
    pub launch: LaunchState,
    pub controls_disabled: bool,
    /// Control showing the spinner, if a command is in flight
    pub loading: Option<CommandKind>,
    pub detail_open: bool,
    pub logs: Vec<String>,
    pub stats: Option<ServiceStats>,
}

impl ServiceView {
    fn new(service: &Service) -> Self {
        let mut view = Self {
            id: service.id.clone(),
            name: service.name.clone(),
            description: service.description.clone(),
            is_running: false,
            launch: LaunchState::Disabled,
            controls_disabled: false,
            loading: None,
            detail_open: false,
            logs: Vec::new(),
            stats: None,
        };
        view.project(service, None);
        view
    }

    fn project(&mut self, service: &Service, pending: Option<&PendingCommand>) {
        self.is_running = service.is_running;
        self.launch = match (&service.launch_url, service.is_running) {
            (Some(url), true) => LaunchState::Enabled { url: url.clone() },
            _ => LaunchState::Disabled,
        };
        self.controls_disabled = pending.is_some();
        self.loading = pending.map(|p| p.kind);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Debug,
    Error,
}

#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub at: SystemTime,
    pub level: DiagnosticLevel,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected { reason: String },
}

#[derive(Debug)]
pub struct Reconciler {
    views: BTreeMap<ServiceId, ServiceView>,
    toast: Toast,
    diagnostics: VecDeque<Diagnostic>,
    connection: ConnectionState,
}

impl Reconciler {
    pub fn new(timing: ToastTiming) -> Self {
        Self {
            views: BTreeMap::new(),
            toast: Toast::new(timing),
            diagnostics: VecDeque::new(),
            connection: ConnectionState::Connecting,
        }
    }

    pub fn add_service(&mut self, service: &Service) {
        self.views
            .insert(service.id.clone(), ServiceView::new(service));
    }

    /// Recompute launch link, control state, and spinner from the service
    /// and its in-flight command.
    pub fn reconcile(&mut self, service: &Service, pending: Option<&PendingCommand>) {
        if let Some(view) = self.views.get_mut(&service.id) {
            view.project(service, pending);
        }
    }

    pub fn set_detail_open(&mut self, id: &str, open: bool) {
        if let Some(view) = self.views.get_mut(id) {
            view.detail_open = open;
        }
    }

    /// Append a line to an open log view; closed views ignore it
    pub fn append_log(&mut self, id: &str, line: String) -> bool {
        match self.views.get_mut(id) {
            Some(view) if view.detail_open => {
                view.logs.push(line);
                true
            }
            _ => false,
        }
    }

    pub fn clear_logs(&mut self, id: &str) {
        if let Some(view) = self.views.get_mut(id) {
            view.logs.clear();
        }
    }

    /// Last write wins; closed views ignore it
    pub fn update_stats(&mut self, id: &str, stats: ServiceStats) -> bool {
        match self.views.get_mut(id) {
            Some(view) if view.detail_open => {
                view.stats = Some(stats);
                true
            }
            _ => false,
        }
    }

    pub fn show_toast(&mut self, text: impl Into<String>, now: Instant) {
        self.toast.show(text, now);
    }

    pub fn dismiss_toast(&mut self) {
        self.toast.dismiss();
    }

    pub fn toast(&self) -> &Toast {
        &self.toast
    }

    pub fn record(&mut self, level: DiagnosticLevel, text: impl Into<String>) {
        self.diagnostics.push_back(Diagnostic {
            at: SystemTime::now(),
            level,
            text: text.into(),
        });
        while self.diagnostics.len() > MAX_DIAGNOSTICS {
            self.diagnostics.pop_front();
        }
    }

    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn set_connection(&mut self, state: ConnectionState) {
        self.connection = state;
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn tick(&mut self, now: Instant) {
        self.toast.tick(now);
    }

    pub fn view(&self, id: &str) -> Option<&ServiceView> {
        self.views.get(id)
    }

    pub fn views(&self) -> impl Iterator<Item = &ServiceView> {
        self.views.values()
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(ToastTiming::default())
    }
}
