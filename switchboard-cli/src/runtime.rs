//! Drives a [`Panel`] against a live transport.
//!
//! The panel decides, the runtime performs: requests are handed to the
//! transport, and whatever comes back (pushed events, or the outcome of a
//! request that could not be sent) is fed into the panel.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use switchboard_core::model::{CommandKind, ServiceId, StreamKind};
use switchboard_core::panel::{Panel, Request};
use switchboard_core::protocol::{InboundEvent, OutboundEvent, StreamCommand};
use switchboard_core::transport::{EventSource, Transport};

/// Outcome of a request the runtime carried out
#[derive(Debug)]
enum Completion {
    CommandUndeliverable {
        id: ServiceId,
        kind: CommandKind,
        reason: String,
    },
    StreamUndeliverable {
        id: ServiceId,
        kind: StreamKind,
        reason: String,
    },
    Status {
        id: ServiceId,
        result: Result<bool, String>,
    },
    Environment {
        id: ServiceId,
        result: Result<String, String>,
    },
}

pub struct Runtime {
    panel: Panel,
    transport: Arc<dyn Transport>,
    events: EventSource,
    emitter: mpsc::UnboundedSender<OutboundEvent>,
    done_tx: mpsc::UnboundedSender<Completion>,
    done_rx: mpsc::UnboundedReceiver<Completion>,
    refreshed: usize,
}

impl Runtime {
    pub fn new(panel: Panel, transport: Arc<dyn Transport>, events: EventSource) -> Self {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let emitter = spawn_emitter(Arc::clone(&transport), done_tx.clone());
        Self {
            panel,
            transport,
            events,
            emitter,
            done_tx,
            done_rx,
            refreshed: 0,
        }
    }

    pub fn panel(&self) -> &Panel {
        &self.panel
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Status refreshes answered so far, successful or not
    pub fn completed_refreshes(&self) -> usize {
        self.refreshed
    }

    /// Run a panel operation and perform whatever it asks for
    pub fn act<F>(&mut self, op: F)
    where
        F: FnOnce(&mut Panel, Instant) -> Vec<Request>,
    {
        let requests = op(&mut self.panel, Instant::now());
        self.submit(requests);
    }

    /// Mutate the panel without side effects (clear logs, dismiss toast)
    pub fn update<F>(&mut self, op: F)
    where
        F: FnOnce(&mut Panel),
    {
        op(&mut self.panel);
    }

    pub fn submit(&self, requests: Vec<Request>) {
        for request in requests {
            match request {
                Request::Emit(OutboundEvent::Command { id, kind }) => {
                    // At most one command is pending per service, so
                    // commands need no ordering and must not queue behind
                    // another service's slow round trip.
                    let transport = Arc::clone(&self.transport);
                    let done = self.done_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = transport.dispatch_command(&id, kind).await {
                            let reason = e.to_string();
                            let _ = done.send(Completion::CommandUndeliverable { id, kind, reason });
                        }
                    });
                }
                Request::Emit(event) => {
                    // Stream requests go through one queue so a stream's
                    // start always reaches the server before its stop.
                    if self.emitter.send(event).is_err() {
                        warn!("emitter task is gone");
                    }
                }
                Request::RefreshStatus { id } => {
                    let transport = Arc::clone(&self.transport);
                    let done = self.done_tx.clone();
                    tokio::spawn(async move {
                        let result = transport.refresh_status(&id).await.map_err(|e| e.to_string());
                        let _ = done.send(Completion::Status { id, result });
                    });
                }
                Request::UpdateEnvironment { id, vars } => {
                    let transport = Arc::clone(&self.transport);
                    let done = self.done_tx.clone();
                    tokio::spawn(async move {
                        let result = transport
                            .update_environment(&id, &vars)
                            .await
                            .map_err(|e| e.to_string());
                        let _ = done.send(Completion::Environment { id, result });
                    });
                }
            }
        }
    }

    /// Apply everything that has already arrived, then advance timers.
    /// Never blocks.
    pub fn drain(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events.try_recv() {
            self.panel.handle_transport_event(event, Instant::now());
            applied += 1;
        }
        while let Ok(done) = self.done_rx.try_recv() {
            self.complete(done);
            applied += 1;
        }
        self.panel.tick(Instant::now());
        applied
    }

    /// Wait for the next event, completion, or panel deadline, whichever
    /// comes first, but no later than `limit`. Returns false once the
    /// transport has gone away.
    pub async fn step(&mut self, limit: tokio::time::Instant) -> bool {
        let wake = self
            .panel
            .next_wakeup(Instant::now())
            .map(tokio::time::Instant::from_std)
            .map_or(limit, |w| w.min(limit));

        let alive = tokio::select! {
            event = self.events.recv() => match event {
                Some(event) => {
                    self.panel.handle_transport_event(event, Instant::now());
                    true
                }
                None => false,
            },
            Some(done) = self.done_rx.recv() => {
                self.complete(done);
                true
            }
            _ = tokio::time::sleep_until(wake) => true,
        };
        self.drain();
        alive
    }

    fn complete(&mut self, done: Completion) {
        let now = Instant::now();
        match done {
            Completion::CommandUndeliverable { id, kind, reason } => {
                self.panel.command_undeliverable(&id, kind, &reason, now);
            }
            Completion::StreamUndeliverable { id, kind, reason } => {
                self.panel.handle_event(
                    InboundEvent::StreamFailed {
                        service_id: id,
                        kind,
                        message: format!("Could not request {}", kind),
                        error: Some(reason),
                    },
                    now,
                );
            }
            Completion::Status { id, result } => {
                self.refreshed += 1;
                match result {
                    Ok(running) => self.panel.apply_status(&id, running),
                    Err(reason) => self.panel.status_refresh_failed(&id, &reason),
                }
            }
            Completion::Environment { id, result } => {
                self.panel.environment_updated(&id, result, now);
            }
        }
    }
}

fn spawn_emitter(
    transport: Arc<dyn Transport>,
    done: mpsc::UnboundedSender<Completion>,
) -> mpsc::UnboundedSender<OutboundEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundEvent>();

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Err(e) = transport.send(&event).await else {
                continue;
            };
            let reason = e.to_string();
            let completion = match event {
                OutboundEvent::Command { id, kind } => {
                    Completion::CommandUndeliverable { id, kind, reason }
                }
                OutboundEvent::Stream {
                    id,
                    kind,
                    command: StreamCommand::Start,
                } => Completion::StreamUndeliverable { id, kind, reason },
                OutboundEvent::Stream {
                    id,
                    kind,
                    command: StreamCommand::Stop,
                } => {
                    debug!(service = %id, %kind, %reason, "could not close stream");
                    continue;
                }
            };
            if done.send(completion).is_err() {
                return;
            }
        }
    });

    tx
}
