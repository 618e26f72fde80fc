//! Transport capability behind the panel
//!
//! The panel never talks to the network. It produces requests; a transport
//! carries them and pushes whatever comes back into an [`EventSink`].
//! Socket push, HTTP polling, and the in-process fake are interchangeable
//! implementations of the same trait.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::TransportError;
use crate::model::{CommandKind, ServiceId, StreamKind};
use crate::protocol::{InboundEvent, OutboundEvent, StreamCommand};

/// Connectivity events from the default (non-namespaced) connection.
/// They are never tied to a service or command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiagnosticEvent {
    Connected,
    Disconnected { reason: String },
    ConnectError { message: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    Control(InboundEvent),
    Diagnostic(DiagnosticEvent),
}

pub type EventSink = mpsc::UnboundedSender<TransportEvent>;
pub type EventSource = mpsc::UnboundedReceiver<TransportEvent>;

pub fn event_channel() -> (EventSink, EventSource) {
    mpsc::unbounded_channel()
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable name of this transport
    fn name(&self) -> &'static str;

    /// Fire-and-forget; the outcome arrives later as a control event
    async fn dispatch_command(&self, id: &ServiceId, kind: CommandKind) -> Result<(), TransportError>;

    async fn open_stream(&self, id: &ServiceId, kind: StreamKind) -> Result<(), TransportError>;

    async fn close_stream(&self, id: &ServiceId, kind: StreamKind) -> Result<(), TransportError>;

    /// Ask the backend whether the service is running
    async fn refresh_status(&self, id: &ServiceId) -> Result<bool, TransportError>;

    /// Replace environment variables; returns the server's message
    async fn update_environment(
        &self,
        id: &ServiceId,
        vars: &BTreeMap<String, String>,
    ) -> Result<String, TransportError>;

    /// Route an outbound request to the matching operation
    async fn send(&self, event: &OutboundEvent) -> Result<(), TransportError> {
        match event {
            OutboundEvent::Command { id, kind } => self.dispatch_command(id, *kind).await,
            OutboundEvent::Stream {
                id,
                kind,
                command: StreamCommand::Start,
            } => self.open_stream(id, *kind).await,
            OutboundEvent::Stream {
                id,
                kind,
                command: StreamCommand::Stop,
            } => self.close_stream(id, *kind).await,
        }
    }
}
