//! Wire format of the service-control namespace
//!
//! Outbound requests and inbound events are `(name, json payload)` pairs.
//! Service ids are normalized here: the server may send them as numbers or
//! strings, everything past this module sees a `ServiceId` string.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::errors::ProtocolError;
use crate::model::{CommandKind, ServiceId, ServiceStats, StreamKind};

pub const GET_LOGS: &str = "get_logs";
pub const GET_STATS: &str = "get_stats";
pub const LOG_MESSAGE: &str = "log_message";
pub const STATS_MESSAGE: &str = "stats_message";
pub const GET_LOGS_FAILED: &str = "get_logs_failed";
pub const GET_STATS_FAILED: &str = "get_stats_failed";
pub const SERVICE_STATUS: &str = "service_status";

/// Whether a stream request opens or closes the feed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamCommand {
    Start,
    Stop,
}

impl StreamCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamCommand::Start => "start",
            StreamCommand::Stop => "stop",
        }
    }
}

/// Requests the panel emits on the control channel
#[derive(Clone, Debug, PartialEq)]
pub enum OutboundEvent {
    Command {
        id: ServiceId,
        kind: CommandKind,
    },
    Stream {
        id: ServiceId,
        kind: StreamKind,
        command: StreamCommand,
    },
}

impl OutboundEvent {
    pub fn name(&self) -> String {
        match self {
            OutboundEvent::Command { kind, .. } => command_request_name(*kind),
            OutboundEvent::Stream { kind, .. } => stream_request_name(*kind).to_string(),
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            OutboundEvent::Command { id, .. } => Value::String(id.clone()),
            OutboundEvent::Stream { id, command, .. } => json!({
                "serviceId": id,
                "command": command.as_str(),
            }),
        }
    }

    pub fn service_id(&self) -> &ServiceId {
        match self {
            OutboundEvent::Command { id, .. } | OutboundEvent::Stream { id, .. } => id,
        }
    }
}

/// Events the server pushes on the control channel, already normalized
#[derive(Clone, Debug, PartialEq)]
pub enum InboundEvent {
    CommandSucceeded {
        service_id: ServiceId,
        kind: CommandKind,
        message: String,
    },
    CommandFailed {
        service_id: ServiceId,
        kind: CommandKind,
        message: String,
        error: Option<String>,
    },
    LogMessage {
        service_id: ServiceId,
        log: String,
    },
    StatsMessage {
        service_id: ServiceId,
        stats: ServiceStats,
    },
    StreamFailed {
        service_id: ServiceId,
        kind: StreamKind,
        message: String,
        error: Option<String>,
    },
    /// Unsolicited running-state push (container started or died)
    ServiceStatus {
        service_id: ServiceId,
        is_running: bool,
    },
}

impl InboundEvent {
    pub fn service_id(&self) -> &ServiceId {
        match self {
            InboundEvent::CommandSucceeded { service_id, .. }
            | InboundEvent::CommandFailed { service_id, .. }
            | InboundEvent::LogMessage { service_id, .. }
            | InboundEvent::StatsMessage { service_id, .. }
            | InboundEvent::StreamFailed { service_id, .. }
            | InboundEvent::ServiceStatus { service_id, .. } => service_id,
        }
    }

    /// Event name this variant is registered under
    pub fn name(&self) -> String {
        match self {
            InboundEvent::CommandSucceeded { kind, .. } => command_success_name(*kind).to_string(),
            InboundEvent::CommandFailed { kind, .. } => command_error_name(*kind),
            InboundEvent::LogMessage { .. } => LOG_MESSAGE.to_string(),
            InboundEvent::StatsMessage { .. } => STATS_MESSAGE.to_string(),
            InboundEvent::StreamFailed { kind, .. } => stream_failed_name(*kind).to_string(),
            InboundEvent::ServiceStatus { .. } => SERVICE_STATUS.to_string(),
        }
    }

    /// Encode back to `(name, payload)`; used by in-process transports
    pub fn to_wire(&self) -> (String, Value) {
        let payload = match self {
            InboundEvent::CommandSucceeded { service_id, message, .. } => {
                json!({ "service_id": service_id, "message": message })
            }
            InboundEvent::CommandFailed {
                service_id,
                message,
                error,
                ..
            }
            | InboundEvent::StreamFailed {
                service_id,
                message,
                error,
                ..
            } => json!({ "service_id": service_id, "message": message, "error": error }),
            InboundEvent::LogMessage { service_id, log } => {
                json!({ "service_id": service_id, "log": log })
            }
            InboundEvent::StatsMessage { service_id, stats } => {
                json!({ "service_id": service_id, "stats": stats })
            }
            InboundEvent::ServiceStatus {
                service_id,
                is_running,
            } => json!({ "service_id": service_id, "is_running": is_running }),
        };
        (self.name(), payload)
    }
}

pub fn command_request_name(kind: CommandKind) -> String {
    format!("{}_service", kind.verb())
}

pub fn command_success_name(kind: CommandKind) -> &'static str {
    match kind {
        CommandKind::Start => "service_started",
        CommandKind::Stop => "service_stopped",
        CommandKind::Restart => "service_restarted",
    }
}

pub fn command_error_name(kind: CommandKind) -> String {
    format!("service_{}_error", kind.verb())
}

pub fn stream_request_name(kind: StreamKind) -> &'static str {
    match kind {
        StreamKind::Logs => GET_LOGS,
        StreamKind::Stats => GET_STATS,
    }
}

pub fn stream_failed_name(kind: StreamKind) -> &'static str {
    match kind {
        StreamKind::Logs => GET_LOGS_FAILED,
        StreamKind::Stats => GET_STATS_FAILED,
    }
}

/// Service id as it appears on the wire
#[derive(Deserialize)]
#[serde(untagged)]
enum WireId {
    Int(i64),
    Text(String),
}

impl From<WireId> for ServiceId {
    fn from(id: WireId) -> Self {
        match id {
            WireId::Int(n) => n.to_string(),
            WireId::Text(s) => s,
        }
    }
}

#[derive(Deserialize)]
struct MessagePayload {
    service_id: WireId,
    #[serde(default)]
    message: String,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Deserialize)]
struct LogPayload {
    service_id: WireId,
    log: String,
}

#[derive(Deserialize)]
struct StatsPayload {
    service_id: WireId,
    stats: ServiceStats,
}

#[derive(Deserialize)]
struct StatusPayload {
    service_id: WireId,
    #[serde(default)]
    is_running: Option<bool>,
    #[serde(default)]
    status: Option<String>,
}

fn parse<T: for<'de> Deserialize<'de>>(event: &str, payload: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|source| ProtocolError::Decode {
        event: event.to_string(),
        source,
    })
}

/// Python-side errors are sometimes strings, sometimes objects
fn error_text(error: Option<Value>) -> Option<String> {
    match error? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Decode an inbound `(name, payload)` pair.
///
/// Command failures are accepted under both `service_{verb}_error` and
/// `service_{verb}_failed`; servers in the wild emit either.
pub fn decode_inbound(name: &str, payload: Value) -> Result<InboundEvent, ProtocolError> {
    match name {
        LOG_MESSAGE => {
            let p: LogPayload = parse(name, payload)?;
            return Ok(InboundEvent::LogMessage {
                service_id: p.service_id.into(),
                log: p.log,
            });
        }
        STATS_MESSAGE => {
            let p: StatsPayload = parse(name, payload)?;
            return Ok(InboundEvent::StatsMessage {
                service_id: p.service_id.into(),
                stats: p.stats,
            });
        }
        GET_LOGS_FAILED | GET_STATS_FAILED => {
            let kind = if name == GET_LOGS_FAILED {
                StreamKind::Logs
            } else {
                StreamKind::Stats
            };
            let p: MessagePayload = parse(name, payload)?;
            return Ok(InboundEvent::StreamFailed {
                service_id: p.service_id.into(),
                kind,
                message: p.message,
                error: error_text(p.error),
            });
        }
        SERVICE_STATUS => {
            let p: StatusPayload = parse(name, payload)?;
            let is_running = match (p.is_running, p.status.as_deref()) {
                (Some(running), _) => running,
                (None, Some(status)) => matches!(status, "start" | "running"),
                (None, None) => {
                    return Err(ProtocolError::MissingField {
                        event: name.to_string(),
                        field: "is_running",
                    });
                }
            };
            return Ok(InboundEvent::ServiceStatus {
                service_id: p.service_id.into(),
                is_running,
            });
        }
        _ => {}
    }

    for kind in CommandKind::ALL {
        if name == command_success_name(kind) {
            let p: MessagePayload = parse(name, payload)?;
            return Ok(InboundEvent::CommandSucceeded {
                service_id: p.service_id.into(),
                kind,
                message: p.message,
            });
        }
        if name == command_error_name(kind) || name == format!("service_{}_failed", kind.verb()) {
            let p: MessagePayload = parse(name, payload)?;
            return Ok(InboundEvent::CommandFailed {
                service_id: p.service_id.into(),
                kind,
                message: p.message,
                error: error_text(p.error),
            });
        }
    }

    Err(ProtocolError::UnknownEvent(name.to_string()))
}

/// Socket framing: `{ "event": name, "data": payload }`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

pub fn encode_envelope(event: &OutboundEvent) -> Result<String, ProtocolError> {
    let envelope = Envelope {
        event: event.name(),
        data: event.payload(),
    };
    serde_json::to_string(&envelope).map_err(ProtocolError::Encode)
}

pub fn decode_envelope(text: &str) -> Result<Envelope, ProtocolError> {
    serde_json::from_str(text).map_err(|source| ProtocolError::Decode {
        event: "<envelope>".to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_command_shape() {
        let ev = OutboundEvent::Command {
            id: "svc-1".into(),
            kind: CommandKind::Restart,
        };
        assert_eq!(ev.name(), "restart_service");
        assert_eq!(ev.payload(), json!("svc-1"));
    }

    #[test]
    fn test_outbound_stream_shape() {
        let ev = OutboundEvent::Stream {
            id: "7".into(),
            kind: StreamKind::Stats,
            command: StreamCommand::Stop,
        };
        assert_eq!(ev.name(), "get_stats");
        assert_eq!(ev.payload(), json!({ "serviceId": "7", "command": "stop" }));
    }

    #[test]
    fn test_numeric_ids_are_normalized() {
        let ev = decode_inbound(
            "service_started",
            json!({ "service_id": 5, "message": "Service started successfully" }),
        )
        .unwrap();
        assert_eq!(ev.service_id(), "5");
        assert!(matches!(
            ev,
            InboundEvent::CommandSucceeded { kind: CommandKind::Start, .. }
        ));
    }

    #[test]
    fn test_failed_alias_decodes_as_error() {
        let payload = json!({ "service_id": "a", "message": "Error stopping service", "error": "boom" });
        let a = decode_inbound("service_stop_error", payload.clone()).unwrap();
        let b = decode_inbound("service_stop_failed", payload).unwrap();
        assert_eq!(a, b);
        assert!(matches!(
            a,
            InboundEvent::CommandFailed { kind: CommandKind::Stop, error: Some(ref e), .. } if e == "boom"
        ));
    }

    #[test]
    fn test_structured_error_is_stringified() {
        let ev = decode_inbound(
            "get_logs_failed",
            json!({ "service_id": 1, "message": "m", "error": { "code": 3 } }),
        )
        .unwrap();
        match ev {
            InboundEvent::StreamFailed { kind, error, .. } => {
                assert_eq!(kind, StreamKind::Logs);
                assert_eq!(error.as_deref(), Some(r#"{"code":3}"#));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_stats_message() {
        let ev = decode_inbound(
            "stats_message",
            json!({ "service_id": "svc-1", "stats": { "cpu_usage": 42, "memory_usage": 10, "disk_usage": 5 } }),
        )
        .unwrap();
        assert_eq!(
            ev,
            InboundEvent::StatsMessage {
                service_id: "svc-1".into(),
                stats: ServiceStats {
                    cpu_usage: 42.0,
                    memory_usage: 10.0,
                    disk_usage: 5.0
                },
            }
        );
    }

    #[test]
    fn test_service_status_from_docker_status() {
        let ev = decode_inbound("service_status", json!({ "service_id": 2, "status": "die" })).unwrap();
        assert_eq!(
            ev,
            InboundEvent::ServiceStatus {
                service_id: "2".into(),
                is_running: false
            }
        );
    }

    #[test]
    fn test_unknown_and_malformed() {
        assert!(matches!(
            decode_inbound("connect_response", json!({})),
            Err(ProtocolError::UnknownEvent(_))
        ));
        assert!(matches!(
            decode_inbound("log_message", json!({ "service_id": true, "log": "x" })),
            Err(ProtocolError::Decode { .. })
        ));
    }

    #[test]
    fn test_wire_roundtrip_of_inbound() {
        let ev = InboundEvent::LogMessage {
            service_id: "svc-1".into(),
            log: "hello".into(),
        };
        let (name, payload) = ev.to_wire();
        assert_eq!(decode_inbound(&name, payload).unwrap(), ev);
    }

    #[test]
    fn test_envelope() {
        let text = encode_envelope(&OutboundEvent::Stream {
            id: "svc-1".into(),
            kind: StreamKind::Logs,
            command: StreamCommand::Start,
        })
        .unwrap();
        let env = decode_envelope(&text).unwrap();
        assert_eq!(env.event, "get_logs");
        assert_eq!(env.data["command"], "start");
    }
}
