//! Lifecycle command correlation
//!
//! Each dispatched command waits in a table keyed by service id until the
//! first matching success or error event arrives, or its deadline passes.
//! Resolution removes the entry, so a late duplicate finds nothing to act on.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::model::{CommandKind, ServiceId};
use crate::protocol::{InboundEvent, OutboundEvent};

/// Default time to wait for an acknowledgement before giving up
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingCommand {
    pub service_id: ServiceId,
    pub kind: CommandKind,
    pub issued_at: Instant,
    pub deadline: Instant,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Succeeded {
        message: String,
    },
    Failed {
        message: String,
        error: Option<String>,
    },
    /// No acknowledgement before the deadline
    TimedOut,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub service_id: ServiceId,
    pub kind: CommandKind,
    pub outcome: Outcome,
}

#[derive(Debug)]
pub struct CommandDispatcher {
    timeout: Duration,
    pending: BTreeMap<ServiceId, PendingCommand>,
}

impl CommandDispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            pending: BTreeMap::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record the command and build its request. The caller guarantees no
    /// command is already pending for this service.
    pub fn dispatch(&mut self, id: &ServiceId, kind: CommandKind, now: Instant) -> OutboundEvent {
        debug!(service = %id, %kind, "dispatching command");
        self.pending.insert(
            id.clone(),
            PendingCommand {
                service_id: id.clone(),
                kind,
                issued_at: now,
                deadline: now + self.timeout,
            },
        );
        OutboundEvent::Command {
            id: id.clone(),
            kind,
        }
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    pub fn pending(&self, id: &str) -> Option<&PendingCommand> {
        self.pending.get(id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Match an acknowledgement against the table. Events for other kinds or
    /// for services with nothing pending are ignored.
    pub fn resolve(&mut self, event: &InboundEvent) -> Option<Resolution> {
        let (service_id, kind, outcome) = match event {
            InboundEvent::CommandSucceeded {
                service_id,
                kind,
                message,
            } => (
                service_id,
                *kind,
                Outcome::Succeeded {
                    message: message.clone(),
                },
            ),
            InboundEvent::CommandFailed {
                service_id,
                kind,
                message,
                error,
            } => (
                service_id,
                *kind,
                Outcome::Failed {
                    message: message.clone(),
                    error: error.clone(),
                },
            ),
            _ => return None,
        };

        match self.pending.get(service_id) {
            Some(p) if p.kind == kind => {}
            Some(p) => {
                debug!(service = %service_id, pending = %p.kind, got = %kind, "ignoring acknowledgement for another command");
                return None;
            }
            None => {
                debug!(service = %service_id, %kind, "ignoring acknowledgement with nothing pending");
                return None;
            }
        }

        self.pending.remove(service_id);
        Some(Resolution {
            service_id: service_id.clone(),
            kind,
            outcome,
        })
    }

    /// Resolve every command whose deadline has passed as `TimedOut`
    pub fn expire(&mut self, now: Instant) -> Vec<Resolution> {
        let expired: Vec<ServiceId> = self
            .pending
            .values()
            .filter(|p| p.deadline <= now)
            .map(|p| p.service_id.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.pending.remove(&id))
            .map(|p| {
                warn!(service = %p.service_id, kind = %p.kind, "command timed out");
                Resolution {
                    service_id: p.service_id,
                    kind: p.kind,
                    outcome: Outcome::TimedOut,
                }
            })
            .collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(id: &str) -> InboundEvent {
        InboundEvent::CommandSucceeded {
            service_id: id.into(),
            kind: CommandKind::Start,
            message: "Started".into(),
        }
    }

    #[test]
    fn test_success_resolves_and_clears() {
        let now = Instant::now();
        let mut d = CommandDispatcher::default();
        let req = d.dispatch(&"svc-1".to_string(), CommandKind::Start, now);
        assert_eq!(req.name(), "start_service");
        assert!(d.is_pending("svc-1"));

        let res = d.resolve(&started("svc-1")).unwrap();
        assert_eq!(res.outcome, Outcome::Succeeded { message: "Started".into() });
        assert!(!d.is_pending("svc-1"));
    }

    #[test]
    fn test_first_acknowledgement_wins() {
        let mut d = CommandDispatcher::default();
        d.dispatch(&"a".to_string(), CommandKind::Start, Instant::now());

        assert!(d.resolve(&started("a")).is_some());
        let late_error = InboundEvent::CommandFailed {
            service_id: "a".into(),
            kind: CommandKind::Start,
            message: "Error starting service".into(),
            error: None,
        };
        assert!(d.resolve(&late_error).is_none());
    }

    #[test]
    fn test_other_service_and_kind_ignored() {
        let mut d = CommandDispatcher::default();
        d.dispatch(&"5".to_string(), CommandKind::Start, Instant::now());

        assert!(d.resolve(&started("7")).is_none());
        let stopped = InboundEvent::CommandSucceeded {
            service_id: "5".into(),
            kind: CommandKind::Stop,
            message: "Stopped".into(),
        };
        assert!(d.resolve(&stopped).is_none());
        assert!(d.is_pending("5"));
    }

    #[test]
    fn test_expire_after_deadline() {
        let now = Instant::now();
        let mut d = CommandDispatcher::new(Duration::from_secs(5));
        d.dispatch(&"a".to_string(), CommandKind::Restart, now);
        d.dispatch(&"b".to_string(), CommandKind::Stop, now + Duration::from_secs(3));

        assert_eq!(d.next_deadline(), Some(now + Duration::from_secs(5)));
        assert!(d.expire(now + Duration::from_secs(4)).is_empty());

        let expired = d.expire(now + Duration::from_secs(5));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].service_id, "a");
        assert_eq!(expired[0].outcome, Outcome::TimedOut);
        assert!(d.is_pending("b"));
    }
}
