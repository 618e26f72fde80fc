//! Named-event listener registry for the control channel
//!
//! `on`/`off` follow the event-emitter contract: listeners are keyed by event
//! name, delivered in registration order, and removal is idempotent.
//! Listeners are plain data scoped to one service; the panel interprets them,
//! so nothing here captures view state.

use std::collections::BTreeMap;

use crate::model::{ServiceId, StreamKind};
use crate::protocol::InboundEvent;

pub type ListenerId = u64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Listener {
    /// Append each `log_message` line to the service's log view
    AppendLog { service_id: ServiceId },
    /// Overwrite the service's gauges with each `stats_message`
    UpdateStats { service_id: ServiceId },
    /// One-shot: surface a stream-open failure
    StreamFailed {
        service_id: ServiceId,
        kind: StreamKind,
    },
}

impl Listener {
    pub fn service_id(&self) -> &ServiceId {
        match self {
            Listener::AppendLog { service_id }
            | Listener::UpdateStats { service_id }
            | Listener::StreamFailed { service_id, .. } => service_id,
        }
    }

    fn one_shot(&self) -> bool {
        matches!(self, Listener::StreamFailed { .. })
    }
}

#[derive(Debug, Default)]
pub struct ListenerRegistry {
    next_id: ListenerId,
    by_event: BTreeMap<String, Vec<(ListenerId, Listener)>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&mut self, event: impl Into<String>, listener: Listener) -> ListenerId {
        self.next_id += 1;
        let id = self.next_id;
        self.by_event
            .entry(event.into())
            .or_default()
            .push((id, listener));
        id
    }

    /// Remove one listener, or every listener for `event` when `id` is None.
    /// Returns how many were removed.
    pub fn off(&mut self, event: &str, id: Option<ListenerId>) -> usize {
        let Some(list) = self.by_event.get_mut(event) else {
            return 0;
        };
        let before = list.len();
        match id {
            Some(id) => list.retain(|(lid, _)| *lid != id),
            None => list.clear(),
        }
        let removed = before - list.len();
        if list.is_empty() {
            self.by_event.remove(event);
        }
        removed
    }

    /// Listeners for this event whose service matches, in registration order.
    /// One-shot listeners are removed as they fire.
    pub fn deliver(&mut self, event: &InboundEvent) -> Vec<Listener> {
        let name = event.name();
        let Some(list) = self.by_event.get_mut(&name) else {
            return Vec::new();
        };

        let service_id = event.service_id();
        let mut fired = Vec::new();
        list.retain(|(_, listener)| {
            if listener.service_id() != service_id {
                return true;
            }
            fired.push(listener.clone());
            !listener.one_shot()
        });
        if list.is_empty() {
            self.by_event.remove(&name);
        }
        fired
    }

    pub fn count(&self, event: &str) -> usize {
        self.by_event.get(event).map(Vec::len).unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.by_event.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::LOG_MESSAGE;

    fn log_event(id: &str) -> InboundEvent {
        InboundEvent::LogMessage {
            service_id: id.into(),
            log: "line".into(),
        }
    }

    #[test]
    fn test_deliver_filters_by_service() {
        let mut reg = ListenerRegistry::new();
        reg.on(LOG_MESSAGE, Listener::AppendLog { service_id: "5".into() });
        reg.on(LOG_MESSAGE, Listener::AppendLog { service_id: "7".into() });

        let fired = reg.deliver(&log_event("5"));
        assert_eq!(fired, vec![Listener::AppendLog { service_id: "5".into() }]);
        assert!(reg.deliver(&log_event("9")).is_empty());
        assert_eq!(reg.count(LOG_MESSAGE), 2);
    }

    #[test]
    fn test_off_is_idempotent() {
        let mut reg = ListenerRegistry::new();
        let id = reg.on(LOG_MESSAGE, Listener::AppendLog { service_id: "a".into() });
        assert_eq!(reg.off(LOG_MESSAGE, Some(id)), 1);
        assert_eq!(reg.off(LOG_MESSAGE, Some(id)), 0);
        assert_eq!(reg.off("never_registered", None), 0);
        assert_eq!(reg.total(), 0);
    }

    #[test]
    fn test_one_shot_removed_after_first_match() {
        let mut reg = ListenerRegistry::new();
        reg.on(
            "get_logs_failed",
            Listener::StreamFailed {
                service_id: "a".into(),
                kind: StreamKind::Logs,
            },
        );
        let ev = InboundEvent::StreamFailed {
            service_id: "a".into(),
            kind: StreamKind::Logs,
            message: "m".into(),
            error: None,
        };
        assert_eq!(reg.deliver(&ev).len(), 1);
        assert!(reg.deliver(&ev).is_empty());
        assert_eq!(reg.total(), 0);
    }
}
