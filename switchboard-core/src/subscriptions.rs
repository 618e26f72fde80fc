//! Log and stats stream subscriptions, tied to detail-view visibility
//!
//! `open` and `close` are only called from detail open/close, and a service
//! has at most one detail view, so pairing is structural: no refcounts.

use std::collections::BTreeMap;

use tracing::debug;

use crate::channel::{Listener, ListenerId, ListenerRegistry};
use crate::model::{ServiceId, StreamKind};
use crate::protocol::{
    LOG_MESSAGE, OutboundEvent, STATS_MESSAGE, StreamCommand, stream_failed_name,
};

#[derive(Debug, Default)]
struct Subscription {
    listeners: Vec<(String, ListenerId)>,
    logs: bool,
    stats: bool,
}

#[derive(Debug, Default)]
pub struct SubscriptionManager {
    open: BTreeMap<ServiceId, Subscription>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request both streams and register their listeners. Opening an already
    /// open service does nothing.
    pub fn open(&mut self, registry: &mut ListenerRegistry, id: &ServiceId) -> Vec<OutboundEvent> {
        if self.open.contains_key(id) {
            debug!(service = %id, "subscriptions already open");
            return Vec::new();
        }

        let mut sub = Subscription {
            logs: true,
            stats: true,
            ..Default::default()
        };
        let mut register = |event: &str, listener: Listener| {
            let lid = registry.on(event, listener);
            sub.listeners.push((event.to_string(), lid));
        };

        register(LOG_MESSAGE, Listener::AppendLog { service_id: id.clone() });
        register(STATS_MESSAGE, Listener::UpdateStats { service_id: id.clone() });
        for kind in StreamKind::ALL {
            register(
                stream_failed_name(kind),
                Listener::StreamFailed {
                    service_id: id.clone(),
                    kind,
                },
            );
        }

        self.open.insert(id.clone(), sub);
        debug!(service = %id, "opened subscriptions");
        stream_requests(id, StreamCommand::Start)
    }

    /// Request both streams to stop and drop every listener for the service.
    /// Safe when nothing was opened: the stop requests still go out.
    pub fn close(&mut self, registry: &mut ListenerRegistry, id: &ServiceId) -> Vec<OutboundEvent> {
        if let Some(sub) = self.open.remove(id) {
            for (event, lid) in sub.listeners {
                registry.off(&event, Some(lid));
            }
            debug!(service = %id, "closed subscriptions");
        }
        stream_requests(id, StreamCommand::Stop)
    }

    /// The server rejected one stream; the other keeps running
    pub fn mark_failed(&mut self, id: &str, kind: StreamKind) {
        if let Some(sub) = self.open.get_mut(id) {
            match kind {
                StreamKind::Logs => sub.logs = false,
                StreamKind::Stats => sub.stats = false,
            }
        }
    }

    pub fn is_subscribed(&self, id: &str) -> bool {
        self.open.contains_key(id)
    }

    pub fn is_streaming(&self, id: &str, kind: StreamKind) -> bool {
        self.open.get(id).is_some_and(|sub| match kind {
            StreamKind::Logs => sub.logs,
            StreamKind::Stats => sub.stats,
        })
    }

    pub fn subscribed_count(&self) -> usize {
        self.open.len()
    }
}

fn stream_requests(id: &ServiceId, command: StreamCommand) -> Vec<OutboundEvent> {
    StreamKind::ALL
        .into_iter()
        .map(|kind| OutboundEvent::Stream {
            id: id.clone(),
            kind,
            command,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_registers_four_listeners() {
        let mut reg = ListenerRegistry::new();
        let mut subs = SubscriptionManager::new();
        let reqs = subs.open(&mut reg, &"svc-1".to_string());

        assert_eq!(reqs.len(), 2);
        assert!(reqs.iter().all(|r| matches!(
            r,
            OutboundEvent::Stream { command: StreamCommand::Start, .. }
        )));
        assert_eq!(reg.total(), 4);
        assert!(subs.is_streaming("svc-1", StreamKind::Logs));
    }

    #[test]
    fn test_open_close_pairs_are_net_zero() {
        let mut reg = ListenerRegistry::new();
        let mut subs = SubscriptionManager::new();
        let id = "svc-1".to_string();

        subs.open(&mut reg, &id);
        subs.close(&mut reg, &id);
        subs.open(&mut reg, &id);
        subs.close(&mut reg, &id);

        assert_eq!(reg.total(), 0);
        assert_eq!(subs.subscribed_count(), 0);
    }

    #[test]
    fn test_double_open_does_not_double_register() {
        let mut reg = ListenerRegistry::new();
        let mut subs = SubscriptionManager::new();
        let id = "a".to_string();

        subs.open(&mut reg, &id);
        assert!(subs.open(&mut reg, &id).is_empty());
        assert_eq!(reg.count(LOG_MESSAGE), 1);
    }

    #[test]
    fn test_close_without_open_still_emits_stop() {
        let mut reg = ListenerRegistry::new();
        let mut subs = SubscriptionManager::new();
        let reqs = subs.close(&mut reg, &"never".to_string());

        assert_eq!(reqs.len(), 2);
        assert!(reqs.iter().all(|r| matches!(
            r,
            OutboundEvent::Stream { command: StreamCommand::Stop, .. }
        )));
    }

    #[test]
    fn test_mark_failed_only_affects_one_stream() {
        let mut reg = ListenerRegistry::new();
        let mut subs = SubscriptionManager::new();
        subs.open(&mut reg, &"a".to_string());
        subs.mark_failed("a", StreamKind::Stats);

        assert!(subs.is_streaming("a", StreamKind::Logs));
        assert!(!subs.is_streaming("a", StreamKind::Stats));
        assert!(subs.is_subscribed("a"));
    }
}
