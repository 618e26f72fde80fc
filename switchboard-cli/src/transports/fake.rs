use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use switchboard_core::errors::TransportError;
use switchboard_core::model::{CommandKind, Service, ServiceId, ServiceStats, StreamKind};
use switchboard_core::protocol::InboundEvent;
use switchboard_core::transport::{DiagnosticEvent, EventSink, Transport, TransportEvent};

struct FakeService {
    name: String,
    running: bool,
    env: BTreeMap<String, String>,
}

#[derive(Default)]
struct FakeState {
    services: BTreeMap<ServiceId, FakeService>,
    streams: BTreeSet<(ServiceId, StreamKind)>,
    failing: BTreeMap<(ServiceId, CommandKind), String>,
    silent: BTreeSet<ServiceId>,
    no_streams: BTreeSet<ServiceId>,
    tick: u64,
}

/// Simulated control server living in the same process.
///
/// Commands are acknowledged after `ack_delay`; open streams produce a log
/// line and a stats sample on every ticker beat while the service runs.
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
    sink: EventSink,
    ack_delay: Duration,
}

impl FakeTransport {
    pub fn new(services: &[Service], sink: EventSink) -> Self {
        let services = services
            .iter()
            .map(|s| {
                (
                    s.id.clone(),
                    FakeService {
                        name: s.name.clone(),
                        running: s.is_running,
                        env: BTreeMap::new(),
                    },
                )
            })
            .collect();

        Self {
            state: Arc::new(Mutex::new(FakeState {
                services,
                ..FakeState::default()
            })),
            sink,
            ack_delay: Duration::from_millis(300),
        }
    }

    pub fn with_ack_delay(mut self, delay: Duration) -> Self {
        self.ack_delay = delay;
        self
    }

    /// Make every `kind` command for `id` fail with `error`
    pub async fn fail_command(&self, id: &str, kind: CommandKind, error: impl Into<String>) {
        self.state
            .lock()
            .await
            .failing
            .insert((id.to_string(), kind), error.into());
    }

    /// Swallow every command for `id` without acknowledging it
    pub async fn drop_acks(&self, id: &str) {
        self.state.lock().await.silent.insert(id.to_string());
    }

    /// Answer stream requests for `id` with `get_*_failed`
    pub async fn refuse_streams(&self, id: &str) {
        self.state.lock().await.no_streams.insert(id.to_string());
    }

    pub async fn is_streaming(&self, id: &str, kind: StreamKind) -> bool {
        self.state
            .lock()
            .await
            .streams
            .contains(&(id.to_string(), kind))
    }

    pub async fn environment(&self, id: &str) -> Option<BTreeMap<String, String>> {
        self.state.lock().await.services.get(id).map(|s| s.env.clone())
    }

    /// Report the default connection as up
    pub fn connect(&self) {
        let _ = self
            .sink
            .send(TransportEvent::Diagnostic(DiagnosticEvent::Connected));
    }

    /// Start pushing stream samples every `interval`. The task ends once the
    /// receiving side of the sink is gone.
    pub fn spawn_ticker(&self, interval: Duration) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let sink = self.sink.clone();

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tick.tick().await;
                let events = {
                    let mut state = state.lock().await;
                    state.tick += 1;
                    sample(&state)
                };
                for event in events {
                    if sink.send(TransportEvent::Control(event)).is_err() {
                        return;
                    }
                }
            }
        })
    }

    fn emit_later(&self, event: InboundEvent, running_after: Option<bool>) {
        let state = Arc::clone(&self.state);
        let sink = self.sink.clone();
        let delay = self.ack_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(running) = running_after {
                if let Some(svc) = state.lock().await.services.get_mut(event.service_id()) {
                    svc.running = running;
                }
            }
            let _ = sink.send(TransportEvent::Control(event));
        });
    }
}

fn sample(state: &FakeState) -> Vec<InboundEvent> {
    let n = state.tick;
    state
        .streams
        .iter()
        .filter(|(id, _)| state.services.get(id).is_some_and(|s| s.running))
        .map(|(id, kind)| match kind {
            StreamKind::Logs => {
                let name = state.services.get(id).map(|s| s.name.as_str()).unwrap_or(id.as_str());
                let log = if n % 12 == 7 {
                    format!("[WARN] {}: slow response from upstream (450ms)", name)
                } else {
                    let routes = [
                        "GET /health 200",
                        "GET /api/status 200",
                        "POST /api/data 201",
                        "GET / 304",
                    ];
                    format!("{} {}", name, routes[(n as usize) % routes.len()])
                };
                InboundEvent::LogMessage {
                    service_id: id.clone(),
                    log,
                }
            }
            StreamKind::Stats => {
                let wobble = (n % 10) as f64;
                InboundEvent::StatsMessage {
                    service_id: id.clone(),
                    stats: ServiceStats {
                        cpu_usage: 5.0 + wobble * 1.5,
                        memory_usage: 20.0 + (n % 20) as f64,
                        disk_usage: 41.0,
                    },
                }
            }
        })
        .collect()
}

#[async_trait]
impl Transport for FakeTransport {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn dispatch_command(&self, id: &ServiceId, kind: CommandKind) -> Result<(), TransportError> {
        let state = self.state.lock().await;
        if state.silent.contains(id) {
            debug!(service = %id, %kind, "dropping command acknowledgement");
            return Ok(());
        }

        let event = if !state.services.contains_key(id) {
            InboundEvent::CommandFailed {
                service_id: id.clone(),
                kind,
                message: "Service not found".into(),
                error: Some(format!("Service not found for service_id={}", id)),
            }
        } else if let Some(error) = state.failing.get(&(id.clone(), kind)) {
            InboundEvent::CommandFailed {
                service_id: id.clone(),
                kind,
                message: format!("Error {} service", kind.progressive().to_lowercase()),
                error: Some(error.clone()),
            }
        } else {
            InboundEvent::CommandSucceeded {
                service_id: id.clone(),
                kind,
                message: format!("Service {} successfully", kind.past()),
            }
        };
        drop(state);

        let running_after = matches!(event, InboundEvent::CommandSucceeded { .. })
            .then(|| kind.running_after());
        self.emit_later(event, running_after);
        Ok(())
    }

    async fn open_stream(&self, id: &ServiceId, kind: StreamKind) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if state.no_streams.contains(id) {
            let event = InboundEvent::StreamFailed {
                service_id: id.clone(),
                kind,
                message: format!("Error streaming {}; is the service running?", kind),
                error: Some(format!("Error streaming {}", kind)),
            };
            let _ = self.sink.send(TransportEvent::Control(event));
            return Ok(());
        }
        state.streams.insert((id.clone(), kind));
        Ok(())
    }

    async fn close_stream(&self, id: &ServiceId, kind: StreamKind) -> Result<(), TransportError> {
        self.state.lock().await.streams.remove(&(id.clone(), kind));
        Ok(())
    }

    async fn refresh_status(&self, id: &ServiceId) -> Result<bool, TransportError> {
        self.state
            .lock()
            .await
            .services
            .get(id)
            .map(|s| s.running)
            .ok_or_else(|| TransportError::Request(format!("service {} not found", id)))
    }

    async fn update_environment(
        &self,
        id: &ServiceId,
        vars: &BTreeMap<String, String>,
    ) -> Result<String, TransportError> {
        let mut state = self.state.lock().await;
        let svc = state
            .services
            .get_mut(id)
            .ok_or_else(|| TransportError::Request(format!("service {} not found", id)))?;
        svc.env.extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(format!("Environment variables updated for {}", svc.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::transport::{EventSource, event_channel};

    fn transport() -> (FakeTransport, EventSource) {
        let (sink, source) = event_channel();
        let services = vec![
            Service::new("api").with_name("API"),
            Service::new("db").with_name("Postgres").with_running(true),
        ];
        let fake = FakeTransport::new(&services, sink).with_ack_delay(Duration::from_millis(5));
        (fake, source)
    }

    async fn next_control(source: &mut EventSource) -> InboundEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), source.recv())
                .await
                .expect("timed out waiting for event")
                .expect("sink closed");
            if let TransportEvent::Control(ev) = event {
                return ev;
            }
        }
    }

    #[tokio::test]
    async fn test_start_is_acknowledged() {
        let (fake, mut source) = transport();
        fake.dispatch_command(&"api".to_string(), CommandKind::Start)
            .await
            .unwrap();

        let ev = next_control(&mut source).await;
        assert!(matches!(
            ev,
            InboundEvent::CommandSucceeded { ref service_id, kind: CommandKind::Start, .. } if service_id == "api"
        ));
        assert!(fake.refresh_status(&"api".to_string()).await.unwrap());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let (fake, mut source) = transport();
        fake.fail_command("db", CommandKind::Stop, "container is wedged")
            .await;
        fake.dispatch_command(&"db".to_string(), CommandKind::Stop)
            .await
            .unwrap();

        match next_control(&mut source).await {
            InboundEvent::CommandFailed { message, error, .. } => {
                assert_eq!(message, "Error stopping service");
                assert_eq!(error.as_deref(), Some("container is wedged"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(fake.refresh_status(&"db".to_string()).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_service_fails() {
        let (fake, mut source) = transport();
        fake.dispatch_command(&"ghost".to_string(), CommandKind::Start)
            .await
            .unwrap();
        assert!(matches!(
            next_control(&mut source).await,
            InboundEvent::CommandFailed { .. }
        ));
    }

    #[tokio::test]
    async fn test_dropped_ack_sends_nothing() {
        let (fake, mut source) = transport();
        fake.drop_acks("api").await;
        fake.dispatch_command(&"api".to_string(), CommandKind::Start)
            .await
            .unwrap();

        let waited = tokio::time::timeout(Duration::from_millis(50), source.recv()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_streams_tick_while_open() {
        let (fake, mut source) = transport();
        let db = "db".to_string();
        fake.open_stream(&db, StreamKind::Logs).await.unwrap();
        fake.open_stream(&db, StreamKind::Stats).await.unwrap();
        let ticker = fake.spawn_ticker(Duration::from_millis(5));

        let mut saw_log = false;
        let mut saw_stats = false;
        while !(saw_log && saw_stats) {
            match next_control(&mut source).await {
                InboundEvent::LogMessage { service_id, .. } => {
                    assert_eq!(service_id, "db");
                    saw_log = true;
                }
                InboundEvent::StatsMessage { service_id, .. } => {
                    assert_eq!(service_id, "db");
                    saw_stats = true;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }

        fake.close_stream(&db, StreamKind::Logs).await.unwrap();
        assert!(!fake.is_streaming("db", StreamKind::Logs).await);
        assert!(fake.is_streaming("db", StreamKind::Stats).await);
        ticker.abort();
    }

    #[tokio::test]
    async fn test_refused_stream_answers_failed() {
        let (fake, mut source) = transport();
        fake.refuse_streams("db").await;
        fake.open_stream(&"db".to_string(), StreamKind::Stats)
            .await
            .unwrap();

        match next_control(&mut source).await {
            InboundEvent::StreamFailed { kind, message, .. } => {
                assert_eq!(kind, StreamKind::Stats);
                assert_eq!(message, "Error streaming stats; is the service running?");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(!fake.is_streaming("db", StreamKind::Stats).await);
    }

    #[tokio::test]
    async fn test_update_environment() {
        let (fake, _source) = transport();
        let vars = BTreeMap::from([("API_PORT".to_string(), "8080".to_string())]);
        let message = fake
            .update_environment(&"api".to_string(), &vars)
            .await
            .unwrap();
        assert_eq!(message, "Environment variables updated for API");
        assert_eq!(fake.environment("api").await, Some(vars));
    }
}
