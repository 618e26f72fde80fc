//! Request/response transport over the server's REST endpoints.
//!
//! Commands are plain POSTs; their responses are turned into the same
//! `service_*` events the socket would push, so the panel cannot tell the
//! difference. There is no push channel: running state comes from a poller
//! and live log/stats feeds are refused with `get_*_failed`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use switchboard_core::errors::TransportError;
use switchboard_core::model::{CommandKind, ServiceId, StreamKind};
use switchboard_core::protocol::InboundEvent;
use switchboard_core::transport::{DiagnosticEvent, EventSink, Transport, TransportEvent};

/// Applies to status and environment requests only. A command POST may
/// take as long as the container needs, up to the command timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default, Deserialize)]
struct MessageBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    is_running: bool,
}

fn failure_message(kind: CommandKind) -> String {
    format!("Error {} service", kind.progressive().to_lowercase())
}

/// Thin client for the REST endpoints, shared with the socket transport
#[derive(Clone, Debug)]
pub struct RestClient {
    client: reqwest::Client,
    base: Url,
    command_timeout: Option<Duration>,
}

impl RestClient {
    pub fn new(base: Url) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self {
            client,
            base,
            command_timeout: None,
        })
    }

    /// Give up on a command POST after `timeout`. By then the panel has
    /// already expired the command, so the late failure is dropped there.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| TransportError::Request(format!("{} cannot be a base url", self.base)))?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    /// POST the command and translate the answer into the matching event
    pub async fn command(&self, id: &ServiceId, kind: CommandKind) -> Result<InboundEvent, TransportError> {
        let url = self.endpoint(&["service", id.as_str(), kind.verb()])?;
        debug!(%url, "posting command");

        let mut request = self.client.post(url);
        if let Some(timeout) = self.command_timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await.map_err(|e| TransportError::Command {
            id: id.clone(),
            kind,
            message: e.to_string(),
        })?;

        let status = response.status();
        let body: MessageBody = response.json().await.unwrap_or_default();

        if status.is_success() {
            Ok(InboundEvent::CommandSucceeded {
                service_id: id.clone(),
                kind,
                message: body.message,
            })
        } else {
            let message = if body.message.is_empty() {
                failure_message(kind)
            } else {
                body.message
            };
            let error = match body.error {
                None | Some(serde_json::Value::Null) => Some(format!("HTTP {}", status)),
                Some(serde_json::Value::String(s)) => Some(s),
                Some(other) => Some(other.to_string()),
            };
            Ok(InboundEvent::CommandFailed {
                service_id: id.clone(),
                kind,
                message,
                error,
            })
        }
    }

    pub async fn is_running(&self, id: &ServiceId) -> Result<bool, TransportError> {
        let url = self.endpoint(&["service", id.as_str(), "is_running"])?;
        let body: StatusBody = self
            .client
            .get(url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| TransportError::Request(e.to_string()))?
            .json()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(body.is_running)
    }

    /// Returns the server's message; on a rejected update the message
    /// becomes the error.
    pub async fn update_environment(
        &self,
        id: &ServiceId,
        vars: &BTreeMap<String, String>,
    ) -> Result<String, TransportError> {
        let url = self.endpoint(&["update-environment-vars", id.as_str()])?;
        let response = self
            .client
            .post(url)
            .timeout(REQUEST_TIMEOUT)
            .form(vars)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status();
        let body = response.json::<MessageBody>().await;
        match body {
            Ok(body) if status.is_success() => Ok(body.message),
            Err(e) if status.is_success() => Err(TransportError::Request(e.to_string())),
            Ok(body) if !body.message.is_empty() => Err(TransportError::Request(body.message)),
            _ => Err(TransportError::Request(format!("HTTP {}", status))),
        }
    }
}

pub struct HttpTransport {
    rest: RestClient,
    sink: EventSink,
}

impl HttpTransport {
    pub fn new(base: Url, sink: EventSink, command_timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self {
            rest: RestClient::new(base)?.with_command_timeout(command_timeout),
            sink,
        })
    }

    fn push(&self, event: InboundEvent) {
        let _ = self.sink.send(TransportEvent::Control(event));
    }

    /// Poll `is_running` for every service. Reachability changes are
    /// reported as diagnostics, state as `service_status` events.
    pub fn spawn_poller(&self, ids: Vec<ServiceId>, interval: Duration) -> JoinHandle<()> {
        let rest = self.rest.clone();
        let sink = self.sink.clone();

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut reachable: Option<bool> = None;

            loop {
                tick.tick().await;
                let mut failure = None;
                for id in &ids {
                    match rest.is_running(id).await {
                        Ok(is_running) => {
                            let event = InboundEvent::ServiceStatus {
                                service_id: id.clone(),
                                is_running,
                            };
                            if sink.send(TransportEvent::Control(event)).is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            debug!(service = %id, error = %e, "status poll failed");
                            failure = Some(e.to_string());
                        }
                    }
                }

                let diagnostic = match (reachable, failure) {
                    (Some(true), None) => None,
                    (_, None) => {
                        reachable = Some(true);
                        Some(DiagnosticEvent::Connected)
                    }
                    (Some(true), Some(reason)) => {
                        reachable = Some(false);
                        Some(DiagnosticEvent::Disconnected { reason })
                    }
                    (None, Some(message)) => {
                        reachable = Some(false);
                        Some(DiagnosticEvent::ConnectError { message })
                    }
                    (Some(false), Some(_)) => None,
                };
                if let Some(diag) = diagnostic {
                    if sink.send(TransportEvent::Diagnostic(diag)).is_err() {
                        return;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    /// Returns as soon as the POST is under way; its answer, or the reason
    /// there was none, arrives later as a `service_*` event.
    async fn dispatch_command(&self, id: &ServiceId, kind: CommandKind) -> Result<(), TransportError> {
        let rest = self.rest.clone();
        let sink = self.sink.clone();
        let id = id.clone();

        tokio::spawn(async move {
            let event = rest.command(&id, kind).await.unwrap_or_else(|e| {
                warn!(service = %id, %kind, error = %e, "command request failed");
                InboundEvent::CommandFailed {
                    service_id: id.clone(),
                    kind,
                    message: failure_message(kind),
                    error: Some(e.to_string()),
                }
            });
            let _ = sink.send(TransportEvent::Control(event));
        });
        Ok(())
    }

    async fn open_stream(&self, id: &ServiceId, kind: StreamKind) -> Result<(), TransportError> {
        let reason = TransportError::StreamUnsupported {
            id: id.clone(),
            kind,
            transport: self.name(),
        };
        warn!(error = %reason, "refusing stream");
        self.push(InboundEvent::StreamFailed {
            service_id: id.clone(),
            kind,
            message: format!("Live {} are not available in polling mode", kind),
            error: Some(reason.to_string()),
        });
        Ok(())
    }

    async fn close_stream(&self, _id: &ServiceId, _kind: StreamKind) -> Result<(), TransportError> {
        Ok(())
    }

    async fn refresh_status(&self, id: &ServiceId) -> Result<bool, TransportError> {
        self.rest.is_running(id).await
    }

    async fn update_environment(
        &self,
        id: &ServiceId,
        vars: &BTreeMap<String, String>,
    ) -> Result<String, TransportError> {
        self.rest.update_environment(id, vars).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use switchboard_core::transport::{EventSource, event_channel};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer a single request with `status` and a JSON `body` after
    /// `delay`. The handle resolves to the request line received.
    async fn serve_once(
        status: &'static str,
        body: &'static str,
        delay: Duration,
    ) -> (Url, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            let head_end = loop {
                let n = stream.read(&mut buf).await.unwrap();
                assert!(n > 0, "connection closed before the request head");
                request.extend_from_slice(&buf[..n]);
                if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let head = String::from_utf8_lossy(&request[..head_end]).to_string();
            let length = head
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while request.len() < head_end + length {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }

            tokio::time::sleep(delay).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = stream.shutdown().await;
            head.lines().next().unwrap_or_default().to_string()
        });

        (Url::parse(&format!("http://{}", addr)).unwrap(), handle)
    }

    async fn next_control(source: &mut EventSource) -> InboundEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), source.recv())
                .await
                .expect("timed out waiting for event")
                .expect("sink closed");
            if let TransportEvent::Control(ev) = event {
                return ev;
            }
        }
    }

    #[test]
    fn test_endpoint_paths() {
        let rest = RestClient::new(Url::parse("http://panel.local:5000").unwrap()).unwrap();
        assert_eq!(
            rest.endpoint(&["service", "7", "restart"]).unwrap().as_str(),
            "http://panel.local:5000/service/7/restart"
        );

        let nested = RestClient::new(Url::parse("http://panel.local/api/").unwrap()).unwrap();
        assert_eq!(
            nested
                .endpoint(&["update-environment-vars", "my svc"])
                .unwrap()
                .as_str(),
            "http://panel.local/api/update-environment-vars/my%20svc"
        );
    }

    #[tokio::test]
    async fn test_command_success_becomes_ack() {
        let (base, server) = serve_once(
            "200 OK",
            r#"{"message":"Service started successfully"}"#,
            Duration::ZERO,
        )
        .await;
        let rest = RestClient::new(base).unwrap();

        let event = rest.command(&"4".to_string(), CommandKind::Start).await.unwrap();
        assert_eq!(
            event,
            InboundEvent::CommandSucceeded {
                service_id: "4".into(),
                kind: CommandKind::Start,
                message: "Service started successfully".into(),
            }
        );
        assert!(server.await.unwrap().starts_with("POST /service/4/start "));
    }

    #[tokio::test]
    async fn test_command_rejection_becomes_failure() {
        let (base, _server) = serve_once(
            "400 Bad Request",
            r#"{"message":"Service not found","error":"no service with id 4"}"#,
            Duration::ZERO,
        )
        .await;
        let rest = RestClient::new(base).unwrap();

        match rest.command(&"4".to_string(), CommandKind::Restart).await.unwrap() {
            InboundEvent::CommandFailed { kind, message, error, .. } => {
                assert_eq!(kind, CommandKind::Restart);
                assert_eq!(message, "Service not found");
                assert_eq!(error.as_deref(), Some("no service with id 4"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_command_failure_without_message() {
        let (base, _server) = serve_once(
            "500 Internal Server Error",
            r#"{"error":"image not found"}"#,
            Duration::ZERO,
        )
        .await;
        let rest = RestClient::new(base).unwrap();

        match rest.command(&"4".to_string(), CommandKind::Start).await.unwrap() {
            InboundEvent::CommandFailed { message, error, .. } => {
                assert_eq!(message, "Error starting service");
                assert_eq!(error.as_deref(), Some("image not found"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_is_running_parses_status() {
        let (base, server) = serve_once("200 OK", r#"{"is_running":true}"#, Duration::ZERO).await;
        let rest = RestClient::new(base).unwrap();

        assert!(rest.is_running(&"4".to_string()).await.unwrap());
        assert!(server.await.unwrap().starts_with("GET /service/4/is_running "));
    }

    #[tokio::test]
    async fn test_environment_update_messages() {
        let vars = BTreeMap::from([("WEB_PORT".to_string(), "8080".to_string())]);

        let (base, server) = serve_once(
            "200 OK",
            r#"{"message":"Environment variables updated"}"#,
            Duration::ZERO,
        )
        .await;
        let rest = RestClient::new(base).unwrap();
        let message = rest.update_environment(&"4".to_string(), &vars).await.unwrap();
        assert_eq!(message, "Environment variables updated");
        assert!(
            server
                .await
                .unwrap()
                .starts_with("POST /update-environment-vars/4 ")
        );

        let (base, _server) = serve_once(
            "422 Unprocessable Entity",
            r#"{"message":"Invalid variable name"}"#,
            Duration::ZERO,
        )
        .await;
        let rest = RestClient::new(base).unwrap();
        let err = rest
            .update_environment(&"4".to_string(), &vars)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid variable name"));
    }

    #[tokio::test]
    async fn test_dispatch_does_not_wait_for_the_answer() {
        let (base, _server) = serve_once(
            "200 OK",
            r#"{"message":"Service started successfully"}"#,
            Duration::from_millis(500),
        )
        .await;
        let (sink, mut source) = event_channel();
        let http = HttpTransport::new(base, sink, Duration::from_secs(30)).unwrap();

        let sent = Instant::now();
        http.dispatch_command(&"4".to_string(), CommandKind::Start)
            .await
            .unwrap();
        assert!(sent.elapsed() < Duration::from_millis(250));

        assert!(matches!(
            next_control(&mut source).await,
            InboundEvent::CommandSucceeded { kind: CommandKind::Start, .. }
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_a_command_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (sink, mut source) = event_channel();
        let base = Url::parse(&format!("http://{}", addr)).unwrap();
        let http = HttpTransport::new(base, sink, Duration::from_secs(30)).unwrap();

        http.dispatch_command(&"4".to_string(), CommandKind::Stop)
            .await
            .unwrap();
        match next_control(&mut source).await {
            InboundEvent::CommandFailed { kind, message, error, .. } => {
                assert_eq!(kind, CommandKind::Stop);
                assert_eq!(message, "Error stopping service");
                assert!(error.is_some());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_streams_are_refused() {
        let (sink, mut source) = event_channel();
        let base = Url::parse("http://127.0.0.1:9").unwrap();
        let http = HttpTransport::new(base, sink, Duration::from_secs(30)).unwrap();
        http.open_stream(&"3".to_string(), StreamKind::Logs)
            .await
            .unwrap();

        match source.recv().await {
            Some(TransportEvent::Control(InboundEvent::StreamFailed { service_id, kind, .. })) => {
                assert_eq!(service_id, "3");
                assert_eq!(kind, StreamKind::Logs);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
