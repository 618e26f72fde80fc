//! Websocket transport: one connection for connectivity diagnostics and one
//! for the `/service` namespace carrying commands, acknowledgements, and the
//! live feeds. Frames are `{ "event": ..., "data": ... }` JSON envelopes.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use switchboard_core::errors::TransportError;
use switchboard_core::model::{CommandKind, ServiceId, StreamKind};
use switchboard_core::protocol::{
    OutboundEvent, StreamCommand, decode_envelope, decode_inbound, encode_envelope,
};
use switchboard_core::transport::{DiagnosticEvent, EventSink, Transport, TransportEvent};

#[cfg(feature = "http")]
use super::http::RestClient;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

pub const SERVICE_NAMESPACE: &str = "service";

pub struct SocketTransport {
    outbound: mpsc::UnboundedSender<String>,
    #[cfg(feature = "http")]
    rest: RestClient,
}

impl SocketTransport {
    /// Spawn both connection loops. Frames sent before the namespace is
    /// connected are held and flushed once it is.
    pub fn connect(base: Url, sink: EventSink) -> Result<Self, TransportError> {
        let default_url = socket_url(&base, None)?;
        let service_url = socket_url(&base, Some(SERVICE_NAMESPACE))?;
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(default_loop(default_url.to_string(), sink.clone()));
        tokio::spawn(service_loop(service_url.to_string(), outbound_rx, sink));

        Ok(Self {
            outbound,
            #[cfg(feature = "http")]
            rest: RestClient::new(base)?,
        })
    }

    fn emit(&self, event: &OutboundEvent) -> Result<(), TransportError> {
        let frame = encode_envelope(event)?;
        debug!(event = %event.name(), service = %event.service_id(), "emit");
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::Disconnected)
    }
}

/// Map an `http(s)://` server url onto the matching `ws(s)://` endpoint
pub fn socket_url(base: &Url, namespace: Option<&str>) -> Result<Url, TransportError> {
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::Connect {
                url: base.to_string(),
                message: format!("unsupported scheme '{}'", other),
            });
        }
    };

    let mut url = base.clone();
    let invalid = |_| TransportError::Connect {
        url: base.to_string(),
        message: "url cannot carry a websocket path".to_string(),
    };
    url.set_scheme(scheme).map_err(invalid)?;
    if let Some(ns) = namespace {
        url.path_segments_mut().map_err(invalid)?.pop_if_empty().push(ns);
    }
    Ok(url)
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

async fn default_loop(url: String, sink: EventSink) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        let mut ws = match connect_async(url.as_str()).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                let diag = DiagnosticEvent::ConnectError {
                    message: e.to_string(),
                };
                if sink.send(TransportEvent::Diagnostic(diag)).is_err() {
                    return;
                }
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff);
                continue;
            }
        };
        backoff = INITIAL_BACKOFF;
        info!(%url, "connected");
        if sink
            .send(TransportEvent::Diagnostic(DiagnosticEvent::Connected))
            .is_err()
        {
            return;
        }

        let reason = loop {
            match ws.next().await {
                Some(Ok(Message::Close(frame))) => {
                    break frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "server closed the connection".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break e.to_string(),
                None => break "connection lost".to_string(),
            }
        };
        let _ = ws.close(None).await;
        if sink
            .send(TransportEvent::Diagnostic(DiagnosticEvent::Disconnected { reason }))
            .is_err()
        {
            return;
        }
    }
}

async fn service_loop(
    url: String,
    mut outbound: mpsc::UnboundedReceiver<String>,
    sink: EventSink,
) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        if sink.is_closed() {
            return;
        }
        let ws = match connect_async(url.as_str()).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                debug!(%url, error = %e, "service namespace connect failed");
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff);
                continue;
            }
        };
        backoff = INITIAL_BACKOFF;
        let (mut write, mut read) = ws.split();

        loop {
            tokio::select! {
                frame = outbound.recv() => match frame {
                    Some(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            warn!(error = %e, "frame lost, reconnecting");
                            break;
                        }
                    }
                    None => {
                        let _ = write.close().await;
                        return;
                    }
                },
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if !forward(&text, &sink) {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
            }
        }
    }
}

/// Decode one frame and push it to the panel. Returns false once nobody is
/// listening anymore.
fn forward(text: &str, sink: &EventSink) -> bool {
    let decoded = decode_envelope(text).and_then(|env| decode_inbound(&env.event, env.data));
    match decoded {
        Ok(event) => sink.send(TransportEvent::Control(event)).is_ok(),
        Err(e) => {
            warn!(error = %e, "ignoring frame");
            true
        }
    }
}

#[async_trait]
impl Transport for SocketTransport {
    fn name(&self) -> &'static str {
        "socket"
    }

    async fn dispatch_command(&self, id: &ServiceId, kind: CommandKind) -> Result<(), TransportError> {
        self.emit(&OutboundEvent::Command {
            id: id.clone(),
            kind,
        })
    }

    async fn open_stream(&self, id: &ServiceId, kind: StreamKind) -> Result<(), TransportError> {
        self.emit(&OutboundEvent::Stream {
            id: id.clone(),
            kind,
            command: StreamCommand::Start,
        })
    }

    async fn close_stream(&self, id: &ServiceId, kind: StreamKind) -> Result<(), TransportError> {
        self.emit(&OutboundEvent::Stream {
            id: id.clone(),
            kind,
            command: StreamCommand::Stop,
        })
    }

    #[cfg(feature = "http")]
    async fn refresh_status(&self, id: &ServiceId) -> Result<bool, TransportError> {
        self.rest.is_running(id).await
    }

    #[cfg(not(feature = "http"))]
    async fn refresh_status(&self, _id: &ServiceId) -> Result<bool, TransportError> {
        Err(TransportError::Request(
            "status queries need the `http` feature".to_string(),
        ))
    }

    #[cfg(feature = "http")]
    async fn update_environment(
        &self,
        id: &ServiceId,
        vars: &BTreeMap<String, String>,
    ) -> Result<String, TransportError> {
        self.rest.update_environment(id, vars).await
    }

    #[cfg(not(feature = "http"))]
    async fn update_environment(
        &self,
        _id: &ServiceId,
        _vars: &BTreeMap<String, String>,
    ) -> Result<String, TransportError> {
        Err(TransportError::Request(
            "environment updates need the `http` feature".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::protocol::InboundEvent;
    use switchboard_core::transport::event_channel;

    #[test]
    fn test_socket_urls() {
        let base = Url::parse("http://panel.local:5000").unwrap();
        assert_eq!(socket_url(&base, None).unwrap().as_str(), "ws://panel.local:5000/");
        assert_eq!(
            socket_url(&base, Some(SERVICE_NAMESPACE)).unwrap().as_str(),
            "ws://panel.local:5000/service"
        );

        let tls = Url::parse("https://panel.example.com/").unwrap();
        assert_eq!(socket_url(&tls, None).unwrap().scheme(), "wss");

        let ftp = Url::parse("ftp://panel.local").unwrap();
        assert!(matches!(
            socket_url(&ftp, None),
            Err(TransportError::Connect { .. })
        ));
    }

    #[test]
    fn test_backoff_is_capped() {
        let mut b = INITIAL_BACKOFF;
        for _ in 0..10 {
            b = next_backoff(b);
        }
        assert_eq!(b, MAX_BACKOFF);
    }

    #[test]
    fn test_forward_decodes_frames() {
        let (sink, mut source) = event_channel();
        let frame = r#"{"event":"log_message","data":{"service_id":4,"log":"ready"}}"#;
        assert!(forward(frame, &sink));
        assert!(forward("not json", &sink));

        match source.try_recv() {
            Ok(TransportEvent::Control(InboundEvent::LogMessage { service_id, log })) => {
                assert_eq!(service_id, "4");
                assert_eq!(log, "ready");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(source.try_recv().is_err());
    }
}
