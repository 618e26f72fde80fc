mod fake;
#[cfg(feature = "http")]
mod http;
#[cfg(feature = "socket")]
mod socket;

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use switchboard_core::config::TransportKind;
use switchboard_core::errors::TransportError;
use switchboard_core::model::Service;
use switchboard_core::transport::{EventSink, Transport};

pub use fake::FakeTransport;
#[cfg(feature = "http")]
pub use http::HttpTransport;
#[cfg(feature = "socket")]
pub use socket::SocketTransport;

const FAKE_TICK: Duration = Duration::from_millis(600);

/// Everything needed to bring a transport up
pub struct TransportSpec {
    pub kind: TransportKind,
    pub url: Option<Url>,
    pub poll_interval: Duration,
    /// Upper bound for a command round trip on request/response transports
    pub command_timeout: Duration,
}

/// Construct the configured transport and start its background tasks
pub fn connect(
    spec: &TransportSpec,
    services: &[Service],
    sink: EventSink,
) -> Result<Arc<dyn Transport>, TransportError> {
    match spec.kind {
        TransportKind::Fake => {
            let fake = FakeTransport::new(services, sink);
            fake.connect();
            fake.spawn_ticker(FAKE_TICK);
            Ok(Arc::new(fake))
        }
        TransportKind::Socket => connect_socket(spec, sink),
        TransportKind::Http => connect_http(spec, services, sink),
    }
}

fn require_url(spec: &TransportSpec) -> Result<Url, TransportError> {
    spec.url.clone().ok_or_else(|| TransportError::Connect {
        url: String::new(),
        message: format!("the {} transport needs a server url", spec.kind),
    })
}

#[cfg(feature = "socket")]
fn connect_socket(spec: &TransportSpec, sink: EventSink) -> Result<Arc<dyn Transport>, TransportError> {
    let url = require_url(spec)?;
    Ok(Arc::new(SocketTransport::connect(url, sink)?))
}

#[cfg(not(feature = "socket"))]
fn connect_socket(spec: &TransportSpec, _sink: EventSink) -> Result<Arc<dyn Transport>, TransportError> {
    Err(TransportError::Connect {
        url: require_url(spec)?.to_string(),
        message: "built without the `socket` feature".to_string(),
    })
}

#[cfg(feature = "http")]
fn connect_http(
    spec: &TransportSpec,
    services: &[Service],
    sink: EventSink,
) -> Result<Arc<dyn Transport>, TransportError> {
    let http = HttpTransport::new(require_url(spec)?, sink, spec.command_timeout)?;
    http.spawn_poller(
        services.iter().map(|s| s.id.clone()).collect(),
        spec.poll_interval,
    );
    Ok(Arc::new(http))
}

#[cfg(not(feature = "http"))]
fn connect_http(
    spec: &TransportSpec,
    _services: &[Service],
    _sink: EventSink,
) -> Result<Arc<dyn Transport>, TransportError> {
    Err(TransportError::Connect {
        url: require_url(spec)?.to_string(),
        message: "built without the `http` feature".to_string(),
    })
}
