use std::path::PathBuf;

use thiserror::Error;

use crate::model::{CommandKind, ServiceId, StreamKind};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    #[error("failed to decode '{event}' payload: {source}")]
    Decode {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("'{event}' payload is missing '{field}'")]
    MissingField { event: String, field: &'static str },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is disconnected")]
    Disconnected,

    #[error("failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("failed to {kind} service {id}: {message}")]
    Command {
        id: ServiceId,
        kind: CommandKind,
        message: String,
    },

    #[error("{kind} streaming for service {id} is not supported by the {transport} transport")]
    StreamUnsupported {
        id: ServiceId,
        kind: StreamKind,
        transport: &'static str,
    },

    #[error("request failed: {0}")]
    Request(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("no services defined")]
    NoServices,

    #[error("server url is required for the {transport} transport")]
    MissingUrl { transport: String },

    #[error("command timeout must be greater than zero")]
    ZeroTimeout,

    #[error("service '{service}' has an invalid launch url '{url}'")]
    InvalidLaunchUrl { service: String, url: String },

    #[error("no config file found, searched: {searched:?}")]
    NotFound { searched: Vec<PathBuf> },
}
