use std::io;

use thiserror::Error;

use switchboard_core::errors::{ConfigError, TransportError};

#[derive(Debug, Error)]
pub enum CliError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("unknown service '{id}'. Available: {available}")]
    UnknownService { id: String, available: String },

    #[error("{0}")]
    Usage(String),

    #[error("{failed} of {total} command(s) failed")]
    CommandsFailed { failed: usize, total: usize },

    #[error("{service}: {message}")]
    Service { service: String, message: String },
}

pub type Result<T> = std::result::Result<T, CliError>;
