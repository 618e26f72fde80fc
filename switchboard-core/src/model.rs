use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical service identifier. Numeric ids from the wire are normalized
/// to their decimal form in `protocol` before reaching anything else.
pub type ServiceId = String;

/// A lifecycle command the panel can issue for one service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Start,
    Stop,
    Restart,
}

impl CommandKind {
    pub const ALL: [CommandKind; 3] = [CommandKind::Start, CommandKind::Stop, CommandKind::Restart];

    /// Verb used in event names and HTTP paths
    pub fn verb(self) -> &'static str {
        match self {
            CommandKind::Start => "start",
            CommandKind::Stop => "stop",
            CommandKind::Restart => "restart",
        }
    }

    /// Label shown on the loading control while the command is in flight
    pub fn progressive(self) -> &'static str {
        match self {
            CommandKind::Start => "Starting",
            CommandKind::Stop => "Stopping",
            CommandKind::Restart => "Restarting",
        }
    }

    pub fn past(self) -> &'static str {
        match self {
            CommandKind::Start => "started",
            CommandKind::Stop => "stopped",
            CommandKind::Restart => "restarted",
        }
    }

    /// Running state the backend is in once this command succeeded
    pub fn running_after(self) -> bool {
        !matches!(self, CommandKind::Stop)
    }

    pub fn from_verb(verb: &str) -> Option<Self> {
        match verb {
            "start" => Some(CommandKind::Start),
            "stop" => Some(CommandKind::Stop),
            "restart" => Some(CommandKind::Restart),
            _ => None,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// One of the two live feeds a detail view subscribes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StreamKind {
    Logs,
    Stats,
}

impl StreamKind {
    pub const ALL: [StreamKind; 2] = [StreamKind::Logs, StreamKind::Stats];
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Logs => f.write_str("logs"),
            StreamKind::Stats => f.write_str("stats"),
        }
    }
}

/// Resource usage sample for a service, all values in percent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceStats {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub disk_usage: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Service {
    pub id: ServiceId,
    pub name: String,
    pub description: Option<String>,
    /// Only trustworthy after a server acknowledgement or status refresh
    pub is_running: bool,
    /// Browsable endpoint, if the service exposes one
    pub launch_url: Option<String>,
}

impl Service {
    pub fn new(id: impl Into<ServiceId>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: None,
            is_running: false,
            launch_url: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_launch_url(mut self, url: impl Into<String>) -> Self {
        self.launch_url = Some(url.into());
        self
    }

    pub fn with_running(mut self, is_running: bool) -> Self {
        self.is_running = is_running;
        self
    }
}

/// Derive a launch URL from environment variables: a key ending in `_DOMAIN`
/// and an optional key ending in `_PORT`.
pub fn launch_url_from_env(env: &BTreeMap<String, String>) -> Option<String> {
    let mut domain = None;
    let mut port = None;
    for (key, value) in env {
        if key.ends_with("_DOMAIN") {
            domain = Some(value.as_str());
        } else if key.ends_with("_PORT") {
            port = Some(value.as_str());
        }
    }

    match (domain, port) {
        (Some(d), Some(p)) => Some(format!("http://{}:{}", d, p)),
        (Some(d), None) => Some(format!("http://{}", d)),
        _ => None,
    }
}
