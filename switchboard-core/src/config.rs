use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

pub use crate::errors::ConfigError;
use crate::model::{Service, launch_url_from_env};
use crate::panel::PanelSettings;
use crate::toast::ToastTiming;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "SWITCHBOARD_CONFIG";

/// File names looked for in each directory, in order of preference
pub const CONFIG_FILE_NAMES: [&str; 4] = [
    "switchboard.yml",
    "switchboard.yaml",
    ".switchboard.yml",
    ".switchboard.yaml",
];

/// Which transport carries requests to the server
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Websocket push (live logs and stats)
    #[default]
    Socket,
    /// Request/response with status polling
    Http,
    /// In-process simulated backend
    Fake,
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "socket" => Ok(TransportKind::Socket),
            "http" => Ok(TransportKind::Http),
            "fake" => Ok(TransportKind::Fake),
            other => Err(format!("unknown transport '{}' (socket, http, fake)", other)),
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Socket => f.write_str("socket"),
            TransportKind::Http => f.write_str("http"),
            TransportKind::Fake => f.write_str("fake"),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Base URL of the control server
    #[serde(default)]
    pub url: Option<Url>,

    #[serde(default)]
    pub transport: TransportKind,

    /// Status polling interval for the HTTP transport
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: None,
            transport: TransportKind::default(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

fn default_poll_interval() -> u64 {
    5000
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TimingConfig {
    /// How long a command may wait for its acknowledgement
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_fade_in")]
    pub toast_fade_in_ms: u64,
    #[serde(default = "default_toast_visible")]
    pub toast_visible_ms: u64,
    #[serde(default = "default_fade_out")]
    pub toast_fade_out_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: default_command_timeout(),
            toast_fade_in_ms: default_fade_in(),
            toast_visible_ms: default_toast_visible(),
            toast_fade_out_ms: default_fade_out(),
        }
    }
}

fn default_command_timeout() -> u64 {
    30_000
}
fn default_fade_in() -> u64 {
    10
}
fn default_toast_visible() -> u64 {
    3000
}
fn default_fade_out() -> u64 {
    500
}

/// Service definition in the config file
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Display name (defaults to service id)
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Browsable endpoint; derived from `*_DOMAIN`/`*_PORT` env vars if absent
    #[serde(default)]
    pub launch_url: Option<String>,

    /// Environment variables as last known to the panel
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Root configuration file structure
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SwitchboardConfig {
    /// Config file version
    #[serde(default = "default_version")]
    pub version: String,

    /// Panel title
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub timing: TimingConfig,

    /// Service definitions, keyed by service id
    pub services: BTreeMap<String, ServiceConfig>,
}

fn default_version() -> String {
    "1".into()
}

impl SwitchboardConfig {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a string (useful for testing)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: SwitchboardConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Find the config file: `$SWITCHBOARD_CONFIG` if it names a file,
    /// otherwise the first of [`CONFIG_FILE_NAMES`] in `start_dir` or one of
    /// its ancestors.
    pub fn discover(start_dir: &Path) -> Result<(PathBuf, Self), ConfigError> {
        let explicit = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let candidates: Vec<PathBuf> = explicit
            .into_iter()
            .chain(start_dir.ancestors().flat_map(|dir| {
                CONFIG_FILE_NAMES.iter().map(move |name| dir.join(name))
            }))
            .collect();

        let found = candidates.iter().find(|path| path.is_file()).cloned();
        match found {
            Some(path) => {
                let config = Self::load(&path)?;
                Ok((path, config))
            }
            None => Err(ConfigError::NotFound {
                searched: candidates,
            }),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.services.is_empty() {
            return Err(ConfigError::NoServices);
        }
        if self.server.transport != TransportKind::Fake && self.server.url.is_none() {
            return Err(ConfigError::MissingUrl {
                transport: self.server.transport.to_string(),
            });
        }
        if self.timing.command_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        for (id, svc) in &self.services {
            if let Some(url) = &svc.launch_url {
                if Url::parse(url).is_err() {
                    return Err(ConfigError::InvalidLaunchUrl {
                        service: id.clone(),
                        url: url.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn project_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Services as the panel first renders them: not running until the
    /// server says otherwise.
    pub fn to_services(&self) -> Vec<Service> {
        self.services
            .iter()
            .map(|(id, cfg)| Service {
                id: id.clone(),
                name: cfg.name.clone().unwrap_or_else(|| id.clone()),
                description: cfg.description.clone(),
                is_running: false,
                launch_url: cfg
                    .launch_url
                    .clone()
                    .or_else(|| launch_url_from_env(&cfg.env)),
            })
            .collect()
    }

    pub fn panel_settings(&self) -> PanelSettings {
        PanelSettings {
            command_timeout: Duration::from_millis(self.timing.command_timeout_ms),
            toast: ToastTiming {
                fade_in: Duration::from_millis(self.timing.toast_fade_in_ms),
                visible: Duration::from_millis(self.timing.toast_visible_ms),
                fade_out: Duration::from_millis(self.timing.toast_fade_out_ms),
            },
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.server.poll_interval_ms.max(100))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_config() {
        let yaml = r#"
version: "1"
name: homelab
server:
  url: http://localhost:5000
services:
  "1":
    name: Gitea
    env:
      GITEA_DOMAIN: git.local
      GITEA_PORT: "3000"
  "2":
    name: Postgres
"#;
        let config = SwitchboardConfig::from_str(yaml).unwrap();
        assert_eq!(config.project_name(), Some("homelab"));
        assert_eq!(config.server.transport, TransportKind::Socket);

        let services = config.to_services();
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].name, "Gitea");
        assert_eq!(services[0].launch_url.as_deref(), Some("http://git.local:3000"));
        assert_eq!(services[1].launch_url, None);
        assert!(services.iter().all(|s| !s.is_running));
    }

    #[test]
    fn test_timing_defaults() {
        let yaml = r#"
server:
  transport: fake
services:
  api: {}
"#;
        let config = SwitchboardConfig::from_str(yaml).unwrap();
        let settings = config.panel_settings();
        assert_eq!(settings.command_timeout, Duration::from_secs(30));
        assert_eq!(settings.toast, ToastTiming::default());
    }

    #[test]
    fn test_url_required_for_network_transports() {
        let yaml = r#"
server:
  transport: http
services:
  api: {}
"#;
        let result = SwitchboardConfig::from_str(yaml);
        assert!(matches!(result, Err(ConfigError::MissingUrl { .. })));
    }

    #[test]
    fn test_rejects_empty_and_zero_timeout() {
        let empty = "server: { transport: fake }\nservices: {}\n";
        assert!(matches!(
            SwitchboardConfig::from_str(empty),
            Err(ConfigError::NoServices)
        ));

        let zero = r#"
server: { transport: fake }
timing: { command_timeout_ms: 0 }
services:
  api: {}
"#;
        assert!(matches!(
            SwitchboardConfig::from_str(zero),
            Err(ConfigError::ZeroTimeout)
        ));
    }

    #[test]
    fn test_invalid_launch_url() {
        let yaml = r#"
server: { transport: fake }
services:
  api:
    launch_url: "not a url"
"#;
        assert!(matches!(
            SwitchboardConfig::from_str(yaml),
            Err(ConfigError::InvalidLaunchUrl { .. })
        ));
    }

    #[test]
    fn test_discover_walks_up_from_nested_dir() {
        let root = std::env::temp_dir().join(format!("switchboard-discover-{}", std::process::id()));
        let nested = root.join("deploy").join("staging");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(
            root.join(".switchboard.yml"),
            "name: found\nserver: { transport: fake }\nservices:\n  api: {}\n",
        )
        .unwrap();

        let (path, config) = SwitchboardConfig::discover(&nested).unwrap();
        assert_eq!(path, root.join(".switchboard.yml"));
        assert_eq!(config.project_name(), Some("found"));

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_transport_kind_from_str() {
        assert_eq!("http".parse::<TransportKind>(), Ok(TransportKind::Http));
        assert!("carrier-pigeon".parse::<TransportKind>().is_err());
    }
}
