use config::{Config as ConfigBuilder, File};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use crate::errors::{ClientError, ClientResult};

/// Configuration for a client run.
///
/// # Configuration Locations
///
/// The configuration can be loaded from multiple locations in order of precedence:
/// 1. Custom config file specified via `--config` flag
/// 2. Local `.normq.yaml` in the current directory
/// 3. Global `$HOME/.config/normq/config.yaml`
///
/// # Configuration Format
///
/// ```yaml
/// # Broker endpoint
/// host: "norminette.42.fr"
/// port: 5672
/// virtual_host: "/"
///
/// # Static credential pair
/// username: "guest"
/// password: "guest"
///
/// # Exchange and routing key of the checking service
/// routing_key: "norminette"
///
/// # Maximum number of unanswered requests (default: CPU cores)
/// jobs: 4
///
/// # Log level (trace, debug, info, warn, error)
/// log_level: "warn"
///
/// # Output rendering (color, plain)
/// display: "color"
/// ```
///
/// Command-line arguments take precedence over file values, see
/// [`ClientConfig::merge_with_cli`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Broker host name
    #[serde(default = "default_host")]
    pub host: String,

    /// Broker AMQP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// AMQP virtual host
    #[serde(default = "default_virtual_host")]
    pub virtual_host: String,

    #[serde(default = "default_credential")]
    pub username: String,

    #[serde(default = "default_credential")]
    pub password: String,

    /// Exchange name and routing key the checking service listens on
    #[serde(default = "default_routing_key")]
    pub routing_key: String,

    /// Number of requests allowed in flight before the dispatcher blocks
    /// Defaults to number of CPU cores if not specified
    #[serde(default = "default_jobs")]
    pub jobs: NonZeroUsize,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// How results are rendered
    #[serde(default)]
    pub display: DisplayMode,
}

/// Output rendering switch consumed by the result sink
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// Terminal mode: the "currently reporting" line is rewritten in place
    /// and structured payloads are rendered as labeled lists
    #[default]
    Color,
    /// No escape sequences, one line per reported file, raw payload text
    Plain,
}

/// Values supplied on the command line; `None` keeps the file value
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub jobs: Option<NonZeroUsize>,
    pub log_level: Option<String>,
    pub display: Option<DisplayMode>,
}

fn default_host() -> String {
    "norminette.42.fr".to_string()
}

fn default_port() -> u16 {
    5672
}

fn default_virtual_host() -> String {
    "/".to_string()
}

fn default_credential() -> String {
    "guest".to_string()
}

fn default_routing_key() -> String {
    "norminette".to_string()
}

fn default_jobs() -> NonZeroUsize {
    NonZeroUsize::new(num_cpus::get()).unwrap_or(NonZeroUsize::MIN)
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            virtual_host: default_virtual_host(),
            username: default_credential(),
            password: default_credential(),
            routing_key: default_routing_key(),
            jobs: default_jobs(),
            log_level: default_log_level(),
            display: DisplayMode::default(),
        }
    }
}

impl ClientConfig {
    /// Loads configuration, layering `config_path` over the default locations
    pub fn load_from(config_path: Option<&Path>) -> ClientResult<Self> {
        if let Some(path) = config_path {
            if !path.is_file() {
                return Err(ClientError::config_error(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
        }

        let mut builder = ConfigBuilder::builder();

        let config_files = [
            // Global config
            dirs::config_dir().map(|p| p.join("normq/config.yaml")),
            // Local config
            Some(PathBuf::from(".normq.yaml")),
            // Custom config
            config_path.map(PathBuf::from),
        ];

        for path in config_files.iter().flatten() {
            if path.is_file() {
                builder = builder.add_source(File::from(path.as_path()));
            }
        }

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Merges CLI arguments with configuration file values
    pub fn merge_with_cli(mut self, cli: ConfigOverrides) -> Self {
        if let Some(host) = cli.host {
            self.host = host;
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(jobs) = cli.jobs {
            self.jobs = jobs;
        }
        if let Some(level) = cli.log_level {
            self.log_level = level;
        }
        if let Some(display) = cli.display {
            self.display = display;
        }
        self
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.host.trim().is_empty() {
            return Err(ClientError::config_error("host must not be empty"));
        }
        if self.port == 0 {
            return Err(ClientError::config_error("port must not be 0"));
        }
        if self.routing_key.is_empty() {
            return Err(ClientError::config_error("routing_key must not be empty"));
        }
        Ok(())
    }

    /// AMQP URL for the configured endpoint and credentials
    pub fn amqp_url(&self) -> String {
        let vhost = match self.virtual_host.as_str() {
            "/" => String::new(),
            other => format!("/{}", urlencoding::encode(other)),
        };
        format!(
            "amqp://{}:{}@{}:{}{}",
            urlencoding::encode(&self.username),
            urlencoding::encode(&self.password),
            self.host,
            self.port,
            vhost
        )
    }
}
