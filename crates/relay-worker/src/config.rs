//! Worker process configuration.
//!
//! Configuration can be loaded from:
//! - A TOML file (`relay.toml`, `/etc/relay/relay.toml`, `~/.config/relay/relay.toml`)
//! - Environment variables (`RELAY__SECTION__KEY`, e.g. `RELAY__WORKER__THREADS=4`)

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tenvis_relay_core::{InMemoryConfig, DEFAULT_CHANNEL};

/// Default config file locations, searched in order.
pub const CONFIG_PATHS: [&str; 3] = [
    "relay.toml",
    "/etc/relay/relay.toml",
    "~/.config/relay/relay.toml",
];

/// Worker process configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Debug mode; enables static file serving on the default channel.
    #[serde(default)]
    pub debug: bool,

    /// Channel layer configuration.
    #[serde(default)]
    pub layer: LayerConfig,

    /// Worker pool configuration.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Static file serving.
    #[serde(default)]
    pub static_files: StaticFilesConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Channel layer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerConfig {
    /// Layer backend name.
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Maximum queued messages per channel.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Message expiry in seconds.
    #[serde(default = "default_expiry_secs")]
    pub expiry_secs: u64,

    /// Group membership expiry in seconds.
    #[serde(default = "default_group_expiry_secs")]
    pub group_expiry_secs: u64,

    /// Maximum encoded message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Blocking receive window in milliseconds.
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of workers in this process.
    #[serde(default = "default_one")]
    pub threads: usize,

    /// Number of cooperating worker processes in the deployment.
    #[serde(default = "default_one")]
    pub processes: usize,

    /// Only listen on channels matching these globs.
    #[serde(default)]
    pub only_channels: Vec<String>,

    /// Never listen on channels matching these globs.
    #[serde(default)]
    pub exclude_channels: Vec<String>,

    /// Log verbosity, 0 (warnings) to 3 (trace).
    #[serde(default = "default_verbosity")]
    pub verbosity: u8,

    /// The reserved front-door channel.
    #[serde(default = "default_channel")]
    pub default_channel: String,
}

/// Static file serving configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticFilesConfig {
    /// Directory to serve from. Static serving is off when unset.
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// URL prefix handled by the static file consumer.
    #[serde(default = "default_static_url")]
    pub url: String,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_backend() -> String {
    "memory".to_string()
}

fn default_capacity() -> usize {
    100
}

fn default_expiry_secs() -> u64 {
    60
}

fn default_group_expiry_secs() -> u64 {
    86_400 // 1 day
}

fn default_max_message_size() -> usize {
    1024 * 1024 // 1 MiB
}

fn default_receive_timeout_ms() -> u64 {
    100
}

fn default_one() -> usize {
    1
}

fn default_verbosity() -> u8 {
    1
}

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

fn default_static_url() -> String {
    "/static/".to_string()
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            capacity: default_capacity(),
            expiry_secs: default_expiry_secs(),
            group_expiry_secs: default_group_expiry_secs(),
            max_message_size: default_max_message_size(),
            receive_timeout_ms: default_receive_timeout_ms(),
        }
    }
}

impl LayerConfig {
    /// Settings for the in-memory backend.
    #[must_use]
    pub fn in_memory(&self) -> InMemoryConfig {
        InMemoryConfig {
            capacity: self.capacity,
            expiry: Duration::from_secs(self.expiry_secs),
            group_expiry: Duration::from_secs(self.group_expiry_secs),
            max_message_size: self.max_message_size,
            receive_timeout: Duration::from_millis(self.receive_timeout_ms),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            threads: default_one(),
            processes: default_one(),
            only_channels: Vec::new(),
            exclude_channels: Vec::new(),
            verbosity: default_verbosity(),
            default_channel: default_channel(),
        }
    }
}

impl WorkerConfig {
    /// The tracing filter matching the verbosity level.
    #[must_use]
    pub fn log_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

impl Default for StaticFilesConfig {
    fn default() -> Self {
        Self {
            root: None,
            url: default_static_url(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first default path that exists, layered
    /// under `RELAY__*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or the
    /// result fails validation.
    pub fn load() -> Result<Self> {
        let path = CONFIG_PATHS.iter().find_map(|path| {
            let expanded = PathBuf::from(shellexpand::tilde(path).as_ref());
            expanded.exists().then_some(expanded)
        });
        Self::build(path.as_deref())
    }

    /// Load configuration from a specific TOML file, layered under
    /// `RELAY__*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or cannot be parsed, or the
    /// result fails validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Self::build(Some(path))
            .with_context(|| format!("Failed to load config file: {}", path.display()))
    }

    fn build(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("RELAY")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("worker.only_channels")
                    .with_list_parse_key("worker.exclude_channels")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Check values serde cannot.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.worker.threads == 0 {
            bail!("worker.threads must be at least 1");
        }
        if self.worker.processes == 0 {
            bail!("worker.processes must be at least 1");
        }
        if self.worker.verbosity > 3 {
            bail!("worker.verbosity must be between 0 and 3");
        }
        if self.layer.capacity == 0 {
            bail!("layer.capacity must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.layer.backend, "memory");
        assert_eq!(config.worker.threads, 1);
        assert_eq!(config.worker.default_channel, "http.request");
        assert!(!config.debug);
        assert!(config.static_files.root.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            debug = true

            [worker]
            threads = 4
            only_channels = ["http.*"]
            exclude_channels = ["http.disconnect"]

            [layer]
            capacity = 500

            [static_files]
            root = "/srv/static"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.debug);
        assert_eq!(config.worker.threads, 4);
        assert_eq!(config.worker.only_channels, vec!["http.*"]);
        assert_eq!(config.layer.capacity, 500);
        assert_eq!(config.layer.expiry_secs, 60);
        assert_eq!(
            config.static_files.root.as_deref(),
            Some(Path::new("/srv/static"))
        );
        assert_eq!(config.static_files.url, "/static/");
    }

    #[test]
    fn test_in_memory_settings() {
        let layer = LayerConfig {
            receive_timeout_ms: 250,
            ..Default::default()
        };
        let memory = layer.in_memory();
        assert_eq!(memory.receive_timeout, Duration::from_millis(250));
        assert_eq!(memory.capacity, 100);
    }

    #[test]
    fn test_log_filter() {
        let mut worker = WorkerConfig::default();
        assert_eq!(worker.log_filter(), "info");
        worker.verbosity = 0;
        assert_eq!(worker.log_filter(), "warn");
        worker.verbosity = 3;
        assert_eq!(worker.log_filter(), "trace");
    }

    #[test]
    fn test_validation_rejects_zero_threads() {
        let mut config = Config::default();
        config.worker.threads = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[worker]\nthreads = 3\nprocesses = 2").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.worker.threads, 3);
        assert_eq!(config.worker.processes, 2);
        assert_eq!(config.layer.backend, "memory");
    }

    #[test]
    fn test_from_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::from_file(dir.path().join("absent.toml")).is_err());
    }

    #[test]
    fn test_to_toml_parses_back() {
        let mut config = Config::default();
        config.worker.threads = 6;
        config.worker.only_channels = vec!["http.*".into()];
        config.static_files.root = Some(PathBuf::from("/srv/static"));

        let rendered = config.to_toml().unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.worker.threads, 6);
        assert_eq!(parsed.worker.only_channels, vec!["http.*"]);
        assert_eq!(parsed.static_files.root, config.static_files.root);
    }

    #[test]
    fn test_from_file_invalid() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[worker]\nthreads = 0").unwrap();
        assert!(Config::from_file(file.path()).is_err());
    }
}
