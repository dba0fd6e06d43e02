use serde::{Deserialize, Serialize};
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use thiserror::Error;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;

/// Environment variable consulted for the config file path when `--config` is not given.
pub const CONFIG_ENV_VAR: &str = "KILN_CONFIG";

/// Top-level configuration for the Kiln debug adapter.
///
/// Every section is optional in TOML; missing sections fall back to defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KilnConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Connection settings for the remote script-execution host.
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Project layout conventions used when mapping files to module paths.
    #[serde(default)]
    pub bridge: BridgeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Logging level for all Kiln crates.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs in JSON format.
    #[serde(default)]
    pub json: bool,

    /// Append logs to the given file path (in addition to stderr).
    ///
    /// If the file cannot be opened, file logging is disabled while stderr
    /// logging remains active.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    pub(crate) fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            // Anything else is treated as an `EnvFilter` directive string.
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// Create the effective `EnvFilter`.
    ///
    /// `level` may be either a simple level (`info`, `debug`, ...) or a full
    /// `tracing_subscriber::EnvFilter` directive string. If `RUST_LOG` is set,
    /// it is merged into the resulting filter.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let config_directives = Self::normalize_level_directives(&self.level);

        match env_directives {
            Some(env_directives) => {
                let combined = format!("{config_directives},{env_directives}");
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    /// `host:port` of the script-execution host's debug endpoint.
    #[serde(default = "RemoteConfig::default_address")]
    pub address: String,

    #[serde(default = "RemoteConfig::default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Upper bound on a single remote call. `0` disables the timeout, in which
    /// case a stalled remote host stalls the corresponding DAP request.
    #[serde(default = "RemoteConfig::default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Largest frame accepted from (or sent to) the remote host.
    #[serde(default = "RemoteConfig::default_max_frame_bytes")]
    pub max_frame_bytes: u32,

    /// Capacity of the broadcast channel carrying remote events.
    #[serde(default = "RemoteConfig::default_event_channel_size")]
    pub event_channel_size: usize,
}

impl RemoteConfig {
    fn default_address() -> String {
        "127.0.0.1:8099".to_owned()
    }

    fn default_connect_timeout_ms() -> u64 {
        5_000
    }

    fn default_request_timeout_ms() -> u64 {
        30_000
    }

    fn default_max_frame_bytes() -> u32 {
        16 * 1024 * 1024
    }

    fn default_event_channel_size() -> usize {
        256
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            address: Self::default_address(),
            connect_timeout_ms: Self::default_connect_timeout_ms(),
            request_timeout_ms: Self::default_request_timeout_ms(),
            max_frame_bytes: Self::default_max_frame_bytes(),
            event_channel_size: Self::default_event_channel_size(),
        }
    }
}

/// Execution scope a script is launched into when `launch` does not name one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Designer,
    #[default]
    Gateway,
    Perspective,
}

impl ScopeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ScopeKind::Designer => "designer",
            ScopeKind::Gateway => "gateway",
            ScopeKind::Perspective => "perspective",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Directory segment marking the root of the project's script library.
    #[serde(default = "BridgeConfig::default_source_root_marker")]
    pub source_root_marker: String,

    /// File name holding a module's code inside its directory.
    #[serde(default = "BridgeConfig::default_entry_filename")]
    pub entry_filename: String,

    #[serde(default)]
    pub default_scope: ScopeKind,
}

impl BridgeConfig {
    fn default_source_root_marker() -> String {
        "script-python".to_owned()
    }

    fn default_entry_filename() -> String {
        "code.py".to_owned()
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            source_root_marker: Self::default_source_root_marker(),
            entry_filename: Self::default_entry_filename(),
            default_scope: ScopeKind::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // `toml::de::Error`'s `Display` includes a source snippet; keep only the message so raw
        // config text never lands in logs.
        ConfigError::Toml(err.message().to_owned())
    }
}

impl KilnConfig {
    /// Load a config file from TOML.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

struct MutexFileMakeWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl<'a> MakeWriter<'a> for MutexFileMakeWriter {
    type Writer = MutexFileWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        let guard = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        MutexFileWriter { guard }
    }
}

struct MutexFileWriter<'a> {
    guard: std::sync::MutexGuard<'a, std::fs::File>,
}

impl Write for MutexFileWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.guard.flush()
    }
}

static TRACING_INIT: Once = Once::new();

/// Initializes structured `tracing` logging.
///
/// Logs always go to stderr: stdout carries DAP frames. This function is safe
/// to call multiple times; only the first call installs a global subscriber.
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let filter = config.env_filter();

        let file = config
            .file
            .as_ref()
            .and_then(|path| {
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .ok()
            })
            .map(|file| Arc::new(Mutex::new(file)));
        let file_open_failed = config.file.is_some() && file.is_none();

        // `cargo test` output capture only works for the stdlib's `print!/eprint!`
        // macros, so debug builds log through `TestWriter`.
        let mut make_writer = if cfg!(debug_assertions) {
            BoxMakeWriter::new(tracing_subscriber::fmt::writer::TestWriter::with_stderr)
        } else {
            BoxMakeWriter::new(std::io::stderr)
        };
        if let Some(file) = file {
            make_writer = BoxMakeWriter::new(make_writer.and(MutexFileMakeWriter { file }));
        }

        let layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = if config.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        };

        let subscriber = tracing_subscriber::registry().with(filter).with(layer);
        if tracing::subscriber::set_global_default(subscriber).is_ok() && file_open_failed {
            if let Some(path) = config.file.as_ref() {
                tracing::warn!(
                    target: "kiln.config",
                    path = %path.display(),
                    "failed to open log file; logging to stderr only"
                );
            }
        }
    });
}

/// Like [`init_tracing`] but takes the whole config.
pub fn init_tracing_with_config(config: &KilnConfig) {
    init_tracing(&config.logging)
}
