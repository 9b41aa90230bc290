//! stderr logging setup for programs built on genipc.
//!
//! Programs either pick a [`LogSettings`] themselves or read it from
//! [`LOG_FORMAT_ENV`] and [`LOG_LEVEL_ENV`]. Events go to stderr without
//! colour or targets, as text lines or one JSON object per line.

use std::str::FromStr;

use tracing::level_filters::LevelFilter;

/// Environment variable naming the output format (`text` or `json`).
pub const LOG_FORMAT_ENV: &str = "GENIPC_LOG_FORMAT";
/// Environment variable naming the most verbose level emitted.
pub const LOG_LEVEL_ENV: &str = "GENIPC_LOG_LEVEL";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// Output format and verbosity for the global subscriber.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct LogSettings {
    pub format: LogFormat,
    pub level: LogLevel,
}

impl LogSettings {
    /// Build settings from optional names. Missing or unrecognized values
    /// keep the default (text at info level).
    pub fn from_names(format: Option<&str>, level: Option<&str>) -> Self {
        Self {
            format: format
                .and_then(|name| name.parse().ok())
                .unwrap_or_default(),
            level: level.and_then(|name| name.parse().ok()).unwrap_or_default(),
        }
    }

    /// Read [`LOG_FORMAT_ENV`] and [`LOG_LEVEL_ENV`].
    pub fn from_env() -> Self {
        let format = std::env::var(LOG_FORMAT_ENV).ok();
        let level = std::env::var(LOG_LEVEL_ENV).ok();
        Self::from_names(format.as_deref(), level.as_deref())
    }

    /// Install these settings as the global subscriber.
    ///
    /// Returns `false` if a global subscriber was already set; the existing
    /// one stays in place.
    pub fn install(self) -> bool {
        let builder = tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_max_level(LevelFilter::from(self.level))
            .with_ansi(false)
            .with_target(false);

        let installed = match self.format {
            LogFormat::Text => builder.try_init(),
            LogFormat::Json => builder.json().try_init(),
        };
        installed.is_ok()
    }
}

/// Install a global stderr subscriber. Does nothing if one is already set.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    LogSettings { format, level }.install();
}

/// Install a global stderr subscriber configured from the environment.
pub fn init_logging_from_env() {
    LogSettings::from_env().install();
}
