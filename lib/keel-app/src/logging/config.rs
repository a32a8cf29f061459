use keel_config::{deser::PermissiveBool, GenericConfiguration};
use keel_error::{generic_error, ErrorContext as _, GenericError};
use serde::Deserialize;
use serde_with::serde_as;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

fn default_log_level() -> LogLevel {
    LevelFilter::INFO.into()
}

const fn default_false() -> bool {
    false
}

const fn default_true() -> bool {
    true
}

/// Logging configuration.
///
/// Read from the following keys:
///
/// - `log_level`: a filter directive in the `RUST_LOG` format, such as `info` or `info,keel_core=debug`. Defaults to
///   `info`.
/// - `log_format_json`: whether to write logs as JSON rather than as human-readable text. Defaults to `false`.
/// - `log_with_ansi`: whether human-readable logs use colors. Defaults to `true`.
#[serde_as]
#[derive(Deserialize)]
pub struct LoggingConfiguration {
    #[serde(default = "default_log_level")]
    pub(super) log_level: LogLevel,

    #[serde_as(as = "PermissiveBool")]
    #[serde(default = "default_false")]
    pub(super) log_format_json: bool,

    #[serde_as(as = "PermissiveBool")]
    #[serde(default = "default_true")]
    pub(super) log_with_ansi: bool,
}

impl LoggingConfiguration {
    /// Creates a new `LoggingConfiguration` instance from the given configuration.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be deserialized as `LoggingConfiguration`, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        let logging_config = config.as_typed()?;
        Ok(logging_config)
    }

    /// Returns `true` if logs are written as JSON.
    pub fn is_json(&self) -> bool {
        self.log_format_json
    }
}

impl Default for LoggingConfiguration {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format_json: default_false(),
            log_with_ansi: default_true(),
        }
    }
}

#[derive(Deserialize)]
#[serde(try_from = "String")]
pub(super) struct LogLevel(EnvFilter);

impl LogLevel {
    pub fn as_env_filter(&self) -> EnvFilter {
        self.0.clone()
    }
}

impl From<LevelFilter> for LogLevel {
    fn from(level: LevelFilter) -> Self {
        Self(EnvFilter::default().add_directive(level.into()))
    }
}

impl TryFrom<String> for LogLevel {
    type Error = GenericError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.trim().is_empty() {
            return Err(generic_error!("Log level cannot be empty."));
        }

        EnvFilter::builder()
            .parse(value)
            .map(Self)
            .error_context("Failed to parse valid log level.")
    }
}
