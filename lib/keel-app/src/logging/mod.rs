//! Logging.

use keel_error::GenericError;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _, Layer as _};

mod config;
pub use self::config::LoggingConfiguration;

mod layer;
use self::layer::build_formatting_layer;

/// Logs a message to standard error and exits the process with a non-zero exit code.
pub fn fatal_and_exit(message: String) -> ! {
    eprintln!("FATAL: {}", message);
    std::process::exit(1);
}

/// Initializes the logging subsystem for `tracing`.
///
/// Installs a global subscriber that filters events with the configured log level directives and writes them to
/// standard output, either as JSON or in a human-readable format.
///
/// # Errors
///
/// If the logging subsystem was already initialized, an error will be returned.
pub fn initialize_logging(config: &LoggingConfiguration) -> Result<(), GenericError> {
    let filter_layer = config.log_level.as_env_filter();

    tracing_subscriber::registry()
        .with(build_formatting_layer(config, std::io::stdout).with_filter(filter_layer))
        .try_init()?;

    Ok(())
}
