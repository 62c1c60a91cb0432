// Structured Logging
//
// Installs the global tracing subscriber from the [logging] section of the
// configuration. RUST_LOG, when set, takes precedence over the configured level.

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Output format of the subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl LogFormat {
    pub fn parse(format: &str) -> Result<Self> {
        match format.to_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => anyhow::bail!("Unknown log format: {}", other),
        }
    }
}

/// Resolve the default level; `verbose` forces at least DEBUG
pub fn effective_level(config: &LoggingConfig, verbose: bool) -> Result<Level> {
    let level: Level = config
        .level
        .to_lowercase()
        .parse()
        .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))?;

    if verbose && level < Level::DEBUG {
        // Level ordering: TRACE > DEBUG > INFO > WARN > ERROR
        Ok(Level::DEBUG)
    } else {
        Ok(level)
    }
}

/// Build the filter, honoring RUST_LOG directives on top of the default level
pub fn build_filter(level: Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

/// Install the global subscriber
///
/// Logs go to stderr so that command output on stdout stays machine-readable.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or a global subscriber
/// is already installed.
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let level = effective_level(config, verbose)?;
    let format = LogFormat::parse(&config.format)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(build_filter(level))
        .with_writer(std::io::stderr);

    let installed = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    installed.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logging(level: &str, format: &str) -> LoggingConfig {
        LoggingConfig {
            level: level.to_string(),
            format: format.to_string(),
        }
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("compact").unwrap(), LogFormat::Compact);
        assert_eq!(LogFormat::parse("Pretty").unwrap(), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("JSON").unwrap(), LogFormat::Json);
        assert!(LogFormat::parse("xml").is_err());
    }

    #[test]
    fn test_effective_level() {
        assert_eq!(effective_level(&logging("warn", "compact"), false).unwrap(), Level::WARN);
        assert_eq!(effective_level(&logging("warn", "compact"), true).unwrap(), Level::DEBUG);
        assert_eq!(effective_level(&logging("trace", "compact"), true).unwrap(), Level::TRACE);
        assert!(effective_level(&logging("loud", "compact"), false).is_err());
    }

    #[test]
    fn test_json_subscriber_builds() {
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_env_filter(build_filter(Level::INFO))
            .with_test_writer()
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(from = "connecting", to = "connected", "Session state changed");
        });
    }

    #[test]
    fn test_init_rejects_bad_format() {
        assert!(init(&logging("info", "xml"), false).is_err());
    }
}
