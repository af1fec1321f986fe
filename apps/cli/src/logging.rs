//! Log subscriber configuration.

use std::str::FromStr;

use snafu::{Snafu, ensure};
use tracing::{Level, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

#[derive(Debug, Snafu)]
pub enum LogConfigError {
    #[snafu(display("Invalid log level '{level}'"))]
    InvalidLevel { level: String },

    #[snafu(display("Invalid log format '{format}', expected 'text' or 'json'"))]
    InvalidFormat { format: String },
}

/// Level and output format of the process log.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub format: String,
}

impl LogConfig {
    /// Parses the configured level. `fatal` and `panic` are accepted as
    /// aliases of `error`.
    pub fn level(&self) -> Result<Level, LogConfigError> {
        match self.level.to_ascii_lowercase().as_str() {
            "fatal" | "panic" => Ok(Level::ERROR),
            other => Level::from_str(other).map_err(|_| LogConfigError::InvalidLevel {
                level: self.level.clone(),
            }),
        }
    }

    /// Builds a subscriber writing to stdout.
    pub fn build(&self) -> Result<Box<dyn Subscriber + Send + Sync>, LogConfigError> {
        ensure!(
            matches!(self.format.as_str(), "text" | "json"),
            InvalidFormatSnafu {
                format: self.format.clone()
            }
        );

        let level = LevelFilter::from_level(self.level()?);
        let filter = EnvFilter::default().add_directive(level.into());
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stdout);

        if self.format == "json" {
            Ok(Box::new(builder.json().finish()))
        } else {
            Ok(Box::new(builder.finish()))
        }
    }
}
