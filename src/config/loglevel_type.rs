use serde::de::{self, Deserializer, Visitor};

use slog::Level;
use std::{env, fmt};

use super::environment_type::EnvironmentType;
use super::ENVIRONMENT_VARIABLE;

/**
 * Deserialize the log level from the configuration.
 *
 * An unparsable level falls back to the default of the environment named
 * by ORTC_ENVIRONMENT.
 */
pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
where
    D: Deserializer<'de>,
{
    match deserializer.deserialize_str(LogLevelVisitor) {
        Ok(level) => Ok(level),
        Err(_) => {
            let environment = env::var(ENVIRONMENT_VARIABLE)
                .ok()
                .and_then(|v| v.parse::<EnvironmentType>().ok())
                .unwrap_or_default();
            Ok(environment.default_log_level())
        }
    }
}

struct LogLevelVisitor;

impl<'de> Visitor<'de> for LogLevelVisitor {
    type Value = Level;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a string representing a log level")
    }

    fn visit_str<E>(self, value: &str) -> Result<Level, E>
    where
        E: de::Error,
    {
        match value.to_lowercase().as_str() {
            "trace" => Ok(Level::Trace),
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warning),
            "error" => Ok(Level::Error),
            "critical" => Ok(Level::Critical),
            _ => Err(de::Error::unknown_variant(
                value,
                &["trace", "debug", "info", "warn", "error", "critical"],
            )),
        }
    }
}
