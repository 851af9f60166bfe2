/**
 * Deployment environment. Accepts the short aliases dev, stg and prod;
 * anything unknown is treated as production.
 */
use std::convert::Infallible;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvironmentType {
    Development,
    Staging,
    #[default]
    Production,
}

impl FromStr for EnvironmentType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "development" | "dev" => EnvironmentType::Development,
            "staging" | "stg" => EnvironmentType::Staging,
            _ => EnvironmentType::Production,
        })
    }
}

impl EnvironmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentType::Development => "development",
            EnvironmentType::Staging => "staging",
            EnvironmentType::Production => "production",
        }
    }

    /// Log level used when none is configured.
    pub fn default_log_level(&self) -> slog::Level {
        match self {
            EnvironmentType::Development => slog::Level::Debug,
            _ => slog::Level::Warning,
        }
    }
}

impl<'de> Deserialize<'de> for EnvironmentType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(s.parse::<EnvironmentType>().unwrap_or_default())
    }
}
