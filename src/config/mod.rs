/**
 * Initialize gatherer configuration, using hierarchical configuration
 * https://docs.rs/config/latest/config/
 *
 * 1. First ortc.yaml is read
 * 2. Then ortc.{environment}.yaml is read
 * 3. Then ortc.local.yaml is read (this is normally used for dev and not checked in git)
 * 4. Finally, environment variables prefixed with ORTC_ are read
 */
use config::builder::{ConfigBuilder, DefaultState};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use tokio::time::Duration;

use crate::ice::{GatherOptions, GatherPolicy, IceComponent, IceServer, ProbeSettings};

pub use environment_type::EnvironmentType;

mod environment_type;
mod loglevel_type;
mod policy_type;

pub(crate) const ENVIRONMENT_VARIABLE: &str = "ORTC_ENVIRONMENT";
const ENV_PREFIX: &str = "ORTC";

/**
 * Represents the configuration settings for the gatherer.
 *
 * Fields:
 * - `environment`: The environment type (development, staging or production).
 * - `gather_policy`: Which candidates to gather (all, nohost, relay). Unknown values mean `all`.
 * - `ice_servers`: STUN/TURN servers, in the RTCIceServer shape.
 * - `component`: The component the gatherer serves (rtp or rtcp).
 * - `stun_timeout_ms`: How long to wait for a STUN server's Binding response.
 * - `software_name`: Sent in the SOFTWARE attribute of Binding requests.
 * - `log_level`: The logging level. By default it is inferred from the environment type.
 */
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub environment: EnvironmentType,
    #[serde(deserialize_with = "policy_type::deserialize")]
    pub gather_policy: GatherPolicy,
    #[serde(default)]
    pub ice_servers: Vec<IceServer>,
    pub component: IceComponent,
    pub stun_timeout_ms: u64,
    pub software_name: String,
    #[serde(deserialize_with = "loglevel_type::deserialize")]
    pub log_level: slog::Level,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::builder()?.build()?.try_deserialize()
    }

    fn builder() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let run_mode = env::var(ENVIRONMENT_VARIABLE).unwrap_or_else(|_| "production".into());
        let environment: EnvironmentType = run_mode.parse().unwrap_or_default();

        Config::builder()
            // default config file
            .add_source(File::with_name("ortc.yaml").required(false))
            // environment-based config file
            .add_source(File::with_name(&format!("ortc.{}.yaml", environment.as_str())).required(false))
            // local config file (don't check this into source control)
            .add_source(File::with_name("ortc.local.yaml").required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX))
            .set_default("environment", environment.as_str())?
            .set_default("gather_policy", GatherPolicy::All.as_str())?
            .set_default("component", "rtp")?
            .set_default("stun_timeout_ms", 3000)?
            .set_default("software_name", "ORTC_GATHER/1")?
            .set_default("log_level", environment.default_log_level().as_str())
    }

    pub fn gather_options(&self) -> GatherOptions {
        GatherOptions {
            gather_policy: self.gather_policy,
            ice_servers: self.ice_servers.clone(),
        }
    }

    pub fn probe_settings(&self) -> ProbeSettings {
        ProbeSettings {
            stun_timeout: Duration::from_millis(self.stun_timeout_ms),
            software: self.software_name.clone(),
            ..ProbeSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use config::FileFormat;
    use serial_test::serial;

    use super::*;
    use crate::ice::{CredentialType, IceCredential, Urls};

    fn set_env_var(key: &str, value: &str) {
        env::set_var(key, value);
    }

    fn reset_env_var() {
        let v = env::vars().collect::<Vec<(String, String)>>();
        for (name, _) in v {
            if name.starts_with("ORTC_") {
                env::remove_var(name);
            }
        }
    }

    fn settings_with_yaml(yaml: &str) -> Settings {
        Settings::builder()
            .unwrap()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .expect("Deserialization failed")
    }

    #[test]
    #[serial]
    fn test_environment_variable() {
        for (value, expected) in [
            ("development", EnvironmentType::Development),
            ("dev", EnvironmentType::Development),
            ("staging", EnvironmentType::Staging),
            ("stg", EnvironmentType::Staging),
            ("production", EnvironmentType::Production),
            ("garbage", EnvironmentType::Production),
        ] {
            reset_env_var();
            set_env_var("ORTC_ENVIRONMENT", value);
            let settings = Settings::new().expect("Deserialization failed");
            assert_eq!(settings.environment, expected, "{value}");
        }
        reset_env_var();
    }

    #[test]
    #[serial]
    fn test_defaults() {
        reset_env_var();
        let settings = Settings::new().expect("Deserialization failed");
        assert_eq!(settings.environment, EnvironmentType::Production);
        assert_eq!(settings.gather_policy, GatherPolicy::All);
        assert!(settings.ice_servers.is_empty());
        assert_eq!(settings.component, IceComponent::Rtp);
        assert_eq!(settings.stun_timeout_ms, 3000);
        assert_eq!(settings.software_name, "ORTC_GATHER/1");
        assert_eq!(settings.log_level, slog::Level::Warning);

        let probe = settings.probe_settings();
        assert_eq!(probe.stun_timeout, Duration::from_secs(3));
        assert_eq!(settings.gather_options(), GatherOptions::default());
    }

    #[test]
    #[serial]
    fn test_log_level_combinations() {
        for (environment, level, expected) in [
            ("production", None, slog::Level::Warning),
            ("staging", None, slog::Level::Warning),
            ("development", None, slog::Level::Debug),
            ("production", Some("trace"), slog::Level::Trace),
            ("development", Some("Trace"), slog::Level::Trace),
            ("staging", Some("info"), slog::Level::Info),
            ("development", Some("garbage"), slog::Level::Debug),
            ("production", Some("garbage"), slog::Level::Warning),
        ] {
            reset_env_var();
            set_env_var("ORTC_ENVIRONMENT", environment);
            if let Some(level) = level {
                set_env_var("ORTC_LOG_LEVEL", level);
            }
            let settings = Settings::new().expect("Deserialization failed");
            assert_eq!(settings.log_level, expected, "{environment} {level:?}");
        }
        reset_env_var();
    }

    #[test]
    #[serial]
    fn test_gather_policy() {
        for (value, expected) in [
            ("all", GatherPolicy::All),
            ("NoHost", GatherPolicy::Nohost),
            ("relay", GatherPolicy::Relay),
            ("garbage", GatherPolicy::All),
        ] {
            reset_env_var();
            set_env_var("ORTC_GATHER_POLICY", value);
            let settings = Settings::new().expect("Deserialization failed");
            assert_eq!(settings.gather_policy, expected, "{value}");
        }
        reset_env_var();
    }

    #[test]
    #[serial]
    fn test_numeric_and_component_variables() {
        reset_env_var();
        set_env_var("ORTC_STUN_TIMEOUT_MS", "250");
        set_env_var("ORTC_COMPONENT", "rtcp");
        set_env_var("ORTC_SOFTWARE_NAME", "tester");
        let settings = Settings::new().expect("Deserialization failed");
        assert_eq!(settings.stun_timeout_ms, 250);
        assert_eq!(settings.component, IceComponent::Rtcp);
        assert_eq!(settings.probe_settings().software, "tester");
        reset_env_var();
    }

    #[test]
    #[serial]
    fn test_ice_servers_from_yaml() {
        reset_env_var();
        let settings = settings_with_yaml(
            r#"
gather_policy: nohost
ice_servers:
  - urls: "stun:stun.example.org"
  - urls:
      - "turn:turn.example.org"
      - "turns:turn.example.org"
    username: "user"
    credential: "secret"
  - urls: "turns:oauth.example.org"
    credential_type: oauth
    credential:
      mac_key: "key"
      access_token: "token"
"#,
        );
        assert_eq!(settings.gather_policy, GatherPolicy::Nohost);
        assert_eq!(settings.ice_servers.len(), 3);
        assert_eq!(settings.ice_servers[0].urls, Urls::One("stun:stun.example.org".to_string()));
        assert_eq!(settings.ice_servers[1].urls.iter().count(), 2);
        assert_eq!(
            settings.ice_servers[1].credential,
            Some(IceCredential::Password("secret".to_string()))
        );
        assert_eq!(settings.ice_servers[2].credential_type, CredentialType::Oauth);
        assert!(matches!(
            settings.ice_servers[2].credential,
            Some(IceCredential::OAuth(_))
        ));

        let validated = crate::ice::server::validate_servers(&settings.ice_servers).unwrap();
        assert_eq!(validated.len(), 4);
    }
}
