//! Daemon configuration: environment variables with CLI overrides (CLI wins).
//!
//! Every field is plumbed through `clap`'s `env` support so the same struct
//! documents both the CLI surface and the env-var contract in SPEC_FULL.md §6.

use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::controller::Credential;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("exactly one of --code or --user must be set")]
    CredentialAmbiguous,
    #[error("--code must be 4 or more decimal digits")]
    InvalidCode,
    #[error("--user must be between 1 and 99")]
    InvalidUser(u8),
    #[error("--topic-root sanitizes to an empty string")]
    EmptyTopicRoot,
    #[error("--panel-unique-id sanitizes to an empty string")]
    EmptyPanelId,
    #[error("invalid entry in --ignored-zones: {0}")]
    InvalidIgnoredZone(String),
}

/// Bridge daemon between an NX-584 alarm panel and an MQTT broker using the
/// Home Assistant MQTT Discovery convention.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Serial device path the panel is connected to.
    #[arg(long, env = "SERIAL")]
    pub serial: String,

    /// Serial baud rate.
    #[arg(long, env = "BAUD", default_value_t = 38_400)]
    pub baud: u32,

    /// MQTT broker host.
    #[arg(long, env = "MQTT_HOST")]
    pub mqtt_host: String,

    /// MQTT broker port.
    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    pub mqtt_port: u16,

    /// MQTT username, if the broker requires auth.
    #[arg(long, env = "MQTT_USER")]
    pub mqtt_user: Option<String>,

    /// MQTT password, if the broker requires auth.
    #[arg(long, env = "MQTT_PASSWORD")]
    pub mqtt_password: Option<String>,

    /// MQTT QoS used for publishes and subscriptions (0, 1, or 2).
    #[arg(long, env = "QOS", default_value_t = 1)]
    pub qos: u8,

    /// Home Assistant MQTT discovery prefix.
    #[arg(long, env = "TOPIC_ROOT", default_value = "homeassistant")]
    pub topic_root: String,

    /// Identifier stem used to build every entity's unique_id.
    #[arg(long, env = "PANEL_UNIQUE_ID", default_value = "caddx_panel")]
    pub panel_unique_id: String,

    /// Display name for the panel's device card in Home Assistant.
    #[arg(long, env = "PANEL_NAME", default_value = "Caddx Alarm Panel")]
    pub panel_name: String,

    /// Highest zone index polled during sync.
    #[arg(long, env = "MAX_ZONES", default_value_t = 8)]
    pub max_zones: u8,

    /// Comma-separated zone indices to skip during sync.
    #[arg(long, env = "IGNORED_ZONES", value_delimiter = ',', default_value = "")]
    pub ignored_zones: Vec<String>,

    /// Alarm keypad PIN (4 or more decimal digits). Mutually exclusive with `user`.
    #[arg(long, env = "CODE")]
    pub code: Option<String>,

    /// Alarm keypad user number (1-99). Mutually exclusive with `code`.
    #[arg(long, env = "USER")]
    pub user: Option<u8>,

    /// Log verbosity.
    #[arg(long, env = "LOG_LEVEL", default_value = "INFO")]
    pub log_level: String,

    /// Optional log file path; rotates at 10 MB, keeping 5 files.
    #[arg(long, env = "LOG_FILE")]
    pub log_file: Option<String>,

    /// Spacing between per-zone discovery publishes during the initial
    /// discovery flush, in milliseconds (spec.md §9 Open Question).
    #[arg(long, env = "ZONE_DISCOVERY_SPACING_MS", default_value_t = 1000)]
    pub zone_discovery_spacing_ms: u64,
}

impl Config {
    /// Parse `Config` from CLI args (with env fallback) and validate it.
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = Config::parse();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Sanitize identifiers in place and check the remaining fields. Every
    /// topic and `unique_id` built downstream (`mqtt::topics`,
    /// `mqtt::discovery`) reads `topic_root`/`panel_unique_id` directly off
    /// `self`, so sanitization has to happen here rather than only being
    /// checked for emptiness — otherwise the raw, unsanitized value would be
    /// what actually reaches the wire (spec.md §4.5).
    fn validate(&mut self) -> Result<(), ConfigError> {
        match (&self.code, self.user) {
            (Some(_), None) | (None, Some(_)) => {}
            _ => return Err(ConfigError::CredentialAmbiguous),
        }
        if let Some(code) = &self.code {
            if code.len() < 4 || !code.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ConfigError::InvalidCode);
            }
        }
        if let Some(user) = self.user {
            if !(1..=99).contains(&user) {
                return Err(ConfigError::InvalidUser(user));
            }
        }
        self.topic_root = crate::mqtt::topics::sanitize(&self.topic_root);
        if self.topic_root.is_empty() {
            return Err(ConfigError::EmptyTopicRoot);
        }
        self.panel_unique_id = crate::mqtt::topics::sanitize(&self.panel_unique_id);
        if self.panel_unique_id.is_empty() {
            return Err(ConfigError::EmptyPanelId);
        }
        for z in self.ignored_zones_parsed()? {
            let _ = z;
        }
        Ok(())
    }

    /// Parse `ignored_zones` into indices, validating each entry is a number.
    pub fn ignored_zones_parsed(&self) -> Result<Vec<u8>, ConfigError> {
        self.ignored_zones
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.trim()
                    .parse::<u8>()
                    .map_err(|_| ConfigError::InvalidIgnoredZone(s.clone()))
            })
            .collect()
    }

    /// The configured keypad credential, used to build Primary Keypad
    /// Function frames.
    pub fn credential(&self) -> Credential {
        match (&self.code, self.user) {
            (Some(code), _) => Credential::Pin(code.clone()),
            (None, Some(user)) => Credential::User(user),
            (None, None) => unreachable!("validate() guarantees exactly one is set"),
        }
    }

    pub fn qos(&self) -> rumqttc::QoS {
        match self.qos {
            0 => rumqttc::QoS::AtMostOnce,
            2 => rumqttc::QoS::ExactlyOnce,
            _ => rumqttc::QoS::AtLeastOnce,
        }
    }

    pub fn zone_discovery_spacing(&self) -> Duration {
        Duration::from_millis(self.zone_discovery_spacing_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        Config {
            serial: "/dev/ttyUSB0".into(),
            baud: 38_400,
            mqtt_host: "localhost".into(),
            mqtt_port: 1883,
            mqtt_user: None,
            mqtt_password: None,
            qos: 1,
            topic_root: "homeassistant".into(),
            panel_unique_id: "caddx_panel".into(),
            panel_name: "Caddx Alarm Panel".into(),
            max_zones: 8,
            ignored_zones: vec![],
            code: Some("1234".into()),
            user: None,
            log_level: "INFO".into(),
            log_file: None,
            zone_discovery_spacing_ms: 1000,
        }
    }

    #[test]
    fn rejects_both_code_and_user() {
        let mut cfg = base();
        cfg.user = Some(5);
        assert!(matches!(cfg.validate(), Err(ConfigError::CredentialAmbiguous)));
    }

    #[test]
    fn rejects_neither_code_nor_user() {
        let mut cfg = base();
        cfg.code = None;
        assert!(matches!(cfg.validate(), Err(ConfigError::CredentialAmbiguous)));
    }

    #[test]
    fn rejects_short_code() {
        let mut cfg = base();
        cfg.code = Some("12".into());
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidCode)));
    }

    #[test]
    fn rejects_out_of_range_user() {
        let mut cfg = base();
        cfg.code = None;
        cfg.user = Some(100);
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidUser(100))));
    }

    #[test]
    fn accepts_valid_pin_config() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn parses_ignored_zones() {
        let mut cfg = base();
        cfg.ignored_zones = vec!["3".into(), "5".into()];
        assert_eq!(cfg.ignored_zones_parsed().unwrap(), vec![3, 5]);
    }

    #[test]
    fn validate_sanitizes_panel_id_and_topic_root_in_place() {
        let mut cfg = base();
        cfg.panel_unique_id = "Caddx Panel".into();
        cfg.topic_root = "home assistant".into();
        cfg.validate().expect("sanitized identifiers should still validate");
        assert_eq!(cfg.panel_unique_id, "Caddx_Panel");
        assert_eq!(cfg.topic_root, "home_assistant");
    }

    #[test]
    fn rejects_non_numeric_ignored_zone() {
        let mut cfg = base();
        cfg.ignored_zones = vec!["abc".into()];
        assert!(cfg.ignored_zones_parsed().is_err());
    }
}
