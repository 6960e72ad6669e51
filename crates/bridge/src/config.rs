//! TOML configuration: schedule constants, gateway read timing, MQTT
//! collaborator settings. Every field has a default, so running without a
//! file is valid.

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::frame::DEFAULT_MAX_FRAME_LEN;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleConfig {
    pub irrigation_interval_sec: u64,
    pub irrigation_duration_sec: u64,
    pub light_threshold: i64,
    pub light_on_min: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            irrigation_interval_sec: 60,
            irrigation_duration_sec: 5,
            light_threshold: 240,
            light_on_min: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Upper bound on one blocking read, so the loop keeps ticking while the
    /// gateway is silent.
    pub read_timeout_ms: u64,
    /// Longest accepted frame in bytes; longer lines are skipped.
    pub max_frame_len: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 1000,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_sec: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "barn-bridge".to_string(),
            keep_alive_sec: 30,
        }
    }
}

/// Room for the longest command the bridge itself writes.
const MIN_FRAME_LEN: usize = 64;

/// rumqttc refuses keep-alives shorter than this.
const MIN_KEEP_ALIVE_SEC: u64 = 5;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate every section. Returns `Ok(())` or an error listing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_schedule(&mut errors);
        self.validate_gateway(&mut errors);
        self.validate_mqtt(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_schedule(&self, errors: &mut Vec<String>) {
        let s = &self.schedule;
        if s.irrigation_interval_sec == 0 {
            errors.push("schedule: irrigation_interval_sec must be positive".to_string());
        }
        if s.irrigation_duration_sec == 0 {
            errors.push("schedule: irrigation_duration_sec must be positive".to_string());
        }
        if s.light_on_min == 0 {
            errors.push("schedule: light_on_min must be positive".to_string());
        }
    }

    fn validate_gateway(&self, errors: &mut Vec<String>) {
        let g = &self.gateway;
        if g.read_timeout_ms == 0 {
            errors.push("gateway: read_timeout_ms must be positive".to_string());
        }

        // A longer read wait could skip a whole irrigation window.
        let interval_ms = self.schedule.irrigation_interval_sec.saturating_mul(1000);
        if interval_ms > 0 && g.read_timeout_ms > interval_ms {
            errors.push(format!(
                "gateway: read_timeout_ms ({}) exceeds irrigation interval ({interval_ms} ms)",
                g.read_timeout_ms
            ));
        }
        if g.max_frame_len < MIN_FRAME_LEN {
            errors.push(format!(
                "gateway: max_frame_len {} below minimum {MIN_FRAME_LEN}",
                g.max_frame_len
            ));
        }
    }

    fn validate_mqtt(&self, errors: &mut Vec<String>) {
        let m = &self.mqtt;
        if m.host.trim().is_empty() {
            errors.push("mqtt: host is empty".to_string());
        }
        if m.port == 0 {
            errors.push("mqtt: port must be non-zero".to_string());
        }
        if m.client_id.trim().is_empty() {
            errors.push("mqtt: client_id is empty".to_string());
        }
        if m.keep_alive_sec < MIN_KEEP_ALIVE_SEC {
            errors.push(format!(
                "mqtt: keep_alive_sec {} below minimum {MIN_KEEP_ALIVE_SEC}",
                m.keep_alive_sec
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read and parse a TOML config file. Validation runs after CLI overrides
/// are applied, see `main`.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[schedule]
irrigation_interval_sec = 3600
irrigation_duration_sec = 30
light_threshold = 200
light_on_min = 10

[gateway]
read_timeout_ms = 250

[mqtt]
host = "broker.local"
port = 8883
client_id = "barn-bridge-east"
keep_alive_sec = 60
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.schedule.irrigation_interval_sec, 3600);
        assert_eq!(config.schedule.irrigation_duration_sec, 30);
        assert_eq!(config.schedule.light_threshold, 200);
        assert_eq!(config.schedule.light_on_min, 10);
        assert_eq!(config.gateway.read_timeout_ms, 250);
        assert_eq!(config.gateway.max_frame_len, DEFAULT_MAX_FRAME_LEN);
        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.mqtt.port, 8883);
        config.validate().unwrap();
    }

    #[test]
    fn parse_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.schedule.irrigation_interval_sec, 60);
        assert_eq!(config.schedule.irrigation_duration_sec, 5);
        assert_eq!(config.schedule.light_threshold, 240);
        assert_eq!(config.schedule.light_on_min, 1);
        assert_eq!(config.mqtt.port, 1883);
        config.validate().unwrap();
    }

    #[test]
    fn parse_partial_section_fills_defaults() {
        let config: Config = toml::from_str("[schedule]\nlight_threshold = 100\n").unwrap();
        assert_eq!(config.schedule.light_threshold, 100);
        assert_eq!(config.schedule.irrigation_interval_sec, 60);
    }

    #[test]
    fn parse_rejects_unknown_keys() {
        assert!(toml::from_str::<Config>("[schedule]\nlight_treshold = 100\n").is_err());
    }

    #[test]
    fn load_missing_file_names_path() {
        let err = load("/nonexistent/bridge.toml").unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/bridge.toml"));
    }

    // -- Validation -------------------------------------------------------

    #[test]
    fn default_config_passes() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn zero_interval_rejected() {
        let mut cfg = Config::default();
        cfg.schedule.irrigation_interval_sec = 0;
        assert_validation_err(&cfg, "irrigation_interval_sec must be positive");
    }

    #[test]
    fn zero_duration_rejected() {
        let mut cfg = Config::default();
        cfg.schedule.irrigation_duration_sec = 0;
        assert_validation_err(&cfg, "irrigation_duration_sec must be positive");
    }

    #[test]
    fn zero_light_on_rejected() {
        let mut cfg = Config::default();
        cfg.schedule.light_on_min = 0;
        assert_validation_err(&cfg, "light_on_min must be positive");
    }

    #[test]
    fn negative_threshold_allowed() {
        let mut cfg = Config::default();
        cfg.schedule.light_threshold = -1;
        cfg.validate().unwrap();
    }

    #[test]
    fn zero_read_timeout_rejected() {
        let mut cfg = Config::default();
        cfg.gateway.read_timeout_ms = 0;
        assert_validation_err(&cfg, "read_timeout_ms must be positive");
    }

    #[test]
    fn read_timeout_longer_than_interval_rejected() {
        let mut cfg = Config::default();
        cfg.schedule.irrigation_interval_sec = 2;
        cfg.gateway.read_timeout_ms = 2500;
        assert_validation_err(&cfg, "read_timeout_ms (2500) exceeds irrigation interval (2000 ms)");
    }

    #[test]
    fn tiny_frame_limit_rejected() {
        let mut cfg = Config::default();
        cfg.gateway.max_frame_len = 8;
        assert_validation_err(&cfg, "max_frame_len 8 below minimum 64");
    }

    #[test]
    fn mqtt_fields_checked() {
        let mut cfg = Config::default();
        cfg.mqtt.host = " ".into();
        assert_validation_err(&cfg, "host is empty");

        let mut cfg = Config::default();
        cfg.mqtt.port = 0;
        assert_validation_err(&cfg, "port must be non-zero");

        let mut cfg = Config::default();
        cfg.mqtt.client_id = "".into();
        assert_validation_err(&cfg, "client_id is empty");

        let mut cfg = Config::default();
        cfg.mqtt.keep_alive_sec = 2;
        assert_validation_err(&cfg, "keep_alive_sec 2 below minimum 5");
    }

    // -- Multiple errors reported at once ---------------------------------

    #[test]
    fn multiple_errors_collected() {
        let mut cfg = Config::default();
        cfg.schedule.irrigation_duration_sec = 0;
        cfg.gateway.read_timeout_ms = 0;
        cfg.mqtt.host = "".into();

        let msg = format!("{:#}", cfg.validate().unwrap_err());
        assert!(msg.contains("3 errors"), "wrong count in: {msg}");
        assert!(msg.contains("irrigation_duration_sec"), "missing schedule error in: {msg}");
        assert!(msg.contains("read_timeout_ms"), "missing gateway error in: {msg}");
        assert!(msg.contains("host is empty"), "missing mqtt error in: {msg}");
    }
}
