use anyhow::{Context, Result};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub frigate: FrigateConfig,
    #[serde(default)]
    pub alerts: Vec<AlertConfig>,
    #[serde(default)]
    pub alert_rules: AlertRulesConfig,
    #[serde(default)]
    pub object_tracking: ObjectTrackingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// MQTT endpoints (required section)
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Topic carrying Frigate detection events
    pub listen_topic: String,
    /// Topic receiving admitted alerts
    pub alert_topic: String,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

impl MqttConfig {
    /// Retained status topic announced alongside alerts
    pub fn status_topic(&self) -> String {
        format!("{}/status", self.alert_topic)
    }
}

/// Frigate server endpoint for artifact URLs and optional fetch confirmation
#[derive(Debug, Clone, Deserialize)]
pub struct FrigateConfig {
    #[serde(default = "default_frigate_host")]
    pub host: String,
    #[serde(default = "default_frigate_port")]
    pub port: u16,
    #[serde(default)]
    pub ssl: bool,
    /// Confirm snapshot/clip availability over HTTP before publishing
    #[serde(default)]
    pub verify_artifacts: bool,
}

fn default_frigate_host() -> String {
    "localhost".to_string()
}

fn default_frigate_port() -> u16 {
    5000
}

impl FrigateConfig {
    pub fn api_base_url(&self) -> String {
        let protocol = if self.ssl { "https" } else { "http" };
        format!("{}://{}:{}/api", protocol, self.host, self.port)
    }
}

impl Default for FrigateConfig {
    fn default() -> Self {
        Self {
            host: default_frigate_host(),
            port: default_frigate_port(),
            ssl: false,
            verify_artifacts: false,
        }
    }
}

/// Per-camera admit specification
#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    pub camera: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub zones: ZonesConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ZonesConfig {
    #[serde(default)]
    pub require: Vec<ZoneRule>,
    #[serde(default)]
    pub ignore: Vec<ZoneRule>,
}

/// A zone entry, optionally scoped to specific labels. Accepts either a bare
/// zone name or `{ zone: ..., labels: [...] }`.
#[derive(Debug, Clone)]
pub struct ZoneRule {
    pub zone: String,
    pub labels: Vec<String>,
}

impl<'de> Deserialize<'de> for ZoneRule {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Name(String),
            Detailed {
                zone: String,
                #[serde(default = "default_wildcard")]
                labels: Vec<String>,
            },
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Name(zone) => ZoneRule {
                zone,
                labels: default_wildcard(),
            },
            Repr::Detailed { zone, labels } => ZoneRule { zone, labels },
        })
    }
}

fn default_wildcard() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_true() -> bool {
    true
}

/// Global admission thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct AlertRulesConfig {
    /// Events shorter than this never publish; 0 disables deferral
    #[serde(default, deserialize_with = "de_duration")]
    pub min_event_duration: Duration,
    /// Events older than this are denied; 0 disables the upper bound
    #[serde(default, deserialize_with = "de_duration")]
    pub max_event_duration: Duration,
    /// Require a snapshot before publishing
    #[serde(default)]
    pub snapshot: bool,
    /// Require a clip before publishing
    #[serde(default)]
    pub video: bool,
    #[serde(default)]
    pub cooldown: CooldownConfig,
}

impl Default for AlertRulesConfig {
    fn default() -> Self {
        Self {
            min_event_duration: Duration::ZERO,
            max_event_duration: Duration::ZERO,
            snapshot: false,
            video: false,
            cooldown: CooldownConfig::default(),
        }
    }
}

/// Suppression windows after a publish; 0 disables a dimension
#[derive(Debug, Clone, Deserialize)]
pub struct CooldownConfig {
    #[serde(default = "default_cooldown", deserialize_with = "de_duration")]
    pub camera: Duration,
    #[serde(default = "default_cooldown", deserialize_with = "de_duration")]
    pub label: Duration,
}

fn default_cooldown() -> Duration {
    Duration::from_secs(60)
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            camera: default_cooldown(),
            label: default_cooldown(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectTrackingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Max pairwise bbox-center displacement (frame-normalized) below which
    /// an event counts as stationary
    #[serde(default = "default_displacement_threshold")]
    pub displacement_threshold: f64,
}

fn default_displacement_threshold() -> f64 {
    0.02
}

impl Default for ObjectTrackingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            displacement_threshold: default_displacement_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_max_keep")]
    pub max_keep: u32,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_keep() -> u32 {
    10
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            path: None,
            max_keep: default_max_keep(),
        }
    }
}

/// Parse a duration with an `s`/`m`/`h` suffix; a bare integer means seconds.
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("empty duration".to_string());
    }

    let (value, multiplier) = match trimmed.char_indices().last() {
        Some((idx, 's')) => (&trimmed[..idx], 1u64),
        Some((idx, 'm')) => (&trimmed[..idx], 60),
        Some((idx, 'h')) => (&trimmed[..idx], 3600),
        _ => (trimmed, 1),
    };

    let value: u64 = value
        .parse()
        .map_err(|_| format!("invalid duration: {:?}", input))?;

    Ok(Duration::from_secs(value * multiplier))
}

fn de_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Seconds(u64),
        Text(String),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Repr::Text(text) => parse_duration(&text).map_err(de::Error::custom),
    }
}

/// Load configuration from a file, selecting the parser by extension.
/// Files without a recognized extension are treated as YAML.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let config_str = std::fs::read_to_string(path)
        .context(format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = if path.extension().map_or(false, |ext| ext == "json") {
        serde_json::from_str(&config_str).context("Failed to parse JSON config")?
    } else if path.extension().map_or(false, |ext| ext == "toml") {
        toml::from_str(&config_str).context("Failed to parse TOML config")?
    } else {
        serde_yaml::from_str(&config_str).context("Failed to parse YAML config")?
    };

    config.validate()?;
    Ok(config)
}

impl AppConfig {
    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.mqtt.listen_topic.is_empty() {
            anyhow::bail!("mqtt.listen_topic must not be empty");
        }
        if self.mqtt.alert_topic.is_empty() {
            anyhow::bail!("mqtt.alert_topic must not be empty");
        }
        if self.object_tracking.displacement_threshold <= 0.0 {
            anyhow::bail!("object_tracking.displacement_threshold must be positive");
        }
        for alert in &self.alerts {
            if alert.camera.is_empty() {
                anyhow::bail!("alerts[].camera must not be empty");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_yaml() {
        let yaml = r#"
mqtt:
  host: broker.local
  port: 1884
  username: fep
  password: secret
  listen_topic: frigate/events
  alert_topic: frigate/alerts
frigate:
  host: frigate.local
  port: 5000
  ssl: true
alerts:
  - camera: yard
    labels: [person, dog]
    zones:
      require:
        - zone: steps
      ignore:
        - zone: street
          labels: [car]
  - camera: garage
    enabled: false
    labels: [car]
alert_rules:
  min_event_duration: 5s
  max_event_duration: 2m
  snapshot: true
  cooldown:
    camera: 30s
    label: 1m
object_tracking:
  enabled: false
logging:
  level: debug
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.mqtt.status_topic(), "frigate/alerts/status");
        assert_eq!(config.frigate.api_base_url(), "https://frigate.local:5000/api");

        assert_eq!(config.alerts.len(), 2);
        let yard = &config.alerts[0];
        assert!(yard.enabled);
        assert_eq!(yard.zones.require[0].zone, "steps");
        assert_eq!(yard.zones.require[0].labels, vec!["*"]);
        assert_eq!(yard.zones.ignore[0].labels, vec!["car"]);
        assert!(!config.alerts[1].enabled);

        assert_eq!(config.alert_rules.min_event_duration, Duration::from_secs(5));
        assert_eq!(config.alert_rules.max_event_duration, Duration::from_secs(120));
        assert!(config.alert_rules.snapshot);
        assert!(!config.alert_rules.video);
        assert_eq!(config.alert_rules.cooldown.camera, Duration::from_secs(30));
        assert_eq!(config.alert_rules.cooldown.label, Duration::from_secs(60));
        assert!(!config.object_tracking.enabled);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn defaults_when_sections_missing() {
        let yaml = r#"
mqtt:
  listen_topic: frigate/events
  alert_topic: frigate/alerts
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.mqtt.host, "localhost");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.frigate.api_base_url(), "http://localhost:5000/api");
        assert_eq!(config.alert_rules.min_event_duration, Duration::ZERO);
        assert_eq!(config.alert_rules.cooldown.camera, Duration::from_secs(60));
        assert!(config.object_tracking.enabled);
        assert!((config.object_tracking.displacement_threshold - 0.02).abs() < 1e-9);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn missing_mqtt_section_fails() {
        let yaml = "alerts: []\n";
        assert!(serde_yaml::from_str::<AppConfig>(yaml).is_err());
    }

    #[test]
    fn zone_rule_accepts_bare_names() {
        let yaml = r#"
mqtt:
  listen_topic: in
  alert_topic: out
alerts:
  - camera: porch
    labels: [person]
    zones:
      require: [steps, walkway]
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        let require = &config.alerts[0].zones.require;
        assert_eq!(require.len(), 2);
        assert_eq!(require[1].zone, "walkway");
        assert_eq!(require[0].labels, vec!["*"]);
    }

    #[test]
    fn duration_suffixes() {
        assert_eq!(parse_duration("45s").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("abc").is_err());
    }
}
