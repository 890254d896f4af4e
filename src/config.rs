use crate::error::{MonitorError, Result};
use crate::monitor::{
    DEFAULT_MAX_TEMP, DEFAULT_MIN_TEMP, RangePolicy, ThresholdPair, ThresholdStore,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Load environment variables from .env file with robust parsing.
/// Handles values with spaces without requiring quotes.
pub fn load_dotenv() {
    let env_path = Path::new(".env");
    if !env_path.exists() {
        return;
    }

    let content = match fs::read_to_string(env_path) {
        Ok(c) => c,
        Err(_) => return,
    };

    for line in content.lines() {
        if let Some((key, value)) = parse_env_line(line) {
            // Only set if not already set (env vars take precedence)
            if std::env::var(key).is_err() {
                // SAFETY: single-threaded at this point (called before any async runtime)
                unsafe { std::env::set_var(key, value) };
            }
        }
    }
}

/// Split a `.env` line into key and value, stripping matching quotes.
fn parse_env_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    let mut value = value.trim();
    if value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')))
    {
        value = &value[1..value.len() - 1];
    }
    Some((key, value))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mqtt: MqttConfig,
    /// Topic prefix for published events, attributes and threshold commands
    pub topic_prefix: String,
    /// Path of the JSON monitor list
    pub monitors_path: PathBuf,
    pub monitors: Vec<MonitorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// One monitored unit: a watched source and its threshold pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Stable identifier; derived from the name when absent
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    /// Watched source (MQTT state topic for the bundled front end)
    pub source_id: String,
    #[serde(default = "default_min_temp")]
    pub min_temp: f64,
    #[serde(default = "default_max_temp")]
    pub max_temp: f64,
    #[serde(default)]
    pub range_policy: RangePolicy,
    /// Resolve display name and area for the attribute snapshot
    #[serde(default = "default_true")]
    pub lookup_metadata: bool,
    /// Expose user-adjustable min/max controls
    #[serde(default = "default_true")]
    pub threshold_controls: bool,
    /// JSON field holding the reading in the source payload
    #[serde(default = "default_value_key")]
    pub value_key: String,
}

fn default_min_temp() -> f64 {
    DEFAULT_MIN_TEMP
}

fn default_max_temp() -> f64 {
    DEFAULT_MAX_TEMP
}

fn default_true() -> bool {
    true
}

fn default_value_key() -> String {
    "temperature".to_string()
}

impl MonitorConfig {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            id: None,
            name: String::new(),
            source_id: source_id.into(),
            min_temp: DEFAULT_MIN_TEMP,
            max_temp: DEFAULT_MAX_TEMP,
            range_policy: RangePolicy::default(),
            lookup_metadata: true,
            threshold_controls: true,
            value_key: default_value_key(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_thresholds(mut self, min_temp: f64, max_temp: f64) -> Self {
        self.min_temp = min_temp;
        self.max_temp = max_temp;
        self
    }

    pub fn with_range_policy(mut self, policy: RangePolicy) -> Self {
        self.range_policy = policy;
        self
    }

    /// Name shown to users; falls back to `Heat Monitor <source>`.
    pub fn display_name(&self) -> String {
        if self.name.trim().is_empty() {
            format!("Heat Monitor {}", self.source_id)
        } else {
            self.name.clone()
        }
    }

    /// Identifier used in events, unique ids and topics.
    pub fn monitor_id(&self) -> String {
        match &self.id {
            Some(id) if !id.trim().is_empty() => id.clone(),
            _ => {
                let slug = slugify(&self.display_name());
                if slug.is_empty() {
                    slugify(&self.source_id)
                } else {
                    slug
                }
            }
        }
    }

    pub fn thresholds(&self) -> ThresholdPair {
        ThresholdPair::new(self.min_temp, self.max_temp)
    }

    /// Build the threshold store this entry describes.
    pub fn threshold_store(&self) -> Result<ThresholdStore> {
        ThresholdStore::new(self.thresholds(), self.range_policy)
    }

    pub fn validate(&self) -> Result<()> {
        if self.source_id.trim().is_empty() {
            return Err(MonitorError::InvalidConfig(
                "source_id must not be empty".to_string(),
            ));
        }
        if self.monitor_id().is_empty() {
            return Err(MonitorError::InvalidConfig(format!(
                "no usable monitor id for {}",
                self.source_id
            )));
        }
        self.threshold_store().map(|_| ())
    }
}

/// Lowercase, with runs of non-alphanumerics collapsed to `_`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_matches('_').to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig {
                broker_host: "localhost".to_string(),
                broker_port: 1883,
                client_id: "heat-monitor".to_string(),
                username: None,
                password: None,
            },
            topic_prefix: "heat_monitor".to_string(),
            monitors_path: default_monitors_path(),
            monitors: Vec::new(),
        }
    }
}

/// `<config dir>/heat-monitor/monitors.json`, or the working directory.
pub fn default_monitors_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("heat-monitor"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("monitors.json")
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("MQTT_BROKER_HOST") {
            config.mqtt.broker_host = host;
        }
        if let Ok(port) = std::env::var("MQTT_BROKER_PORT")
            && let Ok(p) = port.parse()
        {
            config.mqtt.broker_port = p;
        }
        if let Ok(client_id) = std::env::var("MQTT_CLIENT_ID") {
            config.mqtt.client_id = client_id;
        }
        if let Ok(username) = std::env::var("MQTT_USERNAME") {
            config.mqtt.username = Some(username);
        }
        if let Ok(password) = std::env::var("MQTT_PASSWORD") {
            config.mqtt.password = Some(password);
        }
        if let Ok(prefix) = std::env::var("HEAT_MONITOR_TOPIC_PREFIX") {
            config.topic_prefix = prefix;
        }
        if let Ok(path) = std::env::var("HEAT_MONITOR_CONFIG") {
            config.monitors_path = PathBuf::from(path);
        }

        config
    }

    /// Read the monitor list from `monitors_path`.
    ///
    /// A missing file yields an empty list.
    pub fn load_monitors(&mut self) -> Result<()> {
        if !self.monitors_path.exists() {
            warn!(
                "[Config] No monitor file at {}, starting without monitors",
                self.monitors_path.display()
            );
            self.monitors.clear();
            return Ok(());
        }

        let content = fs::read_to_string(&self.monitors_path)?;
        self.monitors = parse_monitors(&content)?;
        info!(
            "[Config] Loaded {} monitor(s) from {}",
            self.monitors.len(),
            self.monitors_path.display()
        );
        Ok(())
    }

    /// Check every monitor and reject duplicate sources or ids.
    pub fn validate(&self) -> Result<()> {
        let mut sources = HashSet::new();
        let mut ids = HashSet::new();
        for monitor in &self.monitors {
            monitor.validate()?;
            if !sources.insert(monitor.source_id.as_str()) {
                return Err(MonitorError::DuplicateSource(monitor.source_id.clone()));
            }
            let id = monitor.monitor_id();
            if !ids.insert(id.clone()) {
                return Err(MonitorError::InvalidConfig(format!(
                    "duplicate monitor id: {id}"
                )));
            }
        }
        Ok(())
    }
}

/// Parse a JSON array of monitor entries.
pub fn parse_monitors(json: &str) -> Result<Vec<MonitorConfig>> {
    Ok(serde_json::from_str(json)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_line() {
        assert_eq!(parse_env_line("KEY=value"), Some(("KEY", "value")));
        assert_eq!(
            parse_env_line("NAME = \"Heat Monitor\""),
            Some(("NAME", "Heat Monitor"))
        );
        assert_eq!(parse_env_line("PATH='a b'"), Some(("PATH", "a b")));
        assert_eq!(parse_env_line("# comment"), None);
        assert_eq!(parse_env_line("   "), None);
        assert_eq!(parse_env_line("NO_EQUALS"), None);
    }

    #[test]
    fn test_monitor_defaults_from_json() {
        let monitors = parse_monitors(r#"[{"source_id": "zigbee2mqtt/Cellar"}]"#).unwrap();
        let monitor = &monitors[0];
        assert_eq!(monitor.min_temp, 5.0);
        assert_eq!(monitor.max_temp, 30.0);
        assert_eq!(monitor.range_policy, RangePolicy::RejectInverted);
        assert!(monitor.lookup_metadata);
        assert!(monitor.threshold_controls);
        assert_eq!(monitor.value_key, "temperature");
    }

    #[test]
    fn test_display_name_fallback() {
        let monitor = MonitorConfig::new("zigbee2mqtt/Cellar");
        assert_eq!(monitor.display_name(), "Heat Monitor zigbee2mqtt/Cellar");
        assert_eq!(monitor.monitor_id(), "heat_monitor_zigbee2mqtt_cellar");

        let monitor = monitor.with_name("Wine Cellar");
        assert_eq!(monitor.monitor_id(), "wine_cellar");
    }

    #[test]
    fn test_explicit_id_wins() {
        let mut monitor = MonitorConfig::new("zigbee2mqtt/Cellar").with_name("Wine Cellar");
        monitor.id = Some("cellar".to_string());
        assert_eq!(monitor.monitor_id(), "cellar");
    }

    #[test]
    fn test_non_ascii_name_falls_back_to_source() {
        let monitor = MonitorConfig::new("zigbee2mqtt/serre").with_name("温室");
        assert_eq!(monitor.display_name(), "温室");
        assert_eq!(monitor.monitor_id(), "zigbee2mqtt_serre");
        assert!(monitor.validate().is_ok());

        let monitor = MonitorConfig::new("温室").with_name("温室");
        assert!(matches!(
            monitor.validate(),
            Err(MonitorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("  Living Room (North) "), "living_room_north");
        assert_eq!(slugify("Étage 2"), "tage_2");
    }

    #[test]
    fn test_validate_rejects_duplicate_sources() {
        let mut config = Config::default();
        config.monitors = vec![
            MonitorConfig::new("zigbee2mqtt/Cellar").with_name("A"),
            MonitorConfig::new("zigbee2mqtt/Cellar").with_name("B"),
        ];
        assert!(matches!(
            config.validate(),
            Err(MonitorError::DuplicateSource(_))
        ));
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let mut config = Config::default();
        config.monitors = vec![MonitorConfig::new("zigbee2mqtt/Cellar").with_thresholds(30.0, 5.0)];
        assert!(matches!(
            config.validate(),
            Err(MonitorError::InvertedRange { .. })
        ));

        config.monitors[0].range_policy = RangePolicy::AllowInverted;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_monitor_file_is_empty() {
        let mut config = Config::default();
        config.monitors_path = PathBuf::from("/nonexistent/heat-monitor/monitors.json");
        config.load_monitors().unwrap();
        assert!(config.monitors.is_empty());
    }
}
