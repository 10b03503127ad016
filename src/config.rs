//! Static platform configuration.
//! Serde-deserialized with per-field defaults; unknown devices fall back to their mac.

use crate::protocol::UDP_BIND_PORT;
use serde::Deserialize;
use tokio::time::Duration;

/// Per-device entry from the static configuration, keyed by mac.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DeviceConfig {
    pub mac: String,
    /// Display name; the mac is used when absent
    pub name: Option<String>,
    /// Disabled devices are never registered and get removed if already known
    #[serde(default)]
    pub disabled: bool,
}

/// Platform-wide configuration with the vendor defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub name: String,
    /// Local UDP port the discovery socket binds to
    pub port: u16,
    /// Number of discovery broadcasts before scanning stops; 0 scans forever
    pub scan_count: u32,
    /// Milliseconds between discovery broadcasts
    pub scan_interval: u64,
    /// Milliseconds between status polls; 0 polls once at startup only
    pub check_status_interval: u64,
    /// Language code for the product type lookup
    pub language: String,
    pub devices: Vec<DeviceConfig>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            name: "Cozylife platform".to_string(),
            port: UDP_BIND_PORT,
            scan_count: 10,
            scan_interval: 3000,
            check_status_interval: 10000,
            language: "zh-CN".to_string(),
            devices: Vec::new(),
        }
    }
}

impl PlatformConfig {
    /// Look up the static entry for a device, if any.
    pub fn device(&self, mac: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.mac == mac)
    }

    /// Configured display name for a device, falling back to its mac.
    pub fn display_name(&self, mac: &str) -> String {
        self.device(mac)
            .and_then(|d| d.name.clone())
            .unwrap_or_else(|| mac.to_string())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval)
    }

    pub fn check_status_interval(&self) -> Duration {
        Duration::from_millis(self.check_status_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_vendor_values() {
        let config = PlatformConfig::default();
        assert_eq!(config.port, 5555);
        assert_eq!(config.scan_count, 10);
        assert_eq!(config.scan_interval(), Duration::from_millis(3000));
        assert_eq!(config.check_status_interval(), Duration::from_millis(10000));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: PlatformConfig = serde_json::from_str(
            r#"{ "scan_count": 3, "devices": [ { "mac": "aa:bb", "disabled": true } ] }"#,
        )
        .unwrap();
        assert_eq!(config.scan_count, 3);
        assert_eq!(config.port, 5555);
        assert!(config.device("aa:bb").unwrap().disabled);
        assert!(config.device("cc:dd").is_none());
        assert_eq!(config.display_name("aa:bb"), "aa:bb");
    }

    #[test]
    fn display_name_prefers_configured_name() {
        let config: PlatformConfig = serde_json::from_str(
            r#"{ "devices": [ { "mac": "aa:bb", "name": "Desk lamp" } ] }"#,
        )
        .unwrap();
        assert_eq!(config.display_name("aa:bb"), "Desk lamp");
    }
}
