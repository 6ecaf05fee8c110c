use std::path::{Path, PathBuf};
use std::time::Duration;

use jardim_bridge::BridgeConfig;
use jardim_link::mock::{MockDevice, MockLink, MockRead};
use jardim_link::{Platform, SessionConfig};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub platform: Platform,
    pub bridge: BridgeConfig,
    pub provisioning: ProvisioningConfig,
    pub storage: StorageConfig,
    pub link: LinkConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// Seconds a link connection attempt may take
    pub connect_timeout_secs: u64,
    /// Seconds between status reads
    pub poll_interval_secs: u64,
    /// Status reads before giving up
    pub max_attempts: u32,
    /// Seconds a scan runs before stopping on its own
    pub scan_timeout_secs: u64,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            connect_timeout_secs: session.connect_timeout.as_secs(),
            poll_interval_secs: session.poll_interval.as_secs(),
            max_attempts: session.max_attempts,
            scan_timeout_secs: session.scan_timeout.as_secs(),
        }
    }
}

impl From<&ProvisioningConfig> for SessionConfig {
    fn from(config: &ProvisioningConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            max_attempts: config.max_attempts,
            scan_timeout: Duration::from_secs(config.scan_timeout_secs),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Memory,
    File { path: PathBuf },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LinkConfig {
    Mock {
        /// Simulated pots in radio range
        #[serde(default)]
        devices: Vec<MockPotConfig>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct MockPotConfig {
    /// Link address of the simulated controller
    pub address: String,
    pub name: Option<String>,
    /// Address reported once the pot joins the network
    #[serde(default = "default_mock_ip")]
    pub ip: String,
    /// Status reads answered with "connecting" before the join
    #[serde(default = "default_joins_after")]
    pub joins_after: usize,
    /// Reject every credential
    #[serde(default)]
    pub rejects: bool,
}

fn default_mock_ip() -> String {
    "192.168.1.50".to_string()
}

fn default_joins_after() -> usize {
    2
}

impl MockPotConfig {
    pub fn device(&self) -> MockDevice {
        let mut device = MockDevice::new(self.address.as_str());
        if let Some(name) = &self.name {
            device = device.named(name);
        }

        let mut reads = vec![MockRead::status("connecting"); self.joins_after];
        reads.push(if self.rejects {
            MockRead::status("fail")
        } else {
            MockRead::joined(&self.ip)
        });
        device.reads(reads)
    }
}

impl LinkConfig {
    pub fn mock_link(&self) -> MockLink {
        match self {
            LinkConfig::Mock { devices } => MockLink::new(devices.iter().map(MockPotConfig::device)),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> color_eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::File {
            path: PathBuf::from("jardim-store.json"),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig::Mock {
            devices: vec![MockPotConfig {
                address: "AA:BB:CC:DD:EE:01".to_string(),
                name: Some("ESP32-Pot".to_string()),
                ip: default_mock_ip(),
                joins_after: default_joins_after(),
                rejects: false,
            }],
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            platform: Platform::Desktop,
            bridge: BridgeConfig::default(),
            provisioning: ProvisioningConfig::default(),
            storage: StorageConfig::default(),
            link: LinkConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [bridge]
            host = "broker.local"

            [storage]
            type = "memory"
            "#,
        )
        .unwrap();

        assert_eq!(config.bridge.host, "broker.local");
        assert_eq!(config.bridge.port, 1883);
        assert_eq!(config.provisioning.max_attempts, 20);
        assert!(matches!(config.storage, StorageConfig::Memory));
        assert!(matches!(config.link, LinkConfig::Mock { ref devices } if devices.len() == 1));
    }

    #[test]
    fn tagged_backends() {
        let config: Config = toml::from_str(
            r#"
            [platform]
            type = "android"
            api_level = 33

            [storage]
            type = "file"
            path = "/var/lib/jardim/store.json"

            [link]
            type = "mock"

            [[link.devices]]
            address = "AA:BB:CC:DD:EE:09"
            rejects = true
            "#,
        )
        .unwrap();

        assert_eq!(config.platform, Platform::Android { api_level: 33 });
        assert!(matches!(config.storage, StorageConfig::File { .. }));
        let LinkConfig::Mock { devices } = &config.link;
        assert_eq!(devices[0].joins_after, 2);
        assert!(devices[0].rejects);
    }

    #[test]
    fn session_config_from_seconds() {
        let session = SessionConfig::from(&ProvisioningConfig::default());
        assert_eq!(session, SessionConfig::default());
    }
}
