//! Probe configuration with serde support for YAML/JSON files.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

use crate::error::{ProbeError, ProbeResult};
use crate::probe::MIN_POLLING_INTERVAL;

pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(1);

/// Which question the probe answers for the orchestrator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// Liveness: is the application healthy
    #[default]
    Health,
    /// Readiness: is the application available to take work
    Availability,
}

impl std::fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeKind::Health => write!(f, "health"),
            ProbeKind::Availability => write!(f, "availability"),
        }
    }
}

fn default_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_polling_interval() -> Duration {
    DEFAULT_POLLING_INTERVAL
}

/// Probe configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeConfig {
    /// Address to listen on, all IPv4 interfaces by default
    #[serde(default = "default_address")]
    pub address: IpAddr,
    pub port: u16,
    /// Time between predicate evaluations, e.g. "1s" or "250ms"
    #[serde(default = "default_polling_interval", with = "humantime_duration")]
    pub polling_interval: Duration,
    #[serde(default)]
    pub kind: ProbeKind,
}

impl ProbeConfig {
    pub fn new(port: u16) -> Self {
        Self {
            address: default_address(),
            port,
            polling_interval: DEFAULT_POLLING_INTERVAL,
            kind: ProbeKind::default(),
        }
    }

    pub fn validate(&self) -> ProbeResult<()> {
        if self.port < 1 {
            return Err(ProbeError::InvalidPort(self.port));
        }
        if self.polling_interval < MIN_POLLING_INTERVAL {
            return Err(ProbeError::InvalidPollingInterval(self.polling_interval));
        }
        Ok(())
    }

    pub fn from_yaml_str(content: &str) -> ProbeResult<Self> {
        let config: Self = serde_yaml::from_str(content).map_err(ProbeError::config)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> ProbeResult<Self> {
        let config: Self = serde_json::from_str(content).map_err(ProbeError::config)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.json` file, or YAML for any other extension
    pub fn from_path(path: &Path) -> ProbeResult<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_yaml_str(&content),
        }
    }
}

mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(D::Error::custom)
    }
}
