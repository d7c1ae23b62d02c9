//! Configuration for a Hashi sandbox session.

pub mod protocol;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration shared by the host and the sandbox client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashiConfig {
    /// Mediator configuration
    pub mediator: MediatorConfig,
    /// Virtual clock configuration
    pub clock: ClockConfig,
    /// xAPI shim configuration
    pub xapi: XApiConfig,
    /// The learner and the frame being served
    pub session: SessionConfig,
}

impl HashiConfig {
    /// Load config from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Mediator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediatorConfig {
    /// How long a request waits for its reply (milliseconds)
    pub reply_timeout_ms: u64,
}

impl MediatorConfig {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            reply_timeout_ms: 30_000,
        }
    }
}

/// Virtual clock configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// How often the host re-sends its clock (seconds)
    pub resync_interval_secs: u64,
}

impl ClockConfig {
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            resync_interval_secs: 300, // 5 minutes
        }
    }
}

/// xAPI shim configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XApiConfig {
    /// Coalescing window for high-frequency verbs (milliseconds)
    pub debounce_ms: u64,
    /// Longest a coalesced statement may be held back (milliseconds)
    pub max_wait_ms: u64,
    /// Verbs (last IRI segment) that are coalesced
    pub debounced_verbs: Vec<String>,
    /// Strip the session actor and the content's own activity before storing
    pub compress: bool,
}

impl XApiConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

impl Default for XApiConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 5_000,
            max_wait_ms: 30_000,
            debounced_verbs: vec!["answered".to_string(), "interacted".to_string()],
            compress: true,
        }
    }
}

/// The learner and the content being served.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Learner id; the default xAPI actor is derived from it
    pub user_id: Option<String>,
    /// Learner display name
    pub user_name: Option<String>,
    /// Path the content frame is served from, for cookie scoping
    pub frame_path: String,
    /// Content node id; the content's own xAPI activity is derived from it
    pub content_id: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_id: None,
            user_name: None,
            frame_path: "/".to_string(),
            content_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HashiConfig::default();
        assert_eq!(config.mediator.reply_timeout(), Duration::from_secs(30));
        assert_eq!(config.clock.resync_interval(), Duration::from_secs(300));
        assert_eq!(config.xapi.debounced_verbs, vec!["answered", "interacted"]);
        assert!(config.xapi.compress);
    }

    #[test]
    fn test_yaml_round_trip() {
        let mut config = HashiConfig::default();
        config.session.user_id = Some("learner".to_string());
        let yaml = config.to_yaml().unwrap();
        assert_eq!(HashiConfig::from_yaml(&yaml).unwrap(), config);
    }

    #[test]
    fn test_partial_yaml() {
        let config = HashiConfig::from_yaml("mediator:\n  reply_timeout_ms: 500\n").unwrap();
        assert_eq!(config.mediator.reply_timeout_ms, 500);
        assert_eq!(config.xapi, XApiConfig::default());
    }
}
