//! Startup configuration for breakers and the event channel
//!
//! ```toml
//! [channel]
//! max_subscribers_per_topic = 50
//!
//! [breakers.payment_gateway]
//! failure_threshold = 3
//! recovery_timeout_secs = 30.0
//! ```
//!
//! Every field is optional; missing ones take the documented defaults.

use crate::{
    breaker::{BreakerConfig, FaultBreaker},
    builder::BreakerBuilder,
    channel::{ChannelConfig, EventChannel},
    errors::ConfigError,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Resilience settings for one service process
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub channel: ChannelConfig,
    /// Per-dependency breaker overrides, keyed by dependency name
    pub breakers: BTreeMap<String, BreakerConfig>,
}

impl Settings {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(input)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let settings = Self::from_toml_str(&input)?;
        tracing::debug!(
            path = %path.display(),
            breakers = settings.breakers.len(),
            "loaded resilience settings"
        );
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel.max_subscribers_per_topic == 0 {
            return Err(ConfigError::InvalidThreshold {
                field: "max_subscribers_per_topic",
            });
        }
        self.breakers.values().try_for_each(BreakerConfig::validate)
    }

    /// Configuration for `dependency`, falling back to defaults
    pub fn breaker_config(&self, dependency: &str) -> BreakerConfig {
        self.breakers.get(dependency).cloned().unwrap_or_default()
    }

    /// Builder preloaded with this dependency's configuration, for adding hooks
    pub fn breaker_builder(&self, dependency: &str) -> BreakerBuilder {
        FaultBreaker::builder(dependency).config(self.breaker_config(dependency))
    }

    pub fn breaker(&self, dependency: &str) -> Result<FaultBreaker, ConfigError> {
        self.breaker_builder(dependency).build()
    }

    /// JSON-payload channel sized by these settings
    pub fn channel(&self) -> EventChannel {
        EventChannel::with_config(self.channel)
    }
}
