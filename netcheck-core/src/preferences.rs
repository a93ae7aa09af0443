//! User preferences kept in the key-value store

use crate::error::Result;
use crate::network_analyzer::LatencyTarget;
use crate::store::{KeyValueStore, get_json, set_json};
use serde::{Deserialize, Serialize};

pub const PREFERENCES_KEY: &str = "preferences";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    /// Typewriter effect on status lines
    #[serde(default = "default_animation_enabled")]
    pub animation_enabled: bool,
    /// Endpoint used by latency probes
    #[serde(default)]
    pub latency_target: LatencyTarget,
}

fn default_animation_enabled() -> bool {
    true
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            animation_enabled: default_animation_enabled(),
            latency_target: LatencyTarget::default(),
        }
    }
}

impl Preferences {
    /// Stored preferences, or defaults when absent or malformed
    pub fn load(store: &dyn KeyValueStore) -> Self {
        get_json(store, PREFERENCES_KEY).unwrap_or_default()
    }

    pub fn save(&self, store: &mut dyn KeyValueStore) -> Result<()> {
        set_json(store, PREFERENCES_KEY, self)
    }
}
