//! Engine configuration
//!
//! Every field has a default so a partial JSON document is enough to override
//! a single setting.

use serde::{Deserialize, Serialize};

use crate::normalizer::DEFAULT_JOINT_SCALE;
use crate::presence::DEFAULT_DROP_FRAMES;
use crate::types::DEFAULT_TIMEOUT_MS;

/// Who owns a gesture's progress counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressScope {
    /// One counter per gesture, advanced by whichever player satisfies the step.
    /// Two players performing the same gesture interfere with each other.
    #[default]
    Shared,
    /// One counter per (player, gesture)
    PerPlayer,
}

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub progress_scope: ProgressScope,
    /// Multiplier applied to raw sensor coordinates
    pub joint_scale: f32,
    /// Capture a player's snapshot the first frame it has none
    pub seed_snapshots: bool,
    /// Timeout given to gestures created through the configuration API
    pub default_timeout_ms: u64,
    /// Frames a player may be absent before the presence tracker removes it
    pub presence_drop_frames: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            progress_scope: ProgressScope::default(),
            joint_scale: DEFAULT_JOINT_SCALE,
            seed_snapshots: true,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            presence_drop_frames: DEFAULT_DROP_FRAMES,
        }
    }
}

impl EngineConfig {
    pub fn per_player() -> Self {
        Self {
            progress_scope: ProgressScope::PerPlayer,
            ..Self::default()
        }
    }

    /// Load configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{"progress_scope": "per_player"}"#).unwrap();

        assert_eq!(config.progress_scope, ProgressScope::PerPlayer);
        assert_eq!(config.joint_scale, DEFAULT_JOINT_SCALE);
        assert!(config.seed_snapshots);
        assert_eq!(config.presence_drop_frames, DEFAULT_DROP_FRAMES);
    }

    #[test]
    fn test_round_trip() {
        let config = EngineConfig {
            joint_scale: 1.0,
            seed_snapshots: false,
            ..EngineConfig::per_player()
        };
        let loaded = EngineConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_unknown_scope_rejected() {
        assert!(EngineConfig::from_json(r#"{"progress_scope": "global"}"#).is_err());
    }
}
