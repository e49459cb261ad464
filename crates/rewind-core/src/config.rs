//! Limits applied to walks and loop records.
//!
//! Every field has a default, so an empty config file is valid. Files are
//! loaded by the `rewind-data` crate; this module only defines the shape.

use serde::{Deserialize, Serialize};

/// Errors reported by [`RewindConfig::validate`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} = {value} is invalid: {reason}")]
    InvalidLimit {
        field: &'static str,
        value: usize,
        reason: &'static str,
    },
}

/// Limits for serialize/deserialize walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkConfig {
    /// Maximum nesting of shared references before the walk is aborted.
    /// Plain values nest only as deep as their types do and are not counted.
    pub max_depth: usize,
    /// Largest length prefix accepted for strings, byte blobs and sequences.
    pub max_sequence_len: usize,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            max_depth: 512,
            max_sequence_len: 16 * 1024 * 1024,
        }
    }
}

/// Limits for reading and writing loop records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Longest comment accepted, in bytes.
    pub max_comment_len: usize,
    /// Largest payload accepted, in bytes. Never above `i32::MAX`.
    pub max_payload_len: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_comment_len: 1024,
            max_payload_len: 256 * 1024 * 1024,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RewindConfig {
    pub walk: WalkConfig,
    #[serde(rename = "loop")]
    pub loops: LoopConfig,
}

impl RewindConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.walk.max_depth == 0 {
            return Err(ConfigError::InvalidLimit {
                field: "walk.max_depth",
                value: 0,
                reason: "must be at least 1",
            });
        }
        if self.walk.max_sequence_len > u32::MAX as usize {
            return Err(ConfigError::InvalidLimit {
                field: "walk.max_sequence_len",
                value: self.walk.max_sequence_len,
                reason: "length prefixes are 32-bit",
            });
        }
        if self.loops.max_payload_len > i32::MAX as usize {
            return Err(ConfigError::InvalidLimit {
                field: "loop.max_payload_len",
                value: self.loops.max_payload_len,
                reason: "payload length is a signed 32-bit field",
            });
        }
        Ok(())
    }
}
