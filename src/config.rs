use serde_derive::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ControlError, ControlResult};

/// Tunable constants for the control socket, separated out so tests and embedding applications
/// can override them without touching the state machine. Grounded on the teacher's
/// `game::core::config::GameConfig` (serde-derived, loaded via `serdeconv::from_toml_file`).
///
/// This is the crate's own ambient configuration layer; it is unrelated to the disk-backed UI
/// configuration (site manager entries, queue persistence) that the spec explicitly excludes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Hard cap on a single unterminated reply line, per invariant I5.
    pub max_reply_line_bytes: usize,
    /// Byte threshold an upload must clear past its start offset before a transfer is considered
    /// to be making progress, per the `MadeProgress` bookkeeping in the transfer message handling.
    /// A download counts as making progress as soon as any byte at all is acknowledged.
    pub made_progress_threshold_bytes: i64,
    /// Largest chunk a rate bucket will grant in one request.
    pub rate_limiter_chunk_max_bytes: u64,
    /// How often rate buckets refill and other periodic bookkeeping runs.
    pub housekeeping_interval_secs: u64,
}

impl Default for ControlConfig {
    fn default() -> ControlConfig {
        ControlConfig {
            max_reply_line_bytes: 65_536,
            made_progress_threshold_bytes: 65_565,
            rate_limiter_chunk_max_bytes: 256 * 1024,
            housekeeping_interval_secs: 1,
        }
    }
}

impl ControlConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> ControlResult<ControlConfig> {
        serdeconv::from_toml_file(path.as_ref()).map_err(|e| ControlError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_invariant_i5_limit() {
        let config = ControlConfig::default();
        assert_eq!(config.max_reply_line_bytes, 65_536);
        assert!(config.made_progress_threshold_bytes > config.max_reply_line_bytes as i64);
    }
}
