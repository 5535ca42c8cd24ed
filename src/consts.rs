//! Project-wide constants.

use std::path::PathBuf;

pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The only interpreter context exercised today.
pub const DEFAULT_CONTEXT_ID: u32 = 0;

/// Per-command execution budget.
pub const DEFAULT_EXEC_TIMEOUT_MS: u64 = 5_000;

/// Budget for resolving and starting the engine module.
pub const DEFAULT_LOAD_TIMEOUT_MS: u64 = 30_000;

/// Commands buffered while the engine is still loading.
pub const DEFAULT_MAX_PENDING: usize = 256;

/// Capacity of the inbound and outbound bridge channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Line the process engine waits for to know a command is finished.
pub const DEFAULT_SYNC_MARKER: &str = "--bridge-sync--";

/// Standard Forth: `.(` prints its text immediately, `cr` ends the line.
pub const DEFAULT_SYNC_COMMAND: &str = ".( --bridge-sync--) cr";

/// Default config path: `~/.forth-bridge/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".forth-bridge")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consts_are_non_empty() {
        assert!(!AUTHOR.is_empty());
        assert!(!VERSION.is_empty());
        assert!(!DEFAULT_SYNC_MARKER.is_empty());
    }

    #[test]
    fn consts_from_cargo_toml() {
        assert!(AUTHOR.contains("Assaf Sapir"));
    }

    #[test]
    fn sync_command_prints_marker() {
        assert!(DEFAULT_SYNC_COMMAND.contains(DEFAULT_SYNC_MARKER));
    }

    #[test]
    fn default_config_path_ends_with_file_name() {
        let path = default_config_path();
        assert!(path.ends_with(".forth-bridge/config.toml"));
    }
}
