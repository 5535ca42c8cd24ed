//! TOML configuration: bridge settings plus the engine modules it can load.
//!
//! ```toml
//! [bridge]
//! pending_policy = "queue"
//! exec_timeout_ms = 5000
//! default_module = "gforth"
//!
//! [modules.gforth]
//! command = "gforth"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use crate::bridge::BridgeConfig;
use crate::consts::{DEFAULT_SYNC_COMMAND, DEFAULT_SYNC_MARKER, default_config_path};
use crate::engine::loader::ModuleRegistry;
use crate::engine::process::ProcessModule;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// External interpreters, keyed by the name an `initialize` message uses.
    #[serde(default)]
    pub modules: BTreeMap<String, ModuleConfig>,
}

/// How to launch and talk to one external interpreter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Written after every command. Must make the interpreter print `sync_marker`.
    #[serde(default = "default_sync_command")]
    pub sync_command: String,

    #[serde(default = "default_sync_marker")]
    pub sync_marker: String,

    #[serde(default)]
    pub description: Option<String>,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            env: HashMap::new(),
            sync_command: default_sync_command(),
            sync_marker: default_sync_marker(),
            description: None,
        }
    }
}

fn default_sync_command() -> String {
    DEFAULT_SYNC_COMMAND.to_string()
}

fn default_sync_marker() -> String {
    DEFAULT_SYNC_MARKER.to_string()
}

impl Config {
    /// Load from the default path (`~/.forth-bridge/config.toml`).
    pub fn load() -> Result<Self> {
        Self::load_from(&default_config_path())
    }

    /// Load from `path`. A missing file gives the defaults; a malformed one is an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content)
                .with_context(|| format!("invalid config file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => {
                Err(e).with_context(|| format!("failed to read config file {}", path.display()))
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("failed to parse config")
    }

    /// A registry holding one process module per `[modules.*]` entry.
    pub async fn registry(&self) -> Arc<ModuleRegistry> {
        let registry = Arc::new(ModuleRegistry::new());
        for (name, module) in &self.modules {
            registry
                .register(Arc::new(ProcessModule::new(name, module.clone())))
                .await;
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::PendingPolicy;
    use std::time::Duration;

    #[test]
    fn empty_config_is_default() {
        let config = Config::parse("").unwrap();
        assert!(config.modules.is_empty());
        assert_eq!(config.bridge, BridgeConfig::default());
    }

    #[test]
    fn parses_bridge_section() {
        let config = Config::parse(
            r#"
            [bridge]
            pending_policy = "reject"
            max_pending = 8
            exec_timeout_ms = 250
            default_module = "gforth"
            "#,
        )
        .unwrap();
        assert_eq!(config.bridge.pending_policy, PendingPolicy::Reject);
        assert_eq!(config.bridge.max_pending, 8);
        assert_eq!(config.bridge.exec_timeout(), Duration::from_millis(250));
        assert_eq!(config.bridge.default_module.as_deref(), Some("gforth"));
    }

    #[test]
    fn parses_module_with_defaults() {
        let config = Config::parse(
            r#"
            [modules.gforth]
            command = "gforth"
            args = ["-e", "warnings off"]
            "#,
        )
        .unwrap();
        let module = &config.modules["gforth"];
        assert_eq!(module.command, "gforth");
        assert_eq!(module.args, vec!["-e", "warnings off"]);
        assert_eq!(module.sync_marker, DEFAULT_SYNC_MARKER);
        assert_eq!(module.sync_command, DEFAULT_SYNC_COMMAND);
        assert!(module.env.is_empty());
    }

    #[test]
    fn module_requires_command() {
        let result = Config::parse(
            r#"
            [modules.broken]
            args = []
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn unknown_policy_is_rejected() {
        let result = Config::parse(
            r#"
            [bridge]
            pending_policy = "sometimes"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert!(config.modules.is_empty());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[modules.cat]\ncommand = \"cat\"\nsync_command = \"--end--\"\nsync_marker = \"--end--\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.modules["cat"].sync_marker, "--end--");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[bridge\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("invalid config file"));
    }

    #[tokio::test]
    async fn registry_holds_configured_modules() {
        let config = Config::parse(
            r#"
            [modules.gforth]
            command = "gforth"
            [modules.pforth]
            command = "pforth"
            description = "Portable Forth"
            "#,
        )
        .unwrap();

        let names: Vec<_> = config
            .registry()
            .await
            .descriptions()
            .await
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["gforth", "pforth"]);
    }
}
