//! Drives an external Forth executable over its stdin/stdout.
//!
//! After each command the module writes a sync command whose only effect is to
//! print a marker line. Everything read before the marker is the command's
//! output.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::loader::Module;
use super::{Interpreter, OutputBuffer, OutputSink};
use crate::config::ModuleConfig;
use crate::consts::DEFAULT_CONTEXT_ID;

struct Running {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

impl Running {
    fn spawn(config: &ModuleConfig) -> Result<Self> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn `{}`", config.command))?;

        let stdin = child.stdin.take().context("failed to capture stdin")?;
        let stdout = child.stdout.take().context("failed to capture stdout")?;

        Ok(Self {
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
        })
    }

    async fn write_line(&mut self, text: &str) -> Result<()> {
        self.stdin.write_all(text.trim_end_matches('\n').as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        Ok(())
    }

    /// Send the sync command and copy output into `out` until the marker shows up.
    async fn sync(&mut self, config: &ModuleConfig, out: &mut dyn OutputSink) -> Result<()> {
        self.write_line(&config.sync_command).await?;
        self.stdin.flush().await.context("interpreter closed its input")?;

        // An interpreter that echoes its input would otherwise stop at the echoed
        // sync command. Only that one line is dropped.
        let mut echo_pending = config.sync_command != config.sync_marker;
        let mut line = String::new();
        loop {
            line.clear();
            let n = self.stdout.read_line(&mut line).await?;
            if n == 0 {
                bail!("interpreter exited");
            }
            if echo_pending && line.trim_end_matches(['\r', '\n']) == config.sync_command {
                echo_pending = false;
                continue;
            }
            if let Some(idx) = line.find(&config.sync_marker) {
                out.emit(&line[..idx]);
                return Ok(());
            }
            out.emit(&line);
        }
    }
}

/// A running external interpreter. Respawned on demand after it exits or is recovered.
pub struct ProcessInterpreter {
    name: String,
    config: ModuleConfig,
    running: Option<Running>,
    banner: String,
}

impl ProcessInterpreter {
    /// Spawn the interpreter and wait for its first sync marker.
    pub async fn spawn(name: &str, config: ModuleConfig) -> Result<Self> {
        let (running, banner) = Self::start(name, &config).await?;
        Ok(Self {
            name: name.to_string(),
            config,
            running: Some(running),
            banner,
        })
    }

    async fn start(name: &str, config: &ModuleConfig) -> Result<(Running, String)> {
        let mut running = Running::spawn(config)?;
        let mut banner = OutputBuffer::new();
        running
            .sync(config, &mut banner)
            .await
            .with_context(|| format!("`{name}` did not answer the sync handshake"))?;
        let banner = banner.drain();
        debug!(module = %name, banner = %banner.trim(), "interpreter started");
        Ok((running, banner))
    }

    async fn running(&mut self) -> Result<&mut Running> {
        if self.running.is_none() {
            info!(module = %self.name, "respawning interpreter");
            let (running, banner) = Self::start(&self.name, &self.config).await?;
            self.banner = banner;
            self.running = Some(running);
        }
        self.running
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("interpreter is not running"))
    }
}

#[async_trait]
impl Interpreter for ProcessInterpreter {
    async fn execute(
        &mut self,
        context_id: u32,
        command: &str,
        out: &mut dyn OutputSink,
    ) -> Result<()> {
        if context_id != DEFAULT_CONTEXT_ID {
            bail!("context {context_id} is not available");
        }

        let config = self.config.clone();
        let running = self.running().await?;
        let result = async {
            running.write_line(command).await?;
            running.sync(&config, out).await
        }
        .await;

        if result.is_err() {
            // The stream position is unknown now; start fresh next time.
            self.running = None;
        }
        result
    }

    async fn recover(&mut self) -> Result<()> {
        if let Some(mut running) = self.running.take() {
            warn!(module = %self.name, "killing interpreter");
            running.child.kill().await.context("failed to kill interpreter")?;
        }
        Ok(())
    }

    fn version(&self) -> Option<String> {
        self.banner
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
    }
}

/// A configured external interpreter, registered under its config key.
pub struct ProcessModule {
    name: String,
    description: String,
    config: ModuleConfig,
}

impl ProcessModule {
    pub fn new(name: &str, config: ModuleConfig) -> Self {
        let description = config
            .description
            .clone()
            .unwrap_or_else(|| format!("external interpreter `{}`", config.command));
        Self {
            name: name.to_string(),
            description,
            config,
        }
    }
}

#[async_trait]
impl Module for ProcessModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn instantiate(&self) -> Result<Box<dyn Interpreter>> {
        let interp = ProcessInterpreter::spawn(&self.name, self.config.clone()).await?;
        Ok(Box::new(interp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_defaults_to_command() {
        let module = ProcessModule::new(
            "gforth",
            ModuleConfig {
                command: "gforth".to_string(),
                ..ModuleConfig::default()
            },
        );
        assert_eq!(module.description(), "external interpreter `gforth`");
    }

    #[test]
    fn description_from_config() {
        let module = ProcessModule::new(
            "gforth",
            ModuleConfig {
                command: "gforth".to_string(),
                description: Some("GNU Forth".to_string()),
                ..ModuleConfig::default()
            },
        );
        assert_eq!(module.description(), "GNU Forth");
    }
}
