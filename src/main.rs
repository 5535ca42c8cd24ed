use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use forth_bridge::bridge::{self, Control, PendingPolicy};
use forth_bridge::config::Config;
use forth_bridge::consts::{AUTHOR, VERSION};
use forth_bridge::transport::{self, Framing};

#[derive(Debug, Clone, ValueEnum)]
enum Policy {
    Queue,
    Reject,
}

#[derive(Parser)]
#[command(
    name = "forth-bridge",
    version,
    author = AUTHOR,
    about = "Relay commands between a host and an isolated Forth interpreter."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Config file (default: ~/.forth-bridge/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Load this module at startup instead of waiting for an initialize message
    #[arg(short, long)]
    module: Option<String>,

    /// What to do with commands sent before the engine is ready
    #[arg(long, value_enum)]
    policy: Option<Policy>,

    /// Per-command execution timeout in milliseconds
    #[arg(short, long)]
    timeout_ms: Option<u64>,

    /// Maximum commands buffered while the engine loads
    #[arg(long)]
    max_pending: Option<usize>,

    /// Plain-text framing: every input line is a command, output is raw
    #[arg(long, default_value_t = false)]
    text: bool,

    /// Log filter, e.g. "info" or "forth_bridge=debug"
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Command {
    /// List the engine modules the config file defines
    Modules,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries the protocol, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log_level))
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let registry = config.registry().await;

    if let Some(Command::Modules) = cli.command {
        let modules = registry.descriptions().await;
        if modules.is_empty() {
            println!("no modules configured");
        }
        for module in modules {
            println!("  {:<16} {}", module.name, module.description);
        }
        return Ok(());
    }

    let mut bridge_config = config.bridge.clone();
    if let Some(policy) = cli.policy {
        bridge_config.pending_policy = match policy {
            Policy::Queue => PendingPolicy::Queue,
            Policy::Reject => PendingPolicy::Reject,
        };
    }
    if let Some(ms) = cli.timeout_ms {
        bridge_config.exec_timeout_ms = ms;
    }
    if let Some(n) = cli.max_pending {
        bridge_config.max_pending = n;
    }

    let framing = if cli.text { Framing::Text } else { Framing::Json };
    // Text framing has no way to send control messages, so it always starts loaded.
    let init = if cli.module.is_some() || framing == Framing::Text {
        Some(Control::Initialize {
            module_ref: cli.module.clone(),
        })
    } else {
        None
    };

    info!(
        version = VERSION,
        policy = ?bridge_config.pending_policy,
        timeout_ms = bridge_config.exec_timeout_ms,
        "starting forth-bridge"
    );

    let handle = bridge::spawn(registry, bridge_config);

    tokio::select! {
        result = transport::serve(tokio::io::stdin(), tokio::io::stdout(), handle, framing, init) => {
            if let Err(e) = result {
                eprintln!("error: {e:#}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
        }
    }

    Ok(())
}
