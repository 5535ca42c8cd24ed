#![cfg(unix)]

use std::sync::Arc;

use forth_bridge::bridge::{self, BridgeConfig, Inbound, Outbound};
use forth_bridge::config::ModuleConfig;
use forth_bridge::engine::loader::{Module, ModuleRegistry};
use forth_bridge::engine::process::{ProcessInterpreter, ProcessModule};
use forth_bridge::engine::{Interpreter, OutputBuffer};

/// `cat` echoes everything, so the sync command is the marker itself.
fn cat() -> ModuleConfig {
    ModuleConfig {
        command: "cat".to_string(),
        sync_command: "--end--".to_string(),
        sync_marker: "--end--".to_string(),
        ..ModuleConfig::default()
    }
}

/// Echoes input lines and prints MARK after reading `sync`, like a Forth
/// that echoes its input.
fn echoing_shell() -> ModuleConfig {
    ModuleConfig {
        command: "sh".to_string(),
        args: vec![
            "-c".to_string(),
            r#"while read -r l; do echo "$l"; if [ "$l" = "sync" ]; then echo MARK; fi; done"#
                .to_string(),
        ],
        sync_command: "sync".to_string(),
        sync_marker: "MARK".to_string(),
        ..ModuleConfig::default()
    }
}

async fn run(interp: &mut ProcessInterpreter, command: &str) -> anyhow::Result<String> {
    let mut out = OutputBuffer::new();
    interp.execute(0, command, &mut out).await?;
    Ok(out.drain())
}

#[tokio::test]
async fn cat_echoes_each_command() {
    let mut interp = ProcessInterpreter::spawn("cat", cat()).await.unwrap();

    assert_eq!(run(&mut interp, "3 SQUARE .").await.unwrap(), "3 SQUARE .\n");
    assert_eq!(run(&mut interp, "WORDS").await.unwrap(), "WORDS\n");
}

#[tokio::test]
async fn echoed_sync_command_is_skipped() {
    let mut interp = ProcessInterpreter::spawn("sh", echoing_shell()).await.unwrap();

    assert_eq!(run(&mut interp, "hello").await.unwrap(), "hello\n");
    assert_eq!(run(&mut interp, "again").await.unwrap(), "again\n");
}

#[tokio::test]
async fn output_mentioning_the_sync_command_is_kept() {
    let mut interp = ProcessInterpreter::spawn("sh", echoing_shell()).await.unwrap();

    assert_eq!(run(&mut interp, "async io").await.unwrap(), "async io\n");
    assert_eq!(run(&mut interp, "resync").await.unwrap(), "resync\n");
}

#[tokio::test]
async fn other_contexts_are_rejected() {
    let mut interp = ProcessInterpreter::spawn("cat", cat()).await.unwrap();
    let mut out = OutputBuffer::new();

    let err = interp.execute(1, "WORDS", &mut out).await.unwrap_err();
    assert!(err.to_string().contains("context 1"));
}

#[tokio::test]
async fn recover_respawns_on_next_call() {
    let mut interp = ProcessInterpreter::spawn("cat", cat()).await.unwrap();

    interp.recover().await.unwrap();
    assert_eq!(run(&mut interp, "after").await.unwrap(), "after\n");
}

#[tokio::test]
async fn exiting_interpreter_fails_the_handshake() {
    let config = ModuleConfig {
        command: "true".to_string(),
        ..cat()
    };
    let err = ProcessInterpreter::spawn("true", config).await.err().unwrap();
    assert!(format!("{err:#}").contains("did not answer the sync handshake"));
}

#[tokio::test]
async fn missing_executable_fails_to_spawn() {
    let module = ProcessModule::new(
        "ghost",
        ModuleConfig {
            command: "/nonexistent/forth".to_string(),
            ..cat()
        },
    );
    let err = module.instantiate().await.err().unwrap();
    assert!(err.to_string().contains("failed to spawn"));
}

#[tokio::test]
async fn bridge_drives_a_process_module() {
    let registry = Arc::new(ModuleRegistry::new());
    registry
        .register(Arc::new(ProcessModule::new("cat", cat())))
        .await;
    let mut handle = bridge::spawn(registry, BridgeConfig::default());

    handle.send(Inbound::initialize("cat")).await.unwrap();
    handle.send(Inbound::command("3 SQUARE .")).await.unwrap();

    assert!(handle.recv().await.unwrap().is_ready());
    assert_eq!(
        handle.recv().await.unwrap(),
        Outbound::Response("3 SQUARE .\n".to_string())
    );
}
