use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

use super::loader::Module;
use super::{Interpreter, OutputSink};

/// What a scripted interpreter does for one command.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Print this text.
    Output(String),
    /// Print these fragments one after another.
    Chunks(Vec<String>),
    /// Print nothing.
    Silent,
    /// Return an error.
    Fault(String),
    /// Panic inside execute.
    Panic(String),
    /// Never return.
    Hang,
}

type History = Arc<Mutex<Vec<(u32, String)>>>;

/// The history stays readable even if a test thread panicked while holding it.
fn history(executed: &History) -> MutexGuard<'_, Vec<(u32, String)>> {
    executed.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A scripted interpreter for tests. Answers exact command texts from a table.
pub struct ScriptedInterpreter {
    replies: HashMap<String, Reply>,
    executed: History,
    recoveries: Arc<AtomicUsize>,
    fail_recovery: bool,
}

#[async_trait]
impl Interpreter for ScriptedInterpreter {
    async fn execute(
        &mut self,
        context_id: u32,
        command: &str,
        out: &mut dyn OutputSink,
    ) -> Result<()> {
        history(&self.executed).push((context_id, command.to_string()));

        let reply = self
            .replies
            .get(command)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("ScriptedInterpreter: no reply for `{command}`"))?;

        match reply {
            Reply::Output(text) => out.emit(&text),
            Reply::Chunks(chunks) => {
                for chunk in &chunks {
                    out.emit(chunk);
                    tokio::task::yield_now().await;
                }
            }
            Reply::Silent => {}
            Reply::Fault(reason) => bail!(reason),
            Reply::Panic(reason) => panic!("{reason}"),
            Reply::Hang => std::future::pending::<()>().await,
        }
        Ok(())
    }

    async fn recover(&mut self) -> Result<()> {
        self.recoveries.fetch_add(1, Ordering::SeqCst);
        if self.fail_recovery {
            bail!("scripted recovery failure");
        }
        Ok(())
    }

    fn version(&self) -> Option<String> {
        Some("scripted".to_string())
    }
}

/// A scripted module. Counts instantiations and records every executed command
/// across all interpreters it hands out.
pub struct ScriptedModule {
    name: String,
    replies: HashMap<String, Reply>,
    gate: Option<Arc<Notify>>,
    failure: Option<String>,
    fail_recovery: bool,
    instantiations: AtomicUsize,
    executed: History,
    recoveries: Arc<AtomicUsize>,
}

impl ScriptedModule {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            replies: HashMap::new(),
            gate: None,
            failure: None,
            fail_recovery: false,
            instantiations: AtomicUsize::new(0),
            executed: Arc::new(Mutex::new(Vec::new())),
            recoveries: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_reply(mut self, command: &str, reply: Reply) -> Self {
        self.replies.insert(command.to_string(), reply);
        self
    }

    /// Hold instantiation until `gate` is notified.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Fail instantiation with `reason`.
    pub fn failing(mut self, reason: &str) -> Self {
        self.failure = Some(reason.to_string());
        self
    }

    /// Make `recover()` fail on the interpreters this module hands out.
    pub fn failing_recovery(mut self) -> Self {
        self.fail_recovery = true;
        self
    }

    pub fn instantiations(&self) -> usize {
        self.instantiations.load(Ordering::SeqCst)
    }

    pub fn recoveries(&self) -> usize {
        self.recoveries.load(Ordering::SeqCst)
    }

    /// Commands executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        history(&self.executed)
            .iter()
            .map(|(_, cmd)| cmd.clone())
            .collect()
    }

    pub fn executed_contexts(&self) -> Vec<u32> {
        history(&self.executed).iter().map(|(id, _)| *id).collect()
    }
}

#[async_trait]
impl Module for ScriptedModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Scripted interpreter with fixed replies"
    }

    async fn instantiate(&self) -> Result<Box<dyn Interpreter>> {
        self.instantiations.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(reason) = &self.failure {
            bail!("{reason}");
        }
        Ok(Box::new(ScriptedInterpreter {
            replies: self.replies.clone(),
            executed: Arc::clone(&self.executed),
            recoveries: Arc::clone(&self.recoveries),
            fail_recovery: self.fail_recovery,
        }))
    }
}
