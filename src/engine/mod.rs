pub mod loader;
pub mod mock;
pub mod process;

use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{EngineError, LoadError};

/// Where an interpreter writes what it prints.
pub trait OutputSink: Send {
    fn emit(&mut self, text: &str);
}

/// Per-call output buffer. Drained after every execute.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    text: String,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything emitted so far, leaving the buffer empty.
    pub fn drain(&mut self) -> String {
        std::mem::take(&mut self.text)
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl OutputSink for OutputBuffer {
    fn emit(&mut self, text: &str) {
        self.text.push_str(text);
    }
}

/// The opaque interpreter. Could be an external process, a scripted double, or
/// an embedded VM.
///
/// Implementations must be cooperative: a call that never awaits cannot be
/// preempted by the adapter's timeout.
#[async_trait]
pub trait Interpreter: Send {
    /// Run one line through the outer interpreter under `context_id`.
    async fn execute(
        &mut self,
        context_id: u32,
        command: &str,
        out: &mut dyn OutputSink,
    ) -> Result<()>;

    /// Bring the interpreter back to a usable state after a call was abandoned.
    async fn recover(&mut self) -> Result<()> {
        Ok(())
    }

    fn version(&self) -> Option<String> {
        None
    }
}

/// Resolves a module reference into a running interpreter.
#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(&self, module_ref: &str) -> Result<Box<dyn Interpreter>, LoadError>;
}

/// The bridge's only handle on the interpreter. Exists only once loaded.
pub struct EngineAdapter {
    module: String,
    interpreter: Box<dyn Interpreter>,
    output: OutputBuffer,
    exec_timeout: Duration,
    /// Set when `recover()` failed; the interpreter is not called again.
    unusable: Option<String>,
}

impl EngineAdapter {
    /// Resolve and instantiate `module_ref`, bounded by `load_timeout`.
    pub async fn load(
        loader: Arc<dyn Loader>,
        module_ref: String,
        load_timeout: Duration,
        exec_timeout: Duration,
    ) -> Result<Self, LoadError> {
        let interpreter = match tokio::time::timeout(load_timeout, loader.load(&module_ref)).await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(LoadError::Timeout {
                    module: module_ref,
                    millis: load_timeout.as_millis() as u64,
                });
            }
        };

        if let Some(version) = interpreter.version() {
            debug!(module = %module_ref, %version, "engine module loaded");
        }

        Ok(Self {
            module: module_ref,
            interpreter,
            output: OutputBuffer::new(),
            exec_timeout,
            unusable: None,
        })
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn version(&self) -> Option<String> {
        self.interpreter.version()
    }

    /// Feed `text` to the interpreter and return what it printed during this call.
    pub async fn execute(&mut self, context_id: u32, text: &str) -> Result<String, EngineError> {
        if let Some(reason) = &self.unusable {
            return Err(EngineError::ExecutionFault(format!(
                "engine is unusable: {reason}"
            )));
        }

        let call = AssertUnwindSafe(self.interpreter.execute(context_id, text, &mut self.output))
            .catch_unwind();

        let outcome = tokio::time::timeout(self.exec_timeout, call).await;
        match outcome {
            Ok(Ok(Ok(()))) => Ok(self.output.drain()),
            Ok(Ok(Err(e))) => {
                self.output.clear();
                Err(EngineError::ExecutionFault(format!("{e:#}")))
            }
            Ok(Err(panic)) => {
                self.output.clear();
                let reason = panic_message(panic.as_ref());
                warn!(module = %self.module, %reason, "interpreter panicked");
                self.recover().await;
                Err(EngineError::ExecutionFault(format!(
                    "interpreter panicked: {reason}"
                )))
            }
            Err(_) => {
                self.output.clear();
                let millis = self.exec_timeout.as_millis() as u64;
                warn!(module = %self.module, millis, "command timed out");
                self.recover().await;
                Err(EngineError::Timeout(millis))
            }
        }
    }

    async fn recover(&mut self) {
        let result =
            match tokio::time::timeout(self.exec_timeout, self.interpreter.recover()).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("recovery timed out")),
            };
        if let Err(e) = result {
            warn!(module = %self.module, error = %e, "interpreter recovery failed");
            self.unusable = Some(format!("{e:#}"));
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_drain_empties() {
        let mut buf = OutputBuffer::new();
        buf.emit("9 ");
        buf.emit("ok");
        assert_eq!(buf.drain(), "9 ok");
        assert!(buf.is_empty());
        assert_eq!(buf.drain(), "");
    }

    #[test]
    fn panic_message_from_str_and_string() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");

        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");

        let boxed: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
