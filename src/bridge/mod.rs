pub mod protocol;

pub use protocol::{Control, Inbound, Notice, Outbound};

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::consts::{
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_CONTEXT_ID, DEFAULT_EXEC_TIMEOUT_MS,
    DEFAULT_LOAD_TIMEOUT_MS, DEFAULT_MAX_PENDING,
};
use crate::engine::{EngineAdapter, Loader};
use crate::error::{BridgeError, BridgeResult, EngineError, LoadError};
use crate::events::{Event, EventBus};

/// Lifecycle of a bridge instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeState {
    Uninitialized,
    Loading,
    Ready,
    /// The engine failed to load. Terminal.
    Failed,
}

/// What happens to commands that arrive before the engine is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingPolicy {
    /// Buffer them and replay in order once ready.
    #[default]
    Queue,
    /// Answer each with a `not_ready` error.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub pending_policy: PendingPolicy,
    pub max_pending: usize,
    pub exec_timeout_ms: u64,
    pub load_timeout_ms: u64,
    pub channel_capacity: usize,
    /// Context every command runs under.
    pub context_id: u32,
    /// Module loaded by an `initialize` that names none.
    pub default_module: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            pending_policy: PendingPolicy::default(),
            max_pending: DEFAULT_MAX_PENDING,
            exec_timeout_ms: DEFAULT_EXEC_TIMEOUT_MS,
            load_timeout_ms: DEFAULT_LOAD_TIMEOUT_MS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            context_id: DEFAULT_CONTEXT_ID,
            default_module: None,
        }
    }
}

impl BridgeConfig {
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_millis(self.exec_timeout_ms)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }
}

/// The worker side of the bridge. Owns the engine adapter and handles one
/// message at a time, to completion, in arrival order.
pub struct Bridge {
    loader: Arc<dyn Loader>,
    config: BridgeConfig,
    state: BridgeState,
    adapter: Option<EngineAdapter>,
    pending: VecDeque<String>,
    module: Option<String>,
    failure: Option<LoadError>,
    outbound: mpsc::Sender<Outbound>,
    events: Arc<EventBus>,
}

impl Bridge {
    pub fn new(
        loader: Arc<dyn Loader>,
        config: BridgeConfig,
        outbound: mpsc::Sender<Outbound>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            loader,
            config,
            state: BridgeState::Uninitialized,
            adapter: None,
            pending: VecDeque::new(),
            module: None,
            failure: None,
            outbound,
            events,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// Serve until the inbound channel closes or the host stops listening.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<Inbound>) {
        while let Some(msg) = inbound.recv().await {
            if let Err(e) = self.on_message(msg, &mut inbound).await {
                debug!(error = %e, "bridge stopping");
                break;
            }
        }
        debug!(state = ?self.state, "bridge stopped");
    }

    async fn on_message(
        &mut self,
        msg: Inbound,
        inbound: &mut mpsc::Receiver<Inbound>,
    ) -> BridgeResult<()> {
        match msg {
            Inbound::Control(Control::Initialize { module_ref }) => {
                self.on_initialize(module_ref, inbound).await
            }
            Inbound::Control(Control::Status) => self.post_status().await,
            Inbound::Command(text) => self.on_command(text).await,
            Inbound::Malformed(reason) => self.post_error(BridgeError::Malformed(reason)).await,
        }
    }

    async fn on_initialize(
        &mut self,
        module_ref: Option<String>,
        inbound: &mut mpsc::Receiver<Inbound>,
    ) -> BridgeResult<()> {
        if self.state != BridgeState::Uninitialized {
            warn!(state = ?self.state, "ignoring repeated initialize");
            return Ok(());
        }

        self.set_state(BridgeState::Loading);
        let Some(module) = module_ref.or_else(|| self.config.default_module.clone()) else {
            return self.fail(LoadError::NoModule).await;
        };
        self.module = Some(module.clone());
        info!(module = %module, "loading engine module");

        let load = EngineAdapter::load(
            Arc::clone(&self.loader),
            module,
            self.config.load_timeout(),
            self.config.exec_timeout(),
        );
        tokio::pin!(load);

        // Keep draining the inbound channel so commands are queued or rejected
        // while the load is outstanding. A finished load wins over buffered input.
        let mut inbound_open = true;
        let result = loop {
            tokio::select! {
                biased;
                result = &mut load => break result,
                msg = inbound.recv(), if inbound_open => match msg {
                    Some(msg) => self.while_loading(msg).await?,
                    None => inbound_open = false,
                },
            }
        };

        match result {
            Ok(adapter) => {
                info!(module = %adapter.module(), "engine ready");
                self.adapter = Some(adapter);
                self.set_state(BridgeState::Ready);
                self.post(Outbound::Notice(Notice::Ready)).await?;
                self.drain_pending().await
            }
            Err(e) => self.fail(e).await,
        }
    }

    async fn while_loading(&mut self, msg: Inbound) -> BridgeResult<()> {
        match msg {
            Inbound::Control(Control::Initialize { .. }) => {
                warn!("ignoring initialize while loading");
                Ok(())
            }
            Inbound::Control(Control::Status) => self.post_status().await,
            Inbound::Command(text) => self.on_command(text).await,
            Inbound::Malformed(reason) => self.post_error(BridgeError::Malformed(reason)).await,
        }
    }

    async fn on_command(&mut self, text: String) -> BridgeResult<()> {
        match self.state {
            BridgeState::Ready => self.execute(text).await,
            BridgeState::Uninitialized | BridgeState::Loading => self.defer(text).await,
            BridgeState::Failed => {
                let err = match &self.failure {
                    Some(e) => BridgeError::Load(e.clone()),
                    None => EngineError::NotReady.into(),
                };
                self.post_error(err).await
            }
        }
    }

    async fn execute(&mut self, text: String) -> BridgeResult<()> {
        let Some(adapter) = self.adapter.as_mut() else {
            return self.post_error(EngineError::NotReady.into()).await;
        };

        let result = adapter.execute(self.config.context_id, &text).await;
        match result {
            Ok(output) if output.is_empty() => {
                debug!(command = %text, "command produced no output");
                Ok(())
            }
            Ok(output) => self.post(Outbound::Response(output)).await,
            Err(e) => {
                debug!(command = %text, error = %e, "command failed");
                self.post_error(e.into()).await
            }
        }
    }

    async fn defer(&mut self, text: String) -> BridgeResult<()> {
        match self.config.pending_policy {
            PendingPolicy::Reject => self.post_error(EngineError::NotReady.into()).await,
            PendingPolicy::Queue if self.pending.len() >= self.config.max_pending => {
                self.post_error(BridgeError::QueueFull(self.config.max_pending))
                    .await
            }
            PendingPolicy::Queue => {
                self.pending.push_back(text);
                debug!(pending = self.pending.len(), "queued command until ready");
                Ok(())
            }
        }
    }

    async fn drain_pending(&mut self) -> BridgeResult<()> {
        while let Some(text) = self.pending.pop_front() {
            self.execute(text).await?;
        }
        Ok(())
    }

    async fn fail(&mut self, e: LoadError) -> BridgeResult<()> {
        warn!(error = %e, "engine module failed to load");
        self.set_state(BridgeState::Failed);
        self.failure = Some(e.clone());
        self.post_error(BridgeError::Load(e.clone())).await?;

        // Queued commands will never run; answer each one.
        while self.pending.pop_front().is_some() {
            self.post_error(BridgeError::Load(e.clone())).await?;
        }
        Ok(())
    }

    fn set_state(&mut self, to: BridgeState) {
        let from = self.state;
        self.state = to;
        debug!(?from, ?to, "bridge state changed");
        self.events.publish(Event::StateChanged { from, to });
    }

    async fn post_status(&mut self) -> BridgeResult<()> {
        let notice = Notice::Status {
            state: self.state,
            module: self.module.clone(),
            pending: self.pending.len(),
        };
        self.post(Outbound::Notice(notice)).await
    }

    async fn post_error(&mut self, err: BridgeError) -> BridgeResult<()> {
        self.post(Outbound::Notice(Notice::from(&err))).await
    }

    async fn post(&mut self, msg: Outbound) -> BridgeResult<()> {
        self.outbound
            .send(msg)
            .await
            .map_err(|_| BridgeError::Disconnected)
    }
}

/// Host side of a spawned bridge.
pub struct BridgeHandle {
    inbound: mpsc::Sender<Inbound>,
    outbound: mpsc::Receiver<Outbound>,
    events: Arc<EventBus>,
    task: JoinHandle<()>,
}

/// Start a bridge on its own task.
pub fn spawn(loader: Arc<dyn Loader>, config: BridgeConfig) -> BridgeHandle {
    let capacity = config.channel_capacity.max(1);
    let (in_tx, in_rx) = mpsc::channel(capacity);
    let (out_tx, out_rx) = mpsc::channel(capacity);
    let events = Arc::new(EventBus::default());

    let bridge = Bridge::new(loader, config, out_tx, Arc::clone(&events));
    let task = tokio::spawn(bridge.run(in_rx));

    BridgeHandle {
        inbound: in_tx,
        outbound: out_rx,
        events,
        task,
    }
}

impl BridgeHandle {
    pub async fn send(&self, msg: Inbound) -> BridgeResult<()> {
        self.inbound
            .send(msg)
            .await
            .map_err(|_| BridgeError::Disconnected)
    }

    /// Next message from the bridge, or `None` once it has stopped.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.listen()
    }

    pub fn split(self) -> (mpsc::Sender<Inbound>, mpsc::Receiver<Outbound>, JoinHandle<()>) {
        (self.inbound, self.outbound, self.task)
    }

    /// Close the inbound side and collect everything the bridge still sends.
    pub async fn shutdown(self) -> Vec<Outbound> {
        let (inbound, mut outbound, task) = self.split();
        drop(inbound);

        let mut rest = Vec::new();
        while let Some(msg) = outbound.recv().await {
            rest.push(msg);
        }
        if let Err(e) = task.await {
            warn!(error = %e, "bridge task ended abnormally");
        }
        rest
    }
}
