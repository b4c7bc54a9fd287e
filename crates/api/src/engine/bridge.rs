//! Per-session push connections to ComfyUI.
//!
//! Each session gets at most one bridge: an engine subscription under the
//! session's client id plus one relay task that applies the messages in
//! arrival order. Opening a bridge for a session that already has one
//! closes the old bridge first.
//!
//! A bridge is opened before the job is submitted, so the engine may push
//! messages before the prompt id is known. Until [`BridgeManager::job_queued`]
//! is called (or the session already carries a prompt id) those messages
//! are held, then applied in order and filtered by prompt id like any
//! other.
//!
//! Connection failures are logged and leave the session as it was. There is
//! no automatic reconnect; a client recovers by executing again.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use relay_comfyui::engine::EngineSubscription;
use relay_comfyui::messages::ComfyUIMessage;
use relay_core::types::SessionId;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::engine::relay::apply;
use crate::engine::RelayContext;

/// How long to wait for the engine WebSocket handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Messages kept while waiting for the prompt id; the oldest are dropped
/// beyond this.
pub const MAX_HELD_MESSAGES: usize = 1024;

/// Lifecycle of one bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

struct BridgeHandle {
    generation: u64,
    state: watch::Receiver<BridgeState>,
    queued: watch::Sender<bool>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl BridgeHandle {
    fn stop(self) {
        self.cancel.cancel();
        // The relay task exits on cancellation; the handle is only dropped.
        drop(self.task);
    }
}

pub struct BridgeManager {
    ctx: RelayContext,
    bridges: Mutex<HashMap<SessionId, BridgeHandle>>,
    next_generation: AtomicU64,
}

impl BridgeManager {
    pub fn new(ctx: RelayContext) -> Self {
        Self {
            ctx,
            bridges: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Open the engine connection for a session, replacing any previous
    /// one. Returns the resulting state: `Connected` on success,
    /// `Disconnected` if the engine could not be reached, `Closed` if a
    /// newer open or a close overtook this one.
    pub async fn open(&self, session_id: SessionId, client_id: &str) -> BridgeState {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (state_tx, state_rx) = watch::channel(BridgeState::Connecting);
        let (queued_tx, queued_rx) = watch::channel(false);
        let cancel = CancellationToken::new();

        let previous = self.bridges.lock().await.insert(
            session_id,
            BridgeHandle {
                generation,
                state: state_rx,
                queued: queued_tx,
                cancel: cancel.clone(),
                task: None,
            },
        );
        if let Some(previous) = previous {
            tracing::info!(session_id = %session_id, "Replacing existing engine connection");
            previous.stop();
        }

        let connect = tokio::time::timeout(CONNECT_TIMEOUT, self.ctx.engine.subscribe(client_id));
        let result = tokio::select! {
            _ = cancel.cancelled() => return BridgeState::Closed,
            result = connect => result,
        };

        let subscription = match result {
            Ok(Ok(subscription)) => subscription,
            Ok(Err(e)) => {
                tracing::warn!(session_id = %session_id, error = %e, "Engine connection failed");
                self.discard(session_id, generation).await;
                return BridgeState::Disconnected;
            }
            Err(_) => {
                tracing::warn!(
                    session_id = %session_id,
                    timeout_secs = CONNECT_TIMEOUT.as_secs(),
                    "Engine connection timed out",
                );
                self.discard(session_id, generation).await;
                return BridgeState::Disconnected;
            }
        };

        state_tx.send_replace(BridgeState::Connected);
        let task = tokio::spawn(run_relay(
            self.ctx.clone(),
            session_id,
            subscription,
            state_tx,
            queued_rx,
            cancel.clone(),
        ));

        let mut bridges = self.bridges.lock().await;
        match bridges.get_mut(&session_id) {
            Some(handle) if handle.generation == generation => {
                handle.task = Some(task);
                tracing::info!(session_id = %session_id, client_id = %client_id, "Engine bridge open");
                BridgeState::Connected
            }
            _ => {
                cancel.cancel();
                BridgeState::Closed
            }
        }
    }

    /// The session's job was accepted by the engine: apply the messages
    /// held since the bridge opened. Returns whether a bridge existed.
    pub async fn job_queued(&self, session_id: SessionId) -> bool {
        match self.bridges.lock().await.get(&session_id) {
            Some(handle) => {
                handle.queued.send_replace(true);
                true
            }
            None => false,
        }
    }

    /// Tear down the bridge of a session. Returns whether one existed.
    pub async fn close(&self, session_id: SessionId) -> bool {
        let handle = self.bridges.lock().await.remove(&session_id);
        match handle {
            Some(handle) => {
                handle.stop();
                tracing::info!(session_id = %session_id, "Engine bridge closed");
                true
            }
            None => false,
        }
    }

    pub async fn state(&self, session_id: SessionId) -> Option<BridgeState> {
        self.bridges
            .lock()
            .await
            .get(&session_id)
            .map(|h| *h.state.borrow())
    }

    /// Bridges currently relaying.
    pub async fn connected_count(&self) -> usize {
        self.bridges
            .lock()
            .await
            .values()
            .filter(|h| *h.state.borrow() == BridgeState::Connected)
            .count()
    }

    /// Close every bridge.
    pub async fn shutdown_all(&self) {
        let handles: Vec<BridgeHandle> = self.bridges.lock().await.drain().map(|(_, h)| h).collect();
        let count = handles.len();
        for handle in handles {
            handle.stop();
        }
        tracing::info!(count, "Closed all engine bridges");
    }

    async fn discard(&self, session_id: SessionId, generation: u64) {
        let mut bridges = self.bridges.lock().await;
        if bridges.get(&session_id).map(|h| h.generation) == Some(generation) {
            bridges.remove(&session_id);
        }
    }
}

/// Consume one session's engine messages until the engine closes the
/// connection or the bridge is cancelled.
async fn run_relay(
    ctx: RelayContext,
    session_id: SessionId,
    mut subscription: EngineSubscription,
    state: watch::Sender<BridgeState>,
    mut queued: watch::Receiver<bool>,
    cancel: CancellationToken,
) {
    let signalled = *queued.borrow_and_update();
    let mut released = signalled || job_known(&ctx, session_id).await;
    let mut held = VecDeque::new();
    let mut ended = false;

    while !(ended && released) {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = queued.changed(), if !released => {
                // A dropped sender means the bridge is going away; apply
                // what arrived so far.
                let signalled = changed.is_err() || *queued.borrow_and_update();
                if signalled {
                    released = true;
                    if !held.is_empty() {
                        tracing::debug!(
                            session_id = %session_id,
                            count = held.len(),
                            "Applying messages received before queueing",
                        );
                    }
                    while let Some(message) = held.pop_front() {
                        apply(&ctx, session_id, message).await;
                    }
                }
            }
            message = subscription.events.recv(), if !ended => match message {
                Some(message) if released => apply(&ctx, session_id, message).await,
                Some(message) => hold(&mut held, session_id, message),
                None => {
                    tracing::info!(session_id = %session_id, "Engine connection ended");
                    ended = true;
                }
            },
        }
    }
    state.send_replace(BridgeState::Closed);
}

async fn job_known(ctx: &RelayContext, session_id: SessionId) -> bool {
    ctx.sessions
        .get(session_id)
        .await
        .is_some_and(|s| s.engine_job_id.is_some())
}

fn hold(held: &mut VecDeque<ComfyUIMessage>, session_id: SessionId, message: ComfyUIMessage) {
    if held.len() == MAX_HELD_MESSAGES {
        held.pop_front();
        tracing::warn!(session_id = %session_id, "Too many early engine messages, dropping oldest");
    }
    held.push_back(message);
}
