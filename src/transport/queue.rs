// MIT License - Copyright (c) 2021 TJForc
// Serialized, rate-limited command pipeline

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep};
use tracing::{debug, info, warn};

use crate::codec::Response;
use crate::error::{DmpError, Result};
use crate::protocol::Command;
use crate::transport::Transport;

struct QueueItem {
    // declared first so the count drops before the caller is woken
    slot: PendingSlot,
    command: Command,
    reply: oneshot::Sender<Result<Response>>,
}

/// One unit of the pending count, released however the item goes away.
struct PendingSlot(Arc<AtomicUsize>);

impl PendingSlot {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct QueueState {
    sender: Option<mpsc::UnboundedSender<QueueItem>>,
    worker: Option<JoinHandle<()>>,
}

struct QueueInner<T> {
    transport: Arc<T>,
    min_interval: Duration,
    pending: Arc<AtomicUsize>,
    state: Mutex<QueueState>,
}

/// Single ordered pipeline in front of one transport.
///
/// Commands reach the transport in enqueue order, one at a time, spaced at
/// least `min_interval` apart measured from the end of the previous send.
/// Clones share the same pipeline.
pub struct CommandQueue<T: Transport> {
    inner: Arc<QueueInner<T>>,
}

impl<T: Transport> Clone for CommandQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Completion handle for one enqueued command.
#[derive(Debug)]
pub struct CommandHandle {
    rx: oneshot::Receiver<Result<Response>>,
}

impl CommandHandle {
    /// Wait for the command's result.
    ///
    /// Dropping the handle instead does not cancel a command already queued.
    pub async fn wait(self) -> Result<Response> {
        self.rx.await.map_err(|_| DmpError::QueueShutdown)?
    }
}

impl<T: Transport> CommandQueue<T> {
    /// Create a stopped queue. Call [`start`](Self::start) before enqueueing.
    pub fn new(transport: Arc<T>, min_interval: Duration) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                transport,
                min_interval,
                pending: Arc::new(AtomicUsize::new(0)),
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.inner.transport
    }

    /// Spawn the worker. Does nothing if already running.
    pub fn start(&self) {
        let mut state = self.lock_state();
        if state.sender.is_some() {
            return;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(
            self.inner.transport.clone(),
            rx,
            self.inner.min_interval,
        ));
        state.sender = Some(tx);
        state.worker = Some(worker);
        info!(
            "Command queue started (interval {:?})",
            self.inner.min_interval
        );
    }

    /// Stop accepting commands, let the worker finish what is queued, then join it.
    pub async fn stop(&self) {
        let worker = {
            let mut state = self.lock_state();
            state.sender.take();
            state.worker.take()
        };

        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!("Command queue worker ended abnormally: {}", e);
            }
            info!("Command queue stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_state().sender.is_some()
    }

    /// Commands queued or in flight.
    pub fn len(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue a command and get a handle to its eventual result.
    pub fn enqueue(&self, command: Command) -> Result<CommandHandle> {
        let state = self.lock_state();
        let sender = state.sender.as_ref().ok_or(DmpError::QueueShutdown)?;

        let (reply, rx) = oneshot::channel();
        debug!("Queueing command: {}", command);
        let item = QueueItem {
            slot: PendingSlot::new(&self.inner.pending),
            command,
            reply,
        };
        if sender.send(item).is_err() {
            return Err(DmpError::QueueShutdown);
        }
        Ok(CommandHandle { rx })
    }

    /// Queue a command and wait for its result.
    pub async fn execute(&self, command: Command) -> Result<Response> {
        self.enqueue(command)?.wait().await
    }
}

async fn run_worker<T: Transport>(
    transport: Arc<T>,
    mut rx: mpsc::UnboundedReceiver<QueueItem>,
    min_interval: Duration,
) {
    let mut last_sent: Option<Instant> = None;

    while let Some(item) = rx.recv().await {
        if let Some(last) = last_sent {
            let elapsed = last.elapsed();
            if elapsed < min_interval {
                sleep(min_interval - elapsed).await;
            }
        }

        let QueueItem {
            slot,
            command,
            reply,
        } = item;
        let result = transport.send(&command).await;
        last_sent = Some(Instant::now());
        drop(slot);

        if let Err(e) = &result {
            debug!("Command {} failed: {}", command, e);
        }
        if reply.send(result).is_err() {
            debug!("Caller stopped waiting for {}", command);
        }
    }

    debug!("Command queue worker exiting");
}
