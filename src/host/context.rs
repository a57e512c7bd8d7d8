//! Execution contexts ("loops") owned by the host runtime.
//!
//! Each deployable unit runs on exactly one context: an OS thread draining a
//! task queue in submission order. Everything that reaches application code
//! goes through [`ContextHandle::execute`], which is what gives the bridge
//! its two structural guarantees: handlers fire on the owning context's
//! thread, and no two handlers of the same context ever run concurrently.

use crate::error::{BridgeError, HandlerFault, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Unique context id
pub type ContextId = u64;

/// A unit of work scheduled onto a context
pub type Task = Box<dyn FnOnce() + Send + 'static>;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// What kind of unit a context serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// Standard event-loop context
    EventLoop,
    /// Worker context (worker verticles, blocking-tolerant per host policy)
    Worker,
}

enum Message {
    Task(Task),
    Shutdown,
}

struct ContextInner {
    id: ContextId,
    kind: ContextKind,
    tx: Sender<Message>,
    thread_id: ThreadId,
    closed: AtomicBool,
    last_fault: Mutex<Option<HandlerFault>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a running context.
///
/// Cloneable; all clones refer to the same loop thread. Resources carry one
/// of these so any callback they schedule lands back on the owning thread.
#[derive(Clone)]
pub struct ContextHandle {
    inner: Arc<ContextInner>,
}

impl ContextHandle {
    /// Spawn a new context thread with a bounded task queue.
    pub fn spawn(name_prefix: &str, kind: ContextKind, queue_capacity: usize) -> Result<Self> {
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = bounded::<Message>(queue_capacity);

        let thread_name = match kind {
            ContextKind::EventLoop => format!("{}-{}", name_prefix, id),
            ContextKind::Worker => format!("{}-worker-{}", name_prefix, id),
        };

        let join = thread::Builder::new()
            .name(thread_name)
            .spawn(move || run_loop(id, rx))
            .map_err(|e| BridgeError::InvalidState(format!("Failed to spawn context: {}", e)))?;

        let thread_id = join.thread().id();

        debug!(context_id = id, kind = ?kind, "Spawned context");

        Ok(Self {
            inner: Arc::new(ContextInner {
                id,
                kind,
                tx,
                thread_id,
                closed: AtomicBool::new(false),
                last_fault: Mutex::new(None),
                join: Mutex::new(Some(join)),
            }),
        })
    }

    /// The context id
    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    /// The context kind
    pub fn kind(&self) -> ContextKind {
        self.inner.kind
    }

    /// True when called from this context's own loop thread.
    ///
    /// Verification code uses this to assert thread affinity; the bridge
    /// never needs it because dispatch always goes through the queue.
    pub fn is_on_context(&self) -> bool {
        thread::current().id() == self.inner.thread_id
    }

    /// Queue a task for execution at the next scheduling opportunity.
    ///
    /// Never runs the task inline, even when called from the loop thread
    /// itself; submission order is execution order.
    pub fn execute(&self, task: Task) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(BridgeError::Shutdown("Context is closed".into()));
        }

        match self.inner.tx.try_send(Message::Task(task)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(BridgeError::InvalidState(format!(
                "Context {} task queue is full",
                self.inner.id
            ))),
            Err(TrySendError::Disconnected(_)) => {
                Err(BridgeError::Shutdown("Context loop has exited".into()))
            }
        }
    }

    /// Record a handler fault against this context's unit.
    ///
    /// Faults isolate to the unit: they are logged and retained for the
    /// container, never propagated to other contexts or the process.
    pub fn report_fault(&self, fault: HandlerFault) {
        error!(
            context_id = self.inner.id,
            kind = ?fault.kind,
            "Handler fault: {}",
            fault.message
        );
        *self.inner.last_fault.lock() = Some(fault);
    }

    /// The most recent handler fault, if any
    pub fn last_fault(&self) -> Option<HandlerFault> {
        self.inner.last_fault.lock().clone()
    }

    /// Whether the context has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Close the context: already-queued tasks drain, then the loop exits.
    ///
    /// Joins the loop thread for at most `grace` before giving up. Idempotent.
    pub fn close(&self, grace: Duration) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // Queued work drains before the loop sees the shutdown marker.
        if self.inner.tx.send(Message::Shutdown).is_err() {
            debug!(context_id = self.inner.id, "Context loop already gone");
        }

        if let Some(join) = self.inner.join.lock().take() {
            let start = Instant::now();
            loop {
                if join.is_finished() {
                    let _ = join.join();
                    break;
                }
                if start.elapsed() > grace {
                    warn!(
                        context_id = self.inner.id,
                        "Context did not drain within grace period"
                    );
                    break;
                }
                thread::sleep(Duration::from_millis(1));
            }
        }

        debug!(context_id = self.inner.id, "Context closed");
    }
}

impl std::fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextHandle")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn run_loop(id: ContextId, rx: Receiver<Message>) {
    debug!(context_id = id, "Context loop running");
    for message in rx {
        match message {
            Message::Task(task) => task(),
            Message::Shutdown => break,
        }
    }
    debug!(context_id = id, "Context loop exited");
}
