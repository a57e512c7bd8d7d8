//! Host timer subsystem.
//!
//! A single timer thread waits on a min-heap of deadlines with a condvar
//! timeout instead of polling. Firing never runs user code on the timer
//! thread: it dispatches the registered [`WrappedHandler`], which re-queues
//! the invocation onto the timer's owning context.
//!
//! The wheel is the single source of truth for timer liveness: an id is live
//! from registration until it fires (one-shot) or is cancelled. Cancellation
//! releases the handler immediately; stale heap entries are skipped at pop
//! time.

use crate::handler::{CallbackArgs, WrappedHandler};
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Host-assigned timer identifier, unique among live timers
pub type TimerId = u64;

/// Timer kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Fires once, then the id is dead
    OneShot,
    /// Fires every period until cancelled
    Periodic,
}

struct Deadline {
    fire_at: Instant,
    id: TimerId,
}

// Reverse ordering for min-heap (earliest deadline first)
impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.fire_at.cmp(&self.fire_at)
    }
}

impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Deadline {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.id == other.id
    }
}

impl Eq for Deadline {}

struct LiveTimer {
    kind: TimerKind,
    period: Option<Duration>,
    handler: WrappedHandler,
}

struct WheelState {
    heap: BinaryHeap<Deadline>,
    live: HashMap<TimerId, LiveTimer>,
}

/// The host timer wheel
pub struct TimerWheel {
    state: Mutex<WheelState>,
    notify: Condvar,
    shutdown: AtomicBool,
    next_id: AtomicU64,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl TimerWheel {
    /// Create a new, unstarted wheel
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(WheelState {
                heap: BinaryHeap::new(),
                live: HashMap::new(),
            }),
            notify: Condvar::new(),
            shutdown: AtomicBool::new(false),
            // Id 0 is never issued, so callers can use it as a known-dead id.
            next_id: AtomicU64::new(1),
            join: Mutex::new(None),
        })
    }

    /// Start the timer thread
    pub fn start(self: &Arc<Self>) {
        let wheel = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("eventide-timer".to_string())
            .spawn(move || wheel.run_loop())
            .expect("Failed to spawn timer thread");
        *self.join.lock() = Some(handle);
    }

    /// Register a timer; returns immediately with the assigned id.
    pub fn register(
        &self,
        delay: Duration,
        kind: TimerKind,
        handler: WrappedHandler,
    ) -> TimerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let period = match kind {
            TimerKind::OneShot => None,
            TimerKind::Periodic => Some(delay),
        };

        let mut state = self.state.lock();
        state.live.insert(
            id,
            LiveTimer {
                kind,
                period,
                handler,
            },
        );
        state.heap.push(Deadline {
            fire_at: Instant::now() + delay,
            id,
        });
        drop(state);

        // The new deadline may be earlier than whatever the thread is
        // currently waiting for.
        self.notify.notify_one();

        debug!(timer_id = id, kind = ?kind, delay_ms = delay.as_millis() as u64, "Registered timer");
        id
    }

    /// Cancel a timer.
    ///
    /// Returns `true` iff the id was live. The handler is released here, so
    /// a cancelled periodic timer cannot fire again even though its heap
    /// entry is still pending; the entry is skipped and dropped at pop time.
    pub fn cancel(&self, id: TimerId) -> bool {
        let removed = self.state.lock().live.remove(&id);
        match removed {
            Some(timer) => {
                timer.handler.release();
                debug!(timer_id = id, "Cancelled timer");
                true
            }
            None => false,
        }
    }

    /// Whether the id refers to a live timer
    pub fn is_live(&self, id: TimerId) -> bool {
        self.state.lock().live.contains_key(&id)
    }

    /// Number of live timers
    pub fn live_count(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Stop the timer thread and release all live handlers
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.notify.notify_one();

        if let Some(handle) = self.join.lock().take() {
            let start = Instant::now();
            let timeout = Duration::from_secs(2);
            loop {
                if handle.is_finished() {
                    let _ = handle.join();
                    break;
                }
                if start.elapsed() > timeout {
                    warn!("Timer thread did not stop within timeout");
                    break;
                }
                thread::sleep(Duration::from_millis(1));
            }
        }

        let mut state = self.state.lock();
        for (_, timer) in state.live.drain() {
            timer.handler.release();
        }
        state.heap.clear();
    }

    fn run_loop(&self) {
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            let mut state = self.state.lock();

            // Re-check after acquiring the lock: stop() may set the flag and
            // notify between our first check and the lock, losing the wakeup.
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            // Fire everything due.
            let now = Instant::now();
            while let Some(next) = state.heap.peek() {
                if next.fire_at > now {
                    break;
                }
                let deadline = state.heap.pop().expect("peeked entry present");
                self.fire(&mut state, deadline);
            }

            // Sleep until the next deadline, or until notified.
            match state.heap.peek().map(|d| d.fire_at) {
                Some(fire_at) => {
                    self.notify.wait_until(&mut state, fire_at);
                }
                None => {
                    self.notify.wait(&mut state);
                }
            }
        }
        debug!("Timer thread exited");
    }

    fn fire(&self, state: &mut WheelState, deadline: Deadline) {
        let id = deadline.id;

        // Re-arming is decided against the live table at pop time, so a
        // cancel issued from inside the timer's own callback suppresses all
        // future firings without touching the in-flight invocation.
        let (handler, rearm) = match state.live.get(&id) {
            Some(timer) => (timer.handler.clone(), timer.period),
            None => return, // cancelled while pending
        };

        handler.dispatch(CallbackArgs::None);

        match rearm {
            Some(period) => {
                state.heap.push(Deadline {
                    fire_at: deadline.fire_at + period,
                    id,
                });
            }
            None => {
                state.live.remove(&id);
            }
        }
    }
}
