//! Timer operations exposed to the scripting layer.
//!
//! Thin validation-and-wrapping layer over the host timer wheel: callables
//! become nullary wrapped handlers bound to the requesting context, so timer
//! callbacks fire on the context that set them. Liveness stays with the
//! wheel; the service keeps no timer table of its own.

use crate::error::{BridgeError, Result};
use crate::handler::{CallableHandle, InvocationPolicy, WrappedHandler};
use crate::host::context::ContextHandle;
use crate::host::timer::{TimerId, TimerKind, TimerWheel};
use std::sync::Arc;
use std::time::Duration;

/// Timer surface bound to one requesting context.
pub struct TimerService {
    context: ContextHandle,
    wheel: Arc<TimerWheel>,
}

impl TimerService {
    /// Create a service whose callbacks fire on `context`
    pub fn new(wheel: Arc<TimerWheel>, context: ContextHandle) -> Self {
        Self { context, wheel }
    }

    /// Schedule a one-shot timer after `delay_ms` milliseconds.
    ///
    /// A zero delay fires at the next scheduling opportunity. The callable is
    /// held single-shot: after the firing it is released even if never
    /// cancelled.
    pub fn set_timer(&self, delay_ms: u64, callable: CallableHandle) -> TimerId {
        let handler = WrappedHandler::nullary(
            self.context.clone(),
            InvocationPolicy::SingleShot,
            callable,
        );
        self.wheel
            .register(Duration::from_millis(delay_ms), TimerKind::OneShot, handler)
    }

    /// Schedule a periodic timer every `period_ms` milliseconds.
    ///
    /// A zero period is rejected synchronously.
    pub fn set_periodic(&self, period_ms: u64, callable: CallableHandle) -> Result<TimerId> {
        if period_ms == 0 {
            return Err(BridgeError::validation(
                "period",
                "must be greater than 0",
            ));
        }
        let handler = WrappedHandler::nullary(
            self.context.clone(),
            InvocationPolicy::Repeatable,
            callable,
        );
        Ok(self
            .wheel
            .register(Duration::from_millis(period_ms), TimerKind::Periodic, handler))
    }

    /// Cancel a timer; returns `true` iff the id was live.
    pub fn cancel_timer(&self, id: TimerId) -> bool {
        self.wheel.cancel(id)
    }
}
