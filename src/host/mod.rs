//! In-process host runtime.
//!
//! [`HostRuntime`] composes the pieces of the event-loop host the bridge
//! talks to: execution contexts, the timer wheel, the deployable-unit
//! container, and the shared worker context pool. The bridge layers above
//! (`entry`, `deploy`, `timer`, `facades`) hold an `Arc<HostRuntime>` and
//! never reach around it.

pub mod container;
pub mod context;
pub mod resources;
pub mod timer;

use crate::config::HostConfig;
use crate::error::Result;
use container::Container;
use context::{ContextHandle, ContextKind};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use timer::TimerWheel;
use tracing::info;

// Worker verticles share a bounded pool of contexts instead of getting a
// dedicated one each.
struct WorkerPool {
    contexts: Mutex<Vec<ContextHandle>>,
    next: AtomicUsize,
}

/// The host runtime the bridge is embedded in.
pub struct HostRuntime {
    config: HostConfig,
    wheel: Arc<TimerWheel>,
    container: Container,
    workers: WorkerPool,
}

impl HostRuntime {
    /// Create and start a runtime with the given configuration
    pub fn new(config: HostConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let wheel = TimerWheel::new();
        wheel.start();

        info!(
            queue_capacity = config.queue_capacity,
            worker_contexts = config.worker_contexts,
            "Host runtime started"
        );

        Ok(Arc::new(Self {
            container: Container::new(config.clone()),
            wheel,
            config,
            workers: WorkerPool {
                contexts: Mutex::new(Vec::new()),
                next: AtomicUsize::new(0),
            },
        }))
    }

    /// Create and start a runtime with default configuration
    pub fn with_defaults() -> Result<Arc<Self>> {
        Self::new(HostConfig::default())
    }

    /// The runtime configuration
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// The timer wheel
    pub fn timers(&self) -> &Arc<TimerWheel> {
        &self.wheel
    }

    /// The deployable-unit container
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Spawn a dedicated context of the given kind
    pub fn spawn_context(&self, kind: ContextKind) -> Result<ContextHandle> {
        ContextHandle::spawn(
            &self.config.context_name_prefix,
            kind,
            self.config.queue_capacity,
        )
    }

    /// Borrow a context from the shared worker pool.
    ///
    /// The pool grows lazily up to `worker_contexts`, then hands out existing
    /// contexts round-robin. Borrowed contexts outlive any single deployment.
    pub fn worker_context(&self) -> Result<ContextHandle> {
        let mut pool = self.workers.contexts.lock();
        if pool.len() < self.config.worker_contexts {
            let ctx = self.spawn_context(ContextKind::Worker)?;
            pool.push(ctx.clone());
            return Ok(ctx);
        }
        let idx = self.workers.next.fetch_add(1, Ordering::Relaxed) % pool.len();
        Ok(pool[idx].clone())
    }

    /// The configured shutdown grace period
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.config.shutdown_grace_ms)
    }

    /// Stop everything: tear down deployments, stop the timer wheel, close
    /// the worker pool. Blocks up to the grace period per context.
    pub fn shutdown(&self) {
        self.container.shutdown();
        self.wheel.stop();

        let workers: Vec<ContextHandle> = self.workers.contexts.lock().drain(..).collect();
        for ctx in workers {
            ctx.close(self.grace());
        }

        info!("Host runtime stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_rejects_invalid_config() {
        let config = HostConfig::new().with_queue_capacity(0);
        assert!(HostRuntime::new(config).is_err());
    }

    #[test]
    fn test_worker_pool_is_bounded() {
        let runtime = HostRuntime::new(HostConfig::new().with_worker_contexts(2)).unwrap();

        let a = runtime.worker_context().unwrap();
        let b = runtime.worker_context().unwrap();
        let c = runtime.worker_context().unwrap();
        let d = runtime.worker_context().unwrap();

        assert_ne!(a.id(), b.id());
        // Beyond the bound, existing contexts are reused.
        assert!(c.id() == a.id() || c.id() == b.id());
        assert!(d.id() == a.id() || d.id() == b.id());
        assert_ne!(c.id(), d.id());

        runtime.shutdown();
    }

    #[test]
    fn test_shutdown_closes_worker_contexts() {
        let runtime = HostRuntime::with_defaults().unwrap();
        let worker = runtime.worker_context().unwrap();
        runtime.shutdown();
        assert!(worker.is_closed());
        assert!(worker.execute(Box::new(|| {})).is_err());
    }
}
