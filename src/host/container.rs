//! Deployable-unit container.
//!
//! The container owns the unit registry and the table of live deployments.
//! Deploying spawns one context per instance (or borrows a shared worker
//! context), runs each instance's `start` on its own context, and fires the
//! deployer's completion once every instance has started or the first one
//! has failed. All completions are asynchronous; the container never calls
//! scripting code on the requesting thread.

use crate::config::HostConfig;
use crate::deploy::{DeploymentRequest, UnitKind};
use crate::entry::EntryPoint;
use crate::error::{CompletionError, HandlerFault};
use crate::handler::{CallbackArgs, NativeArg, WrappedHandler};
use crate::host::context::{ContextHandle, ContextKind};
use crate::host::HostRuntime;
use crate::value::ConfigTree;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// A deployable unit instance.
///
/// `start` runs on the instance's own context before the deployment is
/// reported complete; `stop` runs on the same context during undeploy.
pub trait Verticle: Send + 'static {
    /// Start the instance. Returning a fault fails the deployment.
    fn start(&mut self, entry: &EntryPoint) -> Result<(), HandlerFault>;

    /// Stop the instance. Called at most once, during undeploy.
    fn stop(&mut self) {}
}

/// Factory producing fresh unit instances for each deployment
pub type VerticleFactory = Arc<dyn Fn() -> Box<dyn Verticle> + Send + Sync>;

type UnitSlot = Arc<Mutex<Option<Box<dyn Verticle>>>>;

struct Instance {
    context: ContextHandle,
    // Worker instances borrow a shared pool context and must not close it.
    owned_context: bool,
    unit: UnitSlot,
}

struct Deployment {
    kind: UnitKind,
    name: String,
    config: Option<ConfigTree>,
    instances: Vec<Instance>,
}

struct StartGate {
    runtime: Arc<HostRuntime>,
    deployment_id: String,
    remaining: AtomicUsize,
    failed: Mutex<Option<CompletionError>>,
    completion: Mutex<Option<WrappedHandler>>,
}

impl StartGate {
    fn instance_done(&self, error: Option<CompletionError>) {
        if let Some(err) = error {
            let mut failed = self.failed.lock();
            if failed.is_none() {
                *failed = Some(err);
            }
        }

        if self.remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        // Last instance reported; fire the completion exactly once.
        let completion = self.completion.lock().take();
        let failed = self.failed.lock().clone();
        match failed {
            Some(err) => {
                // The error completion carries no deployment id, so the
                // caller could never undeploy a half-started deployment.
                // Roll it back before reporting: record out, instances
                // torn down in the background.
                self.runtime.container().rollback(&self.deployment_id);
                if let Some(handler) = completion {
                    handler.dispatch(CallbackArgs::Completion(Err(err)));
                }
            }
            None => {
                if let Some(handler) = completion {
                    handler.dispatch(CallbackArgs::Completion(Ok(Some(NativeArg::Tree(
                        ConfigTree::String(self.deployment_id.clone()),
                    )))));
                }
            }
        }
    }
}

/// Registry and lifecycle manager for deployable units
pub struct Container {
    config: HostConfig,
    registry: DashMap<String, VerticleFactory>,
    deployments: DashMap<String, Deployment>,
    closed: AtomicBool,
}

impl Container {
    /// Create an empty container
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            registry: DashMap::new(),
            deployments: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a unit under a name; later registrations replace earlier ones
    pub fn register_unit<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Verticle> + Send + Sync + 'static,
    {
        self.registry.insert(name.into(), Arc::new(factory));
    }

    /// Whether a unit name is registered
    pub fn has_unit(&self, name: &str) -> bool {
        self.registry.contains_key(name)
    }

    /// Whether a deployment id is live
    pub fn has_deployment(&self, id: &str) -> bool {
        self.deployments.contains_key(id)
    }

    /// Number of live deployments
    pub fn deployment_count(&self) -> usize {
        self.deployments.len()
    }

    /// Configuration recorded for a deployment.
    ///
    /// `None` both for unknown ids and for deployments made without a config;
    /// the latter is the "absent config" case and callers surface it as an
    /// empty map.
    pub fn deployment_config(&self, id: &str) -> Option<ConfigTree> {
        self.deployments.get(id).and_then(|dep| dep.config.clone())
    }

    /// Whether the container has begun shutting down
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Deploy a validated request. Outcome arrives via the request's
    /// completion handler; this method itself cannot fail.
    ///
    /// A deployment whose start fails is rolled back: the record is removed
    /// before the error completion fires, and every instance (including ones
    /// that started cleanly) is torn down in the background.
    pub fn deploy(&self, runtime: &Arc<HostRuntime>, request: DeploymentRequest) {
        let DeploymentRequest {
            kind,
            name,
            config,
            instances,
            completion,
        } = request;

        if self.closed.load(Ordering::Acquire) {
            complete_err(
                completion,
                CompletionError::internal("Container is shutting down"),
            );
            return;
        }

        if name.is_empty() {
            complete_err(completion, CompletionError::invalid_main(name));
            return;
        }

        let factory = match self.registry.get(&name) {
            Some(entry) => Arc::clone(entry.value()),
            None => {
                complete_err(completion, CompletionError::unit_not_found(&name));
                return;
            }
        };

        let id = Uuid::new_v4().to_string();
        let grace = self.grace();

        let mut built: Vec<Instance> = Vec::with_capacity(instances);
        for _ in 0..instances {
            let allocated = match kind.context_kind() {
                ContextKind::Worker => runtime.worker_context().map(|ctx| (ctx, false)),
                ContextKind::EventLoop => runtime
                    .spawn_context(ContextKind::EventLoop)
                    .map(|ctx| (ctx, true)),
            };
            let (context, owned_context) = match allocated {
                Ok(pair) => pair,
                Err(e) => {
                    for instance in &built {
                        if instance.owned_context {
                            instance.context.close(grace);
                        }
                    }
                    complete_err(
                        completion,
                        CompletionError::instantiation_failed(&name, e.to_string()),
                    );
                    return;
                }
            };
            built.push(Instance {
                context,
                owned_context,
                unit: Arc::new(Mutex::new(Some(factory()))),
            });
        }

        let starts: Vec<(ContextHandle, UnitSlot)> = built
            .iter()
            .map(|instance| (instance.context.clone(), Arc::clone(&instance.unit)))
            .collect();

        // The record goes in before any start runs so instances can read
        // their config during start.
        self.deployments.insert(
            id.clone(),
            Deployment {
                kind,
                name: name.clone(),
                config,
                instances: built,
            },
        );

        info!(deployment_id = %id, name = %name, instances, kind = ?kind, "Deploying unit");

        let gate = Arc::new(StartGate {
            runtime: Arc::clone(runtime),
            deployment_id: id.clone(),
            remaining: AtomicUsize::new(starts.len()),
            failed: Mutex::new(None),
            completion: Mutex::new(completion),
        });

        for (context, unit) in starts {
            let entry = EntryPoint::for_deployment(Arc::clone(runtime), context.clone(), id.clone());
            let start_gate = Arc::clone(&gate);
            let unit_name = name.clone();
            let fault_context = context.clone();

            let queued = context.execute(Box::new(move || {
                let outcome = match unit.lock().as_mut() {
                    Some(unit) => unit.start(&entry),
                    None => Ok(()),
                };
                match outcome {
                    Ok(()) => start_gate.instance_done(None),
                    Err(fault) => {
                        fault_context.report_fault(fault.clone());
                        start_gate.instance_done(Some(
                            CompletionError::instantiation_failed(unit_name, fault.message)
                                .with_context(serde_json::json!({
                                    "deploymentId": start_gate.deployment_id.clone(),
                                })),
                        ));
                    }
                }
            }));

            if let Err(e) = queued {
                gate.instance_done(Some(CompletionError::instantiation_failed(
                    &name,
                    e.to_string(),
                )));
            }
        }
    }

    /// Undeploy a deployment: stop every instance on its own context, close
    /// owned contexts, then fire the `(error)`-style completion.
    ///
    /// Module and verticle deployments must be undeployed through the
    /// matching operation; a family mismatch reports the id as unknown.
    pub fn undeploy(
        &self,
        kind: UnitKind,
        deployment_id: &str,
        completion: Option<WrappedHandler>,
    ) {
        let removed = self
            .deployments
            .remove_if(deployment_id, |_, dep| {
                dep.kind.is_module() == kind.is_module()
            });

        let (id, deployment) = match removed {
            Some(entry) => entry,
            None => {
                complete_err(
                    completion,
                    CompletionError::deployment_not_found(deployment_id),
                );
                return;
            }
        };

        info!(deployment_id = %id, name = %deployment.name, "Undeploying unit");

        let grace = self.grace();
        let spawned = thread::Builder::new()
            .name("eventide-undeploy".to_string())
            .spawn(move || {
                teardown(deployment, grace);
                if let Some(handler) = completion {
                    handler.dispatch(CallbackArgs::Completion(Ok(None)));
                }
            });
        if let Err(e) = spawned {
            error!(deployment_id = %id, "Failed to spawn undeploy thread: {}", e);
        }
    }

    // Removes a failed deployment's record and tears its instances down.
    // Runs on an instance's own context thread, so the teardown (which joins
    // instance contexts) goes to a background thread.
    fn rollback(&self, deployment_id: &str) {
        if let Some((id, deployment)) = self.deployments.remove(deployment_id) {
            warn!(deployment_id = %id, name = %deployment.name, "Rolling back failed deployment");
            let grace = self.grace();
            let spawned = thread::Builder::new()
                .name("eventide-rollback".to_string())
                .spawn(move || teardown(deployment, grace));
            if let Err(e) = spawned {
                error!(deployment_id = %id, "Failed to spawn rollback thread: {}", e);
            }
        }
    }

    /// Request container shutdown: stop accepting deployments and tear down
    /// every live deployment in the background. Fire-and-forget.
    pub fn exit(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let deployments = self.drain_deployments();
        info!(deployments = deployments.len(), "Container exit requested");

        let grace = self.grace();
        let spawned = thread::Builder::new()
            .name("eventide-exit".to_string())
            .spawn(move || {
                for deployment in deployments {
                    teardown(deployment, grace);
                }
            });
        if let Err(e) = spawned {
            error!("Failed to spawn exit thread: {}", e);
        }
    }

    /// Synchronous teardown of every deployment, for embedder shutdown.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        for deployment in self.drain_deployments() {
            teardown(deployment, self.grace());
        }
    }

    fn drain_deployments(&self) -> Vec<Deployment> {
        let ids: Vec<String> = self
            .deployments
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.into_iter()
            .filter_map(|id| self.deployments.remove(&id).map(|(_, dep)| dep))
            .collect()
    }

    fn grace(&self) -> Duration {
        Duration::from_millis(self.config.shutdown_grace_ms)
    }
}

fn complete_err(completion: Option<WrappedHandler>, err: CompletionError) {
    if let Some(handler) = completion {
        if !handler.dispatch(CallbackArgs::Completion(Err(err))) {
            warn!("Dropped deployment completion");
        }
    }
}

fn teardown(deployment: Deployment, grace: Duration) {
    for instance in deployment.instances {
        let unit = Arc::clone(&instance.unit);
        let queued = instance.context.execute(Box::new(move || {
            if let Some(mut unit) = unit.lock().take() {
                unit.stop();
            }
        }));
        if queued.is_err() {
            // Context already gone; the unit can no longer run anyway.
            instance.unit.lock().take();
        }
        if instance.owned_context {
            instance.context.close(grace);
        }
    }
}
