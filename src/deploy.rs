//! Deployment operations exposed to the scripting layer.
//!
//! [`DeploymentManager`] validates parameters synchronously, marshals the
//! optional configuration value, wraps the caller's completion callable, and
//! hands the request to the container. Everything after the hand-off is
//! asynchronous: outcomes arrive through the completion handler on the
//! deployer's own context, never as a return value.

use crate::error::{BridgeError, Result};
use crate::handler::{CallableHandle, InvocationPolicy, WrappedHandler};
use crate::host::context::{ContextHandle, ContextKind};
use crate::host::HostRuntime;
use crate::value::{to_native, ConfigTree, ScriptValue};
use std::sync::Arc;

/// What kind of deployable unit a request refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    /// Standard verticle on a dedicated event-loop context
    Verticle,
    /// Verticle on a shared worker context
    WorkerVerticle,
    /// Named module
    Module,
}

impl UnitKind {
    /// Whether this kind belongs to the module family.
    ///
    /// Module and verticle deployments share an id space but must be
    /// undeployed through the matching operation.
    pub fn is_module(&self) -> bool {
        matches!(self, UnitKind::Module)
    }

    /// The context kind instances of this unit run on
    pub fn context_kind(&self) -> ContextKind {
        match self {
            UnitKind::WorkerVerticle => ContextKind::Worker,
            UnitKind::Verticle | UnitKind::Module => ContextKind::EventLoop,
        }
    }
}

/// A fully validated deployment request, ready for the container
pub struct DeploymentRequest {
    /// Unit kind
    pub kind: UnitKind,
    /// Registered unit name (verticle main or module name)
    pub name: String,
    /// Marshalled configuration; `None` when the deployer passed none,
    /// which is distinct from an explicit empty map
    pub config: Option<ConfigTree>,
    /// Number of instances, at least 1
    pub instances: usize,
    /// Error-first completion handler, single-shot, bound to the deployer's
    /// context
    pub completion: Option<WrappedHandler>,
}

/// Deployment surface bound to one deploying context.
pub struct DeploymentManager {
    runtime: Arc<HostRuntime>,
    context: ContextHandle,
}

impl DeploymentManager {
    /// Create a manager whose completions fire on `context`
    pub fn new(runtime: Arc<HostRuntime>, context: ContextHandle) -> Self {
        Self { runtime, context }
    }

    /// Deploy `instances` instances of a unit.
    ///
    /// Parameter problems (zero instances, unmarshallable config) are
    /// synchronous errors; everything else is reported through `completion`,
    /// which on success receives `(null, deployment_id)`.
    pub fn deploy(
        &self,
        kind: UnitKind,
        name: &str,
        config: Option<&ScriptValue>,
        instances: usize,
        completion: Option<CallableHandle>,
    ) -> Result<()> {
        if instances < 1 {
            return Err(BridgeError::validation("instances", "must be at least 1"));
        }

        let config = match config {
            Some(value) => Some(to_native(value)?),
            None => None,
        };

        let completion = completion.map(|callable| {
            WrappedHandler::error_first(self.context.clone(), InvocationPolicy::SingleShot, callable)
        });

        self.runtime.container().deploy(
            &self.runtime,
            DeploymentRequest {
                kind,
                name: name.to_string(),
                config,
                instances,
                completion,
            },
        );
        Ok(())
    }

    /// Undeploy a previous deployment.
    ///
    /// The completion is `(error)`-style: its single argument is null on
    /// success. Unknown ids and family mismatches (undeploying a module id
    /// through the verticle operation) complete with an error.
    pub fn undeploy(
        &self,
        kind: UnitKind,
        deployment_id: &str,
        completion: Option<CallableHandle>,
    ) -> Result<()> {
        let completion = completion.map(|callable| {
            WrappedHandler::unary(self.context.clone(), InvocationPolicy::SingleShot, callable)
        });

        self.runtime
            .container()
            .undeploy(kind, deployment_id, completion);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerFault;
    use crate::host::container::Verticle;
    use std::sync::mpsc;
    use std::time::Duration;

    struct NoopVerticle;

    impl Verticle for NoopVerticle {
        fn start(&mut self, _entry: &crate::entry::EntryPoint) -> std::result::Result<(), HandlerFault> {
            Ok(())
        }
    }

    fn runtime_with_unit() -> Arc<HostRuntime> {
        let runtime = HostRuntime::with_defaults().unwrap();
        runtime
            .container()
            .register_unit("app.main", || Box::new(NoopVerticle));
        runtime
    }

    fn manager(runtime: &Arc<HostRuntime>) -> (DeploymentManager, ContextHandle) {
        let ctx = runtime.spawn_context(ContextKind::EventLoop).unwrap();
        (DeploymentManager::new(Arc::clone(runtime), ctx.clone()), ctx)
    }

    fn completion_channel() -> (CallableHandle, mpsc::Receiver<(ScriptValue, ScriptValue)>) {
        let (tx, rx) = mpsc::channel();
        let callable = CallableHandle::from_fn2(move |err, result| {
            tx.send((err, result)).unwrap();
            Ok(())
        });
        (callable, rx)
    }

    #[test]
    fn test_zero_instances_is_synchronous_error() {
        let runtime = runtime_with_unit();
        let (manager, ctx) = manager(&runtime);

        let err = manager
            .deploy(UnitKind::Verticle, "app.main", None, 0, None)
            .unwrap_err();
        assert!(matches!(err, BridgeError::Validation { .. }));

        ctx.close(Duration::from_secs(1));
        runtime.shutdown();
    }

    #[test]
    fn test_bad_config_is_synchronous_error() {
        let runtime = runtime_with_unit();
        let (manager, ctx) = manager(&runtime);

        // Map with a non-string key cannot be marshalled.
        let config = ScriptValue::Map(vec![(ScriptValue::Int(1), ScriptValue::Bool(true))]);
        let err = manager
            .deploy(UnitKind::Verticle, "app.main", Some(&config), 1, None)
            .unwrap_err();
        assert!(matches!(err, BridgeError::Marshal(_)));

        ctx.close(Duration::from_secs(1));
        runtime.shutdown();
    }

    #[test]
    fn test_deploy_completes_with_deployment_id() {
        let runtime = runtime_with_unit();
        let (manager, ctx) = manager(&runtime);
        let (callable, rx) = completion_channel();

        manager
            .deploy(UnitKind::Verticle, "app.main", None, 2, Some(callable))
            .unwrap();

        let (err, id) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(err.is_null());
        let id = id.as_str().unwrap().to_string();
        assert!(runtime.container().has_deployment(&id));

        ctx.close(Duration::from_secs(1));
        runtime.shutdown();
    }

    #[test]
    fn test_unknown_unit_completes_with_error() {
        let runtime = runtime_with_unit();
        let (manager, ctx) = manager(&runtime);
        let (callable, rx) = completion_channel();

        manager
            .deploy(UnitKind::Verticle, "no.such.unit", None, 1, Some(callable))
            .unwrap();

        let (err, result) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(
            err.get("code").and_then(|v| v.as_str()),
            Some("UNIT_NOT_FOUND")
        );
        assert!(result.is_null());

        ctx.close(Duration::from_secs(1));
        runtime.shutdown();
    }

    #[test]
    fn test_undeploy_unknown_id_completes_with_error() {
        let runtime = runtime_with_unit();
        let (manager, ctx) = manager(&runtime);

        let (tx, rx) = mpsc::channel();
        let callable = CallableHandle::from_fn1(move |err| {
            tx.send(err).unwrap();
            Ok(())
        });

        manager
            .undeploy(UnitKind::Verticle, "not-a-deployment", Some(callable))
            .unwrap();

        let err = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(
            err.get("code").and_then(|v| v.as_str()),
            Some("DEPLOYMENT_NOT_FOUND")
        );

        ctx.close(Duration::from_secs(1));
        runtime.shutdown();
    }

    #[test]
    fn test_absent_config_distinct_from_empty_map() {
        let runtime = runtime_with_unit();
        let (manager, ctx) = manager(&runtime);

        let (callable_a, rx_a) = completion_channel();
        manager
            .deploy(UnitKind::Verticle, "app.main", None, 1, Some(callable_a))
            .unwrap();
        let (_, id_a) = rx_a.recv_timeout(Duration::from_secs(2)).unwrap();
        let id_a = id_a.as_str().unwrap().to_string();

        let empty = ScriptValue::empty_map();
        let (callable_b, rx_b) = completion_channel();
        manager
            .deploy(UnitKind::Verticle, "app.main", Some(&empty), 1, Some(callable_b))
            .unwrap();
        let (_, id_b) = rx_b.recv_timeout(Duration::from_secs(2)).unwrap();
        let id_b = id_b.as_str().unwrap().to_string();

        assert!(runtime.container().deployment_config(&id_a).is_none());
        assert_eq!(
            runtime.container().deployment_config(&id_b),
            Some(ConfigTree::empty_object())
        );

        ctx.close(Duration::from_secs(1));
        runtime.shutdown();
    }
}
