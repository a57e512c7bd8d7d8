//! The single entry point the scripting layer sees.
//!
//! An [`EntryPoint`] is bound to one execution context and, for deployed
//! units, one deployment. Every scripting-visible operation of the bridge is
//! reachable from here: timers, deployment, configuration access, resource
//! creation, run-on-loop scheduling, and container exit. There is no global
//! instance; each deployed unit receives its own during start, and embedders
//! create one with [`EntryPoint::root`].

use crate::deploy::{DeploymentManager, UnitKind};
use crate::error::{BridgeError, Result};
use crate::facades::fs::FileSystemFacade;
use crate::facades::http::{HttpClientFacade, HttpServerFacade, SockJsServerFacade};
use crate::facades::logger::LoggerFacade;
use crate::facades::net::{NetClientFacade, NetServerFacade};
use crate::handler::{CallableHandle, CallbackArgs, InvocationPolicy, WrappedHandler};
use crate::host::context::{ContextHandle, ContextKind};
use crate::host::timer::TimerId;
use crate::host::HostRuntime;
use crate::timer::TimerService;
use crate::value::{from_native, to_native, ConfigTree, ScriptValue};
use std::sync::Arc;

/// Scripting entry point bound to one context.
pub struct EntryPoint {
    runtime: Arc<HostRuntime>,
    context: ContextHandle,
    deployment_id: Option<String>,
    timers: TimerService,
    deployments: DeploymentManager,
}

impl EntryPoint {
    fn build(
        runtime: Arc<HostRuntime>,
        context: ContextHandle,
        deployment_id: Option<String>,
    ) -> Self {
        let timers = TimerService::new(Arc::clone(runtime.timers()), context.clone());
        let deployments = DeploymentManager::new(Arc::clone(&runtime), context.clone());
        Self {
            runtime,
            context,
            deployment_id,
            timers,
            deployments,
        }
    }

    /// Entry point for an embedder, on a fresh event-loop context
    pub fn root(runtime: Arc<HostRuntime>) -> Result<Self> {
        let context = runtime.spawn_context(ContextKind::EventLoop)?;
        Ok(Self::build(runtime, context, None))
    }

    pub(crate) fn for_deployment(
        runtime: Arc<HostRuntime>,
        context: ContextHandle,
        deployment_id: String,
    ) -> Self {
        Self::build(runtime, context, Some(deployment_id))
    }

    /// The context this entry point is bound to
    pub fn context(&self) -> &ContextHandle {
        &self.context
    }

    /// The deployment this entry point belongs to, if any
    pub fn deployment_id(&self) -> Option<&str> {
        self.deployment_id.as_deref()
    }

    /// This deployment's configuration.
    ///
    /// Returns an empty map when the unit was deployed without a config or
    /// when called on a root entry point, so scripting code can always index
    /// into the result.
    pub fn config(&self) -> ScriptValue {
        self.deployment_id
            .as_ref()
            .and_then(|id| self.runtime.container().deployment_config(id))
            .map(|tree| from_native(&tree))
            .unwrap_or_else(ScriptValue::empty_map)
    }

    // --- timers ---

    /// Schedule a one-shot timer; see [`TimerService::set_timer`]
    pub fn set_timer(&self, delay_ms: u64, callable: CallableHandle) -> TimerId {
        self.timers.set_timer(delay_ms, callable)
    }

    /// Schedule a periodic timer; see [`TimerService::set_periodic`]
    pub fn set_periodic(&self, period_ms: u64, callable: CallableHandle) -> Result<TimerId> {
        self.timers.set_periodic(period_ms, callable)
    }

    /// Cancel a timer; returns `true` iff the id was live
    pub fn cancel_timer(&self, id: TimerId) -> bool {
        self.timers.cancel_timer(id)
    }

    /// Queue a callable for execution on this context at the next scheduling
    /// opportunity. Never runs it inline.
    pub fn run_on_loop(&self, callable: CallableHandle) -> Result<()> {
        let handler = WrappedHandler::nullary(
            self.context.clone(),
            InvocationPolicy::SingleShot,
            callable,
        );
        if handler.dispatch(CallbackArgs::None) {
            Ok(())
        } else {
            Err(BridgeError::Shutdown("Context is closed".into()))
        }
    }

    // --- deployment ---

    /// Deploy instances of a registered verticle
    pub fn deploy_verticle(
        &self,
        main: &str,
        config: Option<&ScriptValue>,
        instances: usize,
        completion: Option<CallableHandle>,
    ) -> Result<()> {
        self.deployments
            .deploy(UnitKind::Verticle, main, config, instances, completion)
    }

    /// Deploy instances of a registered verticle on worker contexts
    pub fn deploy_worker_verticle(
        &self,
        main: &str,
        config: Option<&ScriptValue>,
        instances: usize,
        completion: Option<CallableHandle>,
    ) -> Result<()> {
        self.deployments.deploy(
            UnitKind::WorkerVerticle,
            main,
            config,
            instances,
            completion,
        )
    }

    /// Deploy instances of a registered module
    pub fn deploy_module(
        &self,
        name: &str,
        config: Option<&ScriptValue>,
        instances: usize,
        completion: Option<CallableHandle>,
    ) -> Result<()> {
        self.deployments
            .deploy(UnitKind::Module, name, config, instances, completion)
    }

    /// Undeploy a verticle deployment
    pub fn undeploy_verticle(
        &self,
        deployment_id: &str,
        completion: Option<CallableHandle>,
    ) -> Result<()> {
        self.deployments
            .undeploy(UnitKind::Verticle, deployment_id, completion)
    }

    /// Undeploy a module deployment
    pub fn undeploy_module(
        &self,
        deployment_id: &str,
        completion: Option<CallableHandle>,
    ) -> Result<()> {
        self.deployments
            .undeploy(UnitKind::Module, deployment_id, completion)
    }

    /// Request container shutdown. Fire-and-forget: the call returns
    /// immediately and teardown proceeds in the background.
    pub fn exit(&self) {
        self.runtime.container().exit();
    }

    // --- resources ---

    /// Create a TCP server owned by this context. Options are marshalled
    /// up front, so a bad options map fails here, not at listen time.
    pub fn create_net_server(&self, options: Option<&ScriptValue>) -> Result<NetServerFacade> {
        let options = marshal_options(options)?;
        Ok(NetServerFacade::new(self.context.clone(), options))
    }

    /// Create a TCP client owned by this context
    pub fn create_net_client(&self, options: Option<&ScriptValue>) -> Result<NetClientFacade> {
        let options = marshal_options(options)?;
        Ok(NetClientFacade::new(self.context.clone(), options))
    }

    /// Create an HTTP server owned by this context
    pub fn create_http_server(&self, options: Option<&ScriptValue>) -> Result<HttpServerFacade> {
        let options = marshal_options(options)?;
        Ok(HttpServerFacade::new(self.context.clone(), options))
    }

    /// Create an HTTP client owned by this context
    pub fn create_http_client(&self, options: Option<&ScriptValue>) -> Result<HttpClientFacade> {
        let options = marshal_options(options)?;
        Ok(HttpClientFacade::new(self.context.clone(), options))
    }

    /// Bridge SockJS onto an existing HTTP server
    pub fn create_sockjs_server(&self, http_server: &HttpServerFacade) -> SockJsServerFacade {
        SockJsServerFacade::new(http_server)
    }

    /// The filesystem façade, completing on this context
    pub fn file_system(&self) -> FileSystemFacade {
        FileSystemFacade::new(self.context.clone())
    }

    /// The logger façade for this unit
    pub fn logger(&self) -> LoggerFacade {
        LoggerFacade::new(self.deployment_id.clone())
    }
}

fn marshal_options(options: Option<&ScriptValue>) -> Result<Option<ConfigTree>> {
    options.map(to_native).transpose().map_err(Into::into)
}

impl std::fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryPoint")
            .field("context", &self.context)
            .field("deployment_id", &self.deployment_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerFault;
    use crate::host::container::Verticle;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_root_config_is_empty_map() {
        let runtime = HostRuntime::with_defaults().unwrap();
        let entry = EntryPoint::root(Arc::clone(&runtime)).unwrap();

        let config = entry.config();
        assert_eq!(config, ScriptValue::empty_map());
        assert!(!config.is_null());

        entry.context().close(Duration::from_secs(1));
        runtime.shutdown();
    }

    #[test]
    fn test_deployed_unit_reads_its_config_during_start() {
        let runtime = HostRuntime::with_defaults().unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        struct ConfigProbe(crossbeam_channel::Sender<ScriptValue>);
        impl Verticle for ConfigProbe {
            fn start(&mut self, entry: &EntryPoint) -> std::result::Result<(), HandlerFault> {
                self.0.send(entry.config()).unwrap();
                Ok(())
            }
        }
        runtime
            .container()
            .register_unit("app.config", move || Box::new(ConfigProbe(tx.clone())));

        let entry = EntryPoint::root(Arc::clone(&runtime)).unwrap();
        let config = ScriptValue::map([("port", ScriptValue::Int(8080))]);
        entry
            .deploy_verticle("app.config", Some(&config), 1, None)
            .unwrap();

        let seen = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(seen.get("port").and_then(ScriptValue::as_int), Some(8080));

        entry.context().close(Duration::from_secs(1));
        runtime.shutdown();
    }

    #[test]
    fn test_run_on_loop_queues_onto_own_context() {
        let runtime = HostRuntime::with_defaults().unwrap();
        let entry = EntryPoint::root(Arc::clone(&runtime)).unwrap();
        let probe = entry.context().clone();

        let (tx, rx) = mpsc::channel();
        entry
            .run_on_loop(CallableHandle::from_fn0(move || {
                tx.send(probe.is_on_context()).unwrap();
                Ok(())
            }))
            .unwrap();

        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());
        entry.context().close(Duration::from_secs(1));
        runtime.shutdown();
    }

    #[test]
    fn test_run_on_loop_after_close_fails() {
        let runtime = HostRuntime::with_defaults().unwrap();
        let entry = EntryPoint::root(Arc::clone(&runtime)).unwrap();
        entry.context().close(Duration::from_secs(1));

        let err = entry
            .run_on_loop(CallableHandle::from_fn0(|| Ok(())))
            .unwrap_err();
        assert!(matches!(err, BridgeError::Shutdown(_)));
        runtime.shutdown();
    }

    #[test]
    fn test_timer_through_entry_point() {
        let runtime = HostRuntime::with_defaults().unwrap();
        let entry = EntryPoint::root(Arc::clone(&runtime)).unwrap();

        let (tx, rx) = mpsc::channel();
        let id = entry.set_timer(
            1,
            CallableHandle::from_fn0(move || {
                tx.send(()).unwrap();
                Ok(())
            }),
        );
        assert!(id > 0);
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(!entry.cancel_timer(id));

        entry.context().close(Duration::from_secs(1));
        runtime.shutdown();
    }

    #[test]
    fn test_deploy_and_undeploy_through_entry_point() {
        let runtime = HostRuntime::with_defaults().unwrap();

        struct NoopVerticle;
        impl Verticle for NoopVerticle {
            fn start(&mut self, _entry: &EntryPoint) -> std::result::Result<(), HandlerFault> {
                Ok(())
            }
        }
        runtime
            .container()
            .register_unit("app.noop", || Box::new(NoopVerticle));

        let entry = EntryPoint::root(Arc::clone(&runtime)).unwrap();

        let (tx, rx) = mpsc::channel();
        entry
            .deploy_verticle(
                "app.noop",
                None,
                1,
                Some(CallableHandle::from_fn2(move |err, id| {
                    tx.send((err, id)).unwrap();
                    Ok(())
                })),
            )
            .unwrap();
        let (err, id) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(err.is_null());
        let id = id.as_str().unwrap().to_string();

        let (tx, rx) = mpsc::channel();
        entry
            .undeploy_verticle(
                &id,
                Some(CallableHandle::from_fn1(move |err| {
                    tx.send(err).unwrap();
                    Ok(())
                })),
            )
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap().is_null());
        assert!(!runtime.container().has_deployment(&id));

        entry.context().close(Duration::from_secs(1));
        runtime.shutdown();
    }

    #[test]
    fn test_facade_creation() {
        let runtime = HostRuntime::with_defaults().unwrap();
        let entry = EntryPoint::root(Arc::clone(&runtime)).unwrap();

        use crate::value::Facade;
        assert_eq!(
            entry.create_net_server(None).unwrap().facade_kind(),
            "net-server"
        );
        assert_eq!(
            entry.create_net_client(None).unwrap().facade_kind(),
            "net-client"
        );
        let http = entry.create_http_server(None).unwrap();
        assert_eq!(http.facade_kind(), "http-server");
        assert_eq!(
            entry.create_http_client(None).unwrap().facade_kind(),
            "http-client"
        );
        assert_eq!(
            entry.create_sockjs_server(&http).facade_kind(),
            "sockjs-server"
        );
        assert_eq!(entry.file_system().facade_kind(), "file-system");
        assert_eq!(entry.logger().facade_kind(), "logger");

        entry.context().close(Duration::from_secs(1));
        runtime.shutdown();
    }

    #[test]
    fn test_facade_options_marshalled_at_creation() {
        let runtime = HostRuntime::with_defaults().unwrap();
        let entry = EntryPoint::root(Arc::clone(&runtime)).unwrap();

        let options = ScriptValue::map([("ssl", ScriptValue::Bool(true))]);
        let server = entry.create_net_server(Some(&options)).unwrap();
        assert_eq!(
            server.options(),
            Some(&to_native(&options).unwrap())
        );

        let bad = ScriptValue::Map(vec![(ScriptValue::Int(1), ScriptValue::Bool(true))]);
        let err = entry.create_net_server(Some(&bad)).unwrap_err();
        assert!(matches!(err, BridgeError::Marshal(_)));

        entry.context().close(Duration::from_secs(1));
        runtime.shutdown();
    }
}
