//! Handler adaptation between scripting-layer callables and the host's
//! native callback dispatch.
//!
//! A [`WrappedHandler`] pairs a [`CallableHandle`] with an invocation policy
//! and an arity contract, and satisfies the host's callback interface: the
//! host calls [`WrappedHandler::dispatch`] from whatever thread an event
//! lands on, and the adapter re-queues the invocation onto the owning
//! context so the callable only ever runs on that context's thread.
//!
//! Arity is not checked at registration time (scripting layers are not
//! statically checked); a mismatch is a binding error surfaced at first
//! invocation through the context's fault hook. Faults raised by the
//! callable itself are likewise routed to the fault hook, never swallowed.

use crate::error::{CompletionError, HandlerFault};
use crate::host::context::ContextHandle;
use crate::value::{from_native, ConfigTree, ScriptValue};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// A scripting-layer callable.
///
/// Implementations report the number of positional parameters they accept;
/// the adapter compares this against the declared contract at invocation
/// time.
pub trait ScriptCallable: Send + Sync + 'static {
    /// Number of positional parameters the callable accepts
    fn arity(&self) -> usize;

    /// Invoke with positional arguments
    fn invoke(&self, args: &[ScriptValue]) -> Result<(), HandlerFault>;
}

/// Opaque reference to a scripting-layer callable.
///
/// The bridge holds this for the duration of at least one invocation
/// (single-shot) or until the owning resource closes (repeatable).
#[derive(Clone)]
pub struct CallableHandle(Arc<dyn ScriptCallable>);

impl CallableHandle {
    /// Wrap a callable implementation
    pub fn new(callable: impl ScriptCallable) -> Self {
        Self(Arc::new(callable))
    }

    /// Wrap a zero-argument closure
    pub fn from_fn0<F>(f: F) -> Self
    where
        F: Fn() -> Result<(), HandlerFault> + Send + Sync + 'static,
    {
        struct Fn0<F>(F);
        impl<F> ScriptCallable for Fn0<F>
        where
            F: Fn() -> Result<(), HandlerFault> + Send + Sync + 'static,
        {
            fn arity(&self) -> usize {
                0
            }
            fn invoke(&self, _args: &[ScriptValue]) -> Result<(), HandlerFault> {
                (self.0)()
            }
        }
        Self::new(Fn0(f))
    }

    /// Wrap a one-argument closure
    pub fn from_fn1<F>(f: F) -> Self
    where
        F: Fn(ScriptValue) -> Result<(), HandlerFault> + Send + Sync + 'static,
    {
        struct Fn1<F>(F);
        impl<F> ScriptCallable for Fn1<F>
        where
            F: Fn(ScriptValue) -> Result<(), HandlerFault> + Send + Sync + 'static,
        {
            fn arity(&self) -> usize {
                1
            }
            fn invoke(&self, args: &[ScriptValue]) -> Result<(), HandlerFault> {
                (self.0)(args[0].clone())
            }
        }
        Self::new(Fn1(f))
    }

    /// Wrap a two-argument (error-first) closure
    pub fn from_fn2<F>(f: F) -> Self
    where
        F: Fn(ScriptValue, ScriptValue) -> Result<(), HandlerFault> + Send + Sync + 'static,
    {
        struct Fn2<F>(F);
        impl<F> ScriptCallable for Fn2<F>
        where
            F: Fn(ScriptValue, ScriptValue) -> Result<(), HandlerFault> + Send + Sync + 'static,
        {
            fn arity(&self) -> usize {
                2
            }
            fn invoke(&self, args: &[ScriptValue]) -> Result<(), HandlerFault> {
                (self.0)(args[0].clone(), args[1].clone())
            }
        }
        Self::new(Fn2(f))
    }

    fn arity(&self) -> usize {
        self.0.arity()
    }

    fn invoke(&self, args: &[ScriptValue]) -> Result<(), HandlerFault> {
        self.0.invoke(args)
    }
}

impl std::fmt::Debug for CallableHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CallableHandle(arity={})", self.arity())
    }
}

/// How many positional values the host delivers per invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArityContract {
    /// No arguments (timers, run-on-loop)
    Nullary,
    /// One argument: an event value, or the error position of an
    /// `(error)`-style completion (undeploy)
    Unary,
    /// Two arguments, error-first: `(error, result)`
    ErrorFirst,
}

impl ArityContract {
    /// Number of positional arguments the contract implies
    pub fn arg_count(&self) -> usize {
        match self {
            ArityContract::Nullary => 0,
            ArityContract::Unary => 1,
            ArityContract::ErrorFirst => 2,
        }
    }
}

/// Whether a handler may fire more than once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationPolicy {
    /// Released immediately after the first dispatch; later dispatches are
    /// structurally impossible
    SingleShot,
    /// Remains registered until the owning resource closes or the
    /// registration is explicitly released
    Repeatable,
}

/// Opaque native resource passed through a callback (socket, server, ...)
pub type OpaqueArg = Arc<dyn Any + Send + Sync>;

/// A native argument value delivered by the host at dispatch time
#[derive(Clone)]
pub enum NativeArg {
    /// A typed tree value, converted via the marshaller
    Tree(ConfigTree),
    /// An object-typed native value; converted by the registration-site
    /// converter into a façade, never raw-exposed
    Opaque(OpaqueArg),
}

impl std::fmt::Debug for NativeArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NativeArg::Tree(tree) => f.debug_tuple("Tree").field(tree).finish(),
            NativeArg::Opaque(_) => f.debug_tuple("Opaque").finish(),
        }
    }
}

/// Arguments the host supplies when invoking a wrapped handler
#[derive(Debug, Clone)]
pub enum CallbackArgs {
    /// No payload (timer fire, run-on-loop)
    None,
    /// A single event payload (data, connect)
    Value(NativeArg),
    /// Outcome of a fallible asynchronous operation
    Completion(Result<Option<NativeArg>, CompletionError>),
}

/// Converter applied to opaque native arguments at the boundary.
///
/// Registration sites that deliver object-typed values (sockets, servers)
/// supply one of these to wrap the native value in its façade.
pub type ArgConverter =
    Arc<dyn Fn(&NativeArg) -> Result<ScriptValue, HandlerFault> + Send + Sync>;

fn default_converter() -> ArgConverter {
    Arc::new(|arg| match arg {
        NativeArg::Tree(tree) => Ok(from_native(tree)),
        NativeArg::Opaque(_) => Err(HandlerFault::script(
            "No converter registered for object-typed callback argument",
        )),
    })
}

struct HandlerInner {
    context: ContextHandle,
    contract: ArityContract,
    policy: InvocationPolicy,
    callable: Mutex<Option<CallableHandle>>,
    consumed: AtomicBool,
    convert: ArgConverter,
}

/// Adapter satisfying the host's native callback interface while delegating
/// to a scripting-layer callable.
#[derive(Clone)]
pub struct WrappedHandler {
    inner: Arc<HandlerInner>,
}

impl WrappedHandler {
    fn build(
        context: ContextHandle,
        contract: ArityContract,
        policy: InvocationPolicy,
        callable: CallableHandle,
        convert: ArgConverter,
    ) -> Self {
        Self {
            inner: Arc::new(HandlerInner {
                context,
                contract,
                policy,
                callable: Mutex::new(Some(callable)),
                consumed: AtomicBool::new(false),
                convert,
            }),
        }
    }

    /// Wrap a zero-argument callable
    pub fn nullary(
        context: ContextHandle,
        policy: InvocationPolicy,
        callable: CallableHandle,
    ) -> Self {
        Self::build(
            context,
            ArityContract::Nullary,
            policy,
            callable,
            default_converter(),
        )
    }

    /// Wrap a one-argument callable
    pub fn unary(
        context: ContextHandle,
        policy: InvocationPolicy,
        callable: CallableHandle,
    ) -> Self {
        Self::build(
            context,
            ArityContract::Unary,
            policy,
            callable,
            default_converter(),
        )
    }

    /// Wrap a one-argument callable with a registration-site converter for
    /// object-typed arguments
    pub fn unary_converted(
        context: ContextHandle,
        policy: InvocationPolicy,
        callable: CallableHandle,
        convert: ArgConverter,
    ) -> Self {
        Self::build(context, ArityContract::Unary, policy, callable, convert)
    }

    /// Wrap a two-argument error-first completion callable
    pub fn error_first(
        context: ContextHandle,
        policy: InvocationPolicy,
        callable: CallableHandle,
    ) -> Self {
        Self::build(
            context,
            ArityContract::ErrorFirst,
            policy,
            callable,
            default_converter(),
        )
    }

    /// Wrap a two-argument error-first completion callable with a
    /// registration-site converter for an object-typed result
    pub fn error_first_converted(
        context: ContextHandle,
        policy: InvocationPolicy,
        callable: CallableHandle,
        convert: ArgConverter,
    ) -> Self {
        Self::build(context, ArityContract::ErrorFirst, policy, callable, convert)
    }

    /// The context this handler is bound to
    pub fn context(&self) -> &ContextHandle {
        &self.inner.context
    }

    /// The declared arity contract
    pub fn contract(&self) -> ArityContract {
        self.inner.contract
    }

    /// The invocation policy
    pub fn policy(&self) -> InvocationPolicy {
        self.inner.policy
    }

    /// Whether the handler can still fire
    pub fn is_live(&self) -> bool {
        self.inner.callable.lock().is_some()
    }

    /// Release the held callable reference; no further dispatch is possible.
    ///
    /// Idempotent. Called when the owning resource closes, a registration is
    /// unregistered, or a timer is cancelled.
    pub fn release(&self) {
        self.inner.consumed.store(true, Ordering::Release);
        *self.inner.callable.lock() = None;
    }

    /// The host's callback entry point.
    ///
    /// May be called from any host thread; the invocation is queued onto the
    /// owning context. Returns `true` if the invocation was queued, `false`
    /// if the handler was already consumed, released, or its context closed.
    ///
    /// The callable itself is resolved on the owning thread when the queued
    /// task runs, not here: a [`release`](Self::release) that lands between
    /// dispatch and execution (the owning resource closed) suppresses the
    /// invocation.
    pub fn dispatch(&self, args: CallbackArgs) -> bool {
        if let InvocationPolicy::SingleShot = self.inner.policy {
            // The swap makes a second dispatch lose the race even when two
            // host threads fire simultaneously.
            if self.inner.consumed.swap(true, Ordering::AcqRel) {
                return false;
            }
        }
        if self.inner.callable.lock().is_none() {
            return false;
        }

        let inner = Arc::clone(&self.inner);
        let queued = self.inner.context.execute(Box::new(move || {
            let callable = match inner.policy {
                InvocationPolicy::SingleShot => inner.callable.lock().take(),
                InvocationPolicy::Repeatable => inner.callable.lock().clone(),
            };
            let callable = match callable {
                Some(callable) => callable,
                // Released while queued; the resource's close wins.
                None => return,
            };
            if let Err(fault) = run_invocation(&callable, inner.contract, &inner.convert, args) {
                inner.context.report_fault(fault);
            }
        }));

        match queued {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropped handler dispatch: {}", e);
                false
            }
        }
    }
}

impl std::fmt::Debug for WrappedHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappedHandler")
            .field("contract", &self.inner.contract)
            .field("policy", &self.inner.policy)
            .field("live", &self.is_live())
            .finish()
    }
}

fn run_invocation(
    callable: &CallableHandle,
    contract: ArityContract,
    convert: &ArgConverter,
    args: CallbackArgs,
) -> Result<(), HandlerFault> {
    // Binding errors surface here, on first invocation.
    let expected = contract.arg_count();
    let actual = callable.arity();
    if expected != actual {
        return Err(HandlerFault::binding(expected, actual));
    }

    let script_args: Vec<ScriptValue> = match (contract, args) {
        (ArityContract::Nullary, CallbackArgs::None) => Vec::new(),
        (ArityContract::Unary, CallbackArgs::Value(arg)) => vec![convert(&arg)?],
        // (error)-style completion: the single argument is the error
        // position, null on success.
        (ArityContract::Unary, CallbackArgs::Completion(outcome)) => match outcome {
            Ok(_) => vec![ScriptValue::Null],
            Err(err) => vec![ScriptValue::from(&err)],
        },
        // Error-first pairing: success => (null, result), failure =>
        // (error, null).
        (ArityContract::ErrorFirst, CallbackArgs::Completion(outcome)) => match outcome {
            Ok(Some(arg)) => vec![ScriptValue::Null, convert(&arg)?],
            Ok(None) => vec![ScriptValue::Null, ScriptValue::Null],
            Err(err) => vec![ScriptValue::from(&err), ScriptValue::Null],
        },
        (contract, args) => {
            return Err(HandlerFault::script(format!(
                "Host delivered {:?} to a {:?} handler",
                args, contract
            )));
        }
    };

    callable.invoke(&script_args)
}
