//! # Eventide Script Bridge
//!
//! This library bridges a dynamically-typed scripting layer onto an
//! event-loop host runtime: scripting callables become host callbacks with
//! strict thread affinity, scripting values marshal to and from the host's
//! typed tree format, and the host's timer, deployment and resource
//! operations are exposed through a single per-unit entry point.
//!
//! ## Architecture
//!
//! ```text
//! Scripting layer (callables, dynamic values)
//!     │
//!     │ EntryPoint / façades
//!     ▼
//! Bridge (this crate)
//!     │
//!     │ WrappedHandler dispatch, ConfigTree marshalling
//!     ▼
//! Host runtime (contexts, timer wheel, container, resources)
//! ```
//!
//! ## Guarantees
//!
//! - **Thread affinity**: a handler only ever runs on the context that
//!   registered it, one invocation at a time
//! - **Single-shot consumption**: completion handlers are structurally
//!   released after their first firing
//! - **Error-first completions**: asynchronous failures arrive as the first
//!   callback argument, never as exceptions across the boundary
//! - **Fault isolation**: handler faults are routed to the owning context's
//!   fault hook and never escape the unit

#![deny(missing_docs)]

pub mod config;
pub mod deploy;
pub mod entry;
pub mod error;
pub mod facades;
pub mod handler;
pub mod host;
pub mod timer;
pub mod value;

// Re-export commonly used types
pub use config::HostConfig;
pub use deploy::{DeploymentManager, UnitKind};
pub use entry::EntryPoint;
pub use error::{BridgeError, CompletionCode, CompletionError, HandlerFault, MarshalError};
pub use handler::{CallableHandle, CallbackArgs, InvocationPolicy, ScriptCallable, WrappedHandler};
pub use host::container::Verticle;
pub use host::context::{ContextHandle, ContextKind};
pub use host::timer::TimerId;
pub use host::HostRuntime;
pub use timer::TimerService;
pub use value::{from_native, to_native, ConfigTree, Facade, FacadeRef, ScriptValue};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize tracing for embedders that have no subscriber of their own.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("eventide_script_bridge=debug".parse().unwrap()),
        )
        .try_init();
}
