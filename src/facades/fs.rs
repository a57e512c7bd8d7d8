//! Filesystem façade.
//!
//! Every operation runs on a short-lived blocking thread, never on the
//! requesting context; the completion is dispatched back onto that context
//! once the operation finishes. Results and errors follow the same
//! error-first convention as the rest of the bridge.

use crate::error::CompletionError;
use crate::handler::{CallableHandle, CallbackArgs, InvocationPolicy, NativeArg, WrappedHandler};
use crate::host::context::ContextHandle;
use crate::value::{ConfigTree, Facade};
use std::any::Any;
use std::path::Path;
use std::thread;
use tracing::error;

/// Scripting façade over blocking filesystem operations
pub struct FileSystemFacade {
    context: ContextHandle,
}

impl FileSystemFacade {
    /// Create a façade whose completions fire on `context`
    pub fn new(context: ContextHandle) -> Self {
        Self { context }
    }

    /// Read a file to a string; error-first completion with the contents.
    pub fn read_to_string(&self, path: impl Into<String>, callable: CallableHandle) {
        let completion = self.error_first(callable);
        let path = path.into();
        run_blocking(move || {
            let outcome = std::fs::read_to_string(&path)
                .map(|contents| Some(NativeArg::Tree(ConfigTree::String(contents))))
                .map_err(|e| CompletionError::io(format!("{}: {}", path, e)));
            completion.dispatch(CallbackArgs::Completion(outcome));
        });
    }

    /// Write a string to a file; `(error)`-style completion.
    pub fn write_string(
        &self,
        path: impl Into<String>,
        contents: impl Into<String>,
        callable: CallableHandle,
    ) {
        let completion = self.unary(callable);
        let path = path.into();
        let contents = contents.into();
        run_blocking(move || {
            let outcome = std::fs::write(&path, contents.as_bytes())
                .map(|_| None)
                .map_err(|e| CompletionError::io(format!("{}: {}", path, e)));
            completion.dispatch(CallbackArgs::Completion(outcome));
        });
    }

    /// Check whether a path exists; error-first completion with a boolean.
    pub fn exists(&self, path: impl Into<String>, callable: CallableHandle) {
        let completion = self.error_first(callable);
        let path = path.into();
        run_blocking(move || {
            let exists = Path::new(&path).exists();
            completion.dispatch(CallbackArgs::Completion(Ok(Some(NativeArg::Tree(
                ConfigTree::Bool(exists),
            )))));
        });
    }

    /// Delete a file; `(error)`-style completion.
    pub fn delete(&self, path: impl Into<String>, callable: CallableHandle) {
        let completion = self.unary(callable);
        let path = path.into();
        run_blocking(move || {
            let outcome = std::fs::remove_file(&path)
                .map(|_| None)
                .map_err(|e| CompletionError::io(format!("{}: {}", path, e)));
            completion.dispatch(CallbackArgs::Completion(outcome));
        });
    }

    /// Create a directory and any missing parents; `(error)`-style
    /// completion.
    pub fn mkdir(&self, path: impl Into<String>, callable: CallableHandle) {
        let completion = self.unary(callable);
        let path = path.into();
        run_blocking(move || {
            let outcome = std::fs::create_dir_all(&path)
                .map(|_| None)
                .map_err(|e| CompletionError::io(format!("{}: {}", path, e)));
            completion.dispatch(CallbackArgs::Completion(outcome));
        });
    }

    fn error_first(&self, callable: CallableHandle) -> WrappedHandler {
        WrappedHandler::error_first(self.context.clone(), InvocationPolicy::SingleShot, callable)
    }

    fn unary(&self, callable: CallableHandle) -> WrappedHandler {
        WrappedHandler::unary(self.context.clone(), InvocationPolicy::SingleShot, callable)
    }
}

impl Facade for FileSystemFacade {
    fn facade_kind(&self) -> &'static str {
        "file-system"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn run_blocking(op: impl FnOnce() + Send + 'static) {
    let spawned = thread::Builder::new()
        .name("eventide-fs".to_string())
        .spawn(op);
    if let Err(e) = spawned {
        error!("Failed to spawn filesystem thread: {}", e);
    }
}
