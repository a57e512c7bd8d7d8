//! Scripting-facing resource façades.
//!
//! Each façade wraps one host resource and owns the boundary work the
//! scripting layer must never see: wrapping callables into repeatable
//! handlers, converting object-typed callback arguments into further
//! façades, and translating completion outcomes into error-first argument
//! pairs.

pub mod fs;
pub mod http;
pub mod logger;
pub mod net;

use parking_lot::Mutex;

/// Handle returned by handler-registering façade methods.
///
/// Dropping the registration leaves the handler in place; call
/// [`Registration::unregister`] to remove it and release the callable.
pub struct Registration {
    unregister: Mutex<Option<Box<dyn FnOnce() -> bool + Send>>>,
}

impl Registration {
    pub(crate) fn new(unregister: impl FnOnce() -> bool + Send + 'static) -> Self {
        Self {
            unregister: Mutex::new(Some(Box::new(unregister))),
        }
    }

    /// Remove the registration. Returns `false` if it was already removed
    /// (including by the resource closing).
    pub fn unregister(&self) -> bool {
        match self.unregister.lock().take() {
            Some(f) => f(),
            None => false,
        }
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("active", &self.unregister.lock().is_some())
            .finish()
    }
}
