//! Logger façade routing scripting-layer log calls into the host's
//! structured logging.

use crate::value::Facade;
use std::any::Any;
use tracing::{debug, error, info, trace, warn};

const SCRIPT_TARGET: &str = "script";

/// Scripting façade over the host logger.
///
/// Records carry the deployment id when the logger belongs to a deployed
/// unit, so interleaved unit output stays attributable.
pub struct LoggerFacade {
    deployment_id: Option<String>,
}

impl LoggerFacade {
    /// Create a logger for a deployed unit (or the root entry when `None`)
    pub fn new(deployment_id: Option<String>) -> Self {
        Self { deployment_id }
    }

    /// Log at trace level
    pub fn trace(&self, message: &str) {
        trace!(target: SCRIPT_TARGET, deployment_id = self.deployment_id.as_deref(), "{}", message);
    }

    /// Log at debug level
    pub fn debug(&self, message: &str) {
        debug!(target: SCRIPT_TARGET, deployment_id = self.deployment_id.as_deref(), "{}", message);
    }

    /// Log at info level
    pub fn info(&self, message: &str) {
        info!(target: SCRIPT_TARGET, deployment_id = self.deployment_id.as_deref(), "{}", message);
    }

    /// Log at warn level
    pub fn warn(&self, message: &str) {
        warn!(target: SCRIPT_TARGET, deployment_id = self.deployment_id.as_deref(), "{}", message);
    }

    /// Log at error level
    pub fn error(&self, message: &str) {
        error!(target: SCRIPT_TARGET, deployment_id = self.deployment_id.as_deref(), "{}", message);
    }
}

impl Facade for LoggerFacade {
    fn facade_kind(&self) -> &'static str {
        "logger"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
