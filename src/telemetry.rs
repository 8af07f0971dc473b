//! Error-tracking capability.
//!
//! Jobs report transient fetch/parse failures through [`ErrorReporter`]
//! before aborting; the default [`LogReporter`] emits structured log events.
//! Deployments with an external error tracker plug in their own
//! implementation.

use std::error::Error;

/// External error-tracking collaborator.
pub trait ErrorReporter: Send + Sync {
    /// Record a failure. Must not panic or block.
    fn report(&self, err: &(dyn Error + 'static));
}

/// Default reporter: structured error log, nothing else.
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, err: &(dyn Error + 'static)) {
        tracing::error!(error = %err, "reported failure");
    }
}
