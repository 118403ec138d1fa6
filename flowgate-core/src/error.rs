//! Error types for Flowgate.
//!
//! One error enum covers the whole runtime. Every variant carries a stable
//! `E###` code so administrative tooling can match on it without parsing
//! message text.

use crate::task::ResultCode;
use thiserror::Error;

/// The main error type for Flowgate operations.
#[derive(Error, Debug)]
pub enum FlowgateError {
    // =========================================================================
    // Configuration Errors (E001-E099)
    // =========================================================================
    /// Pipeline configuration rejected at prepare.
    #[error("E001: invalid pipeline config: {cause}")]
    InvalidConfig {
        /// Why the configuration was rejected.
        cause: String,
    },

    // =========================================================================
    // Plugin Errors (E100-E199)
    // =========================================================================
    /// No factory registered under the requested plugin name.
    #[error("E101: no plugin factory registered for '{plugin}'")]
    PluginNotFound {
        /// The unresolved plugin name.
        plugin: String,
    },

    /// A plugin's prepare hook failed; pipeline start is aborted.
    #[error("E102: plugin '{plugin}' failed to prepare: {cause}")]
    PluginPrepareFailed {
        /// The plugin whose prepare failed.
        plugin: String,
        /// Reason for the failure.
        cause: String,
    },

    /// A plugin failed the task it was running.
    ///
    /// Returned by plugins to report a task-level failure together with the
    /// result code the worker should record on the task.
    #[error("E103: plugin '{plugin}' failed task ({code}): {cause}")]
    TaskPluginFailed {
        /// The failing plugin.
        plugin: String,
        /// The result code to record on the task.
        code: ResultCode,
        /// Reason for the failure.
        cause: String,
    },

    // =========================================================================
    // Cancellation / Channel Errors (E200-E299)
    // =========================================================================
    /// A blocking operation observed its cancellation signal.
    ///
    /// Timeouts are expressed as a cancellation fired by a timer, so there is
    /// no separate timeout kind.
    #[error("E201: {operation} cancelled")]
    Cancelled {
        /// The operation that was cancelled.
        operation: String,
    },

    /// An operation was invoked against a closed pipeline or a closed
    /// cross-pipeline response channel.
    #[error("E202: pipeline '{pipeline}' is closed")]
    PipelineClosed {
        /// The pipeline that is closed.
        pipeline: String,
    },

    // =========================================================================
    // Statistics Errors (E300-E399)
    // =========================================================================
    /// A statistics query ran before any sample or tick was recorded.
    #[error("E301: no statistics info for {scope}")]
    NoStatisticsInfo {
        /// What was queried (pipeline, plugin, indicator).
        scope: String,
    },

    /// A custom indicator name collided with one owned by another instance.
    #[error("E302: indicator '{indicator}' already registered for plugin '{plugin}'")]
    DuplicateIndicator {
        /// The plugin the indicator belongs to.
        plugin: String,
        /// The colliding indicator name.
        indicator: String,
    },

    // =========================================================================
    // Lifecycle Errors (E400-E499)
    // =========================================================================
    /// A pipeline lifecycle transition that the state machine forbids.
    #[error("E401: illegal pipeline state transition: {from} -> {to}")]
    IllegalState {
        /// The current state.
        from: String,
        /// The requested state.
        to: String,
    },
}

impl FlowgateError {
    /// Get the error code (e.g., "E001").
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "E001",
            Self::PluginNotFound { .. } => "E101",
            Self::PluginPrepareFailed { .. } => "E102",
            Self::TaskPluginFailed { .. } => "E103",
            Self::Cancelled { .. } => "E201",
            Self::PipelineClosed { .. } => "E202",
            Self::NoStatisticsInfo { .. } => "E301",
            Self::DuplicateIndicator { .. } => "E302",
            Self::IllegalState { .. } => "E401",
        }
    }

    /// Check if this error came from an observed cancellation signal.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Check if this error halts pipeline start (as opposed to failing a
    /// single task).
    #[must_use]
    pub fn is_startup_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. }
                | Self::PluginNotFound { .. }
                | Self::PluginPrepareFailed { .. }
                | Self::IllegalState { .. }
        )
    }

    /// Shorthand for a [`FlowgateError::Cancelled`] with the given operation.
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Shorthand for a [`FlowgateError::PipelineClosed`] for the given
    /// pipeline.
    pub fn closed(pipeline: impl Into<String>) -> Self {
        Self::PipelineClosed {
            pipeline: pipeline.into(),
        }
    }
}

/// Result type alias using [`FlowgateError`].
pub type Result<T> = std::result::Result<T, FlowgateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        let err = FlowgateError::InvalidConfig {
            cause: "empty pipeline name".to_string(),
        };
        assert_eq!(err.code(), "E001");

        let err = FlowgateError::cancelled("cross-pipeline commit");
        assert_eq!(err.code(), "E201");
        assert!(err.is_cancelled());
    }

    #[test]
    fn error_display() {
        let err = FlowgateError::DuplicateIndicator {
            plugin: "throttle".to_string(),
            indicator: "drop_rate".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("E302"));
        assert!(msg.contains("drop_rate"));
        assert!(msg.contains("throttle"));
    }

    #[test]
    fn startup_errors() {
        assert!(
            FlowgateError::PluginPrepareFailed {
                plugin: "src".to_string(),
                cause: "bind failed".to_string(),
            }
            .is_startup_error()
        );
        assert!(!FlowgateError::cancelled("claim").is_startup_error());
    }
}
