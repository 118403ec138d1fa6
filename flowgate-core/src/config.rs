//! Pipeline configuration.
//!
//! Configuration arrives as JSON from administrative collaborators. The wire
//! keys are `pipeline_name`, `plugin_names`, `parallelism`, and
//! `cross_pipeline_request_backlog`; everything else is runtime-local.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FlowgateError, Result};

/// Cross-pipeline request backlog used when the config leaves it at zero.
pub const DEFAULT_CROSS_PIPELINE_BACKLOG: u16 = 10240;

/// How long a scheduled stop waits for in-flight tasks before falling back
/// to an immediate stop.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

fn default_drain_timeout() -> Duration {
    DEFAULT_DRAIN_TIMEOUT
}

/// Configuration shared by every pipeline type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name. Non-empty, URL-friendly characters only
    /// (RFC 3986 §2.3), at most 253 characters.
    #[serde(rename = "pipeline_name")]
    name: String,

    /// Ordered plugin names forming the chain. Must be non-empty.
    #[serde(rename = "plugin_names")]
    plugins: Vec<String>,

    /// Worker count. Zero selects dynamic auto-scheduling.
    #[serde(default)]
    parallelism: u16,

    /// Capacity of this pipeline's cross-pipeline request inbox.
    /// Zero materializes as [`DEFAULT_CROSS_PIPELINE_BACKLOG`].
    #[serde(rename = "cross_pipeline_request_backlog", default)]
    cross_pipeline_request_backlog: u16,

    /// Drain deadline for scheduled stops. Not on the wire.
    #[serde(skip, default = "default_drain_timeout")]
    drain_timeout: Duration,
}

impl PipelineConfig {
    /// Create a config with the given name and no plugins.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugins: Vec::new(),
            parallelism: 0,
            cross_pipeline_request_backlog: 0,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Set the ordered plugin chain.
    pub fn with_plugins<I, S>(mut self, plugins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.plugins = plugins.into_iter().map(Into::into).collect();
        self
    }

    /// Set the worker count (zero = dynamic).
    pub fn with_parallelism(mut self, parallelism: u16) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Set the cross-pipeline request backlog capacity.
    pub fn with_backlog(mut self, backlog: u16) -> Self {
        self.cross_pipeline_request_backlog = backlog;
        self
    }

    /// Set the scheduled-stop drain deadline.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// The pipeline name.
    pub fn pipeline_name(&self) -> &str {
        &self.name
    }

    /// The ordered plugin names.
    pub fn plugin_names(&self) -> &[String] {
        &self.plugins
    }

    /// The configured worker count (zero = dynamic).
    pub fn parallelism(&self) -> u16 {
        self.parallelism
    }

    /// The cross-pipeline request backlog capacity.
    pub fn cross_pipeline_request_backlog(&self) -> u16 {
        self.cross_pipeline_request_backlog
    }

    /// The scheduled-stop drain deadline.
    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    /// Validate the config and apply defaults. Must succeed before a
    /// pipeline is built from it.
    pub fn prepare(&mut self) -> Result<()> {
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            return Err(FlowgateError::InvalidConfig {
                cause: "empty pipeline name".to_string(),
            });
        }
        validate_name(&self.name)?;

        if self.plugins.is_empty() {
            return Err(FlowgateError::InvalidConfig {
                cause: format!("pipeline '{}' has no plugins", self.name),
            });
        }
        if let Some(idx) = self.plugins.iter().position(|p| p.trim().is_empty()) {
            return Err(FlowgateError::InvalidConfig {
                cause: format!("pipeline '{}' has an empty plugin name at #{}", self.name, idx),
            });
        }

        if self.cross_pipeline_request_backlog == 0 {
            self.cross_pipeline_request_backlog = DEFAULT_CROSS_PIPELINE_BACKLOG;
        }

        Ok(())
    }
}

/// Validate a name against the URL-friendly charset of RFC 3986 §2.3,
/// limited to 253 characters.
pub fn validate_name(name: &str) -> Result<()> {
    let friendly = !name.is_empty()
        && name.len() <= 253
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~'));

    if friendly {
        Ok(())
    } else {
        Err(FlowgateError::InvalidConfig {
            cause: format!("name '{}' is not URL-friendly", name),
        })
    }
}

/// The pipeline types this runtime knows how to build.
pub const PIPELINE_TYPES: &[&str] = &["LinearPipeline"];

/// Check whether a pipeline type name is known.
pub fn valid_type(t: &str) -> bool {
    PIPELINE_TYPES.contains(&t)
}

/// All known pipeline type names.
pub fn all_types() -> Vec<String> {
    PIPELINE_TYPES.iter().map(|t| t.to_string()).collect()
}
