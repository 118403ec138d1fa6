//! Pipeline lifecycle contract.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::error::Result;

/// A boxed future for async pipeline operations.
pub type PipelineFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Pipeline lifecycle state.
///
/// Transitions: Created → Prepared → Running → Stopping → Stopped. A stopped
/// pipeline cannot run again; build a new one from the same config instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Built; context allocated, plugins not yet prepared.
    Created,
    /// Every plugin instance prepared in chain order.
    Prepared,
    /// Worker pool running.
    Running,
    /// Stop requested; draining or cancelling in-flight tasks.
    Stopping,
    /// Workers joined and plugin instances cleaned up. Terminal.
    Stopped,
}

impl PipelineState {
    /// The state's display name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Prepared => "Prepared",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
            Self::Stopped => "Stopped",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The lifecycle contract an orchestrator drives a pipeline through.
pub trait Pipeline: Send + Sync {
    /// The pipeline name.
    fn name(&self) -> &str;

    /// The current lifecycle state.
    fn state(&self) -> PipelineState;

    /// Prepare every plugin instance in chain order.
    fn prepare<'a>(&'a self) -> PipelineFuture<'a, ()>;

    /// Spawn the worker pool.
    fn run<'a>(&'a self) -> PipelineFuture<'a, ()>;

    /// Stop the pipeline. A scheduled stop drains in-flight tasks up to the
    /// configured deadline first; an immediate stop cancels them.
    fn stop<'a>(&'a self, scheduled: bool) -> PipelineFuture<'a, ()>;

    /// Close the pipeline's context. Idempotent.
    fn close<'a>(&'a self) -> PipelineFuture<'a, ()>;
}
