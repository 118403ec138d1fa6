//! Plugin trait and factory.
//!
//! A plugin is one stage of a pipeline chain. The runtime instantiates one
//! plugin instance per worker (unless the factory declares the plugin
//! shareable), calls `prepare` once per instance before the pipeline runs,
//! `run` for every task that reaches the stage, and `cleanup` when the
//! pipeline stops. The runtime never inspects plugin internals.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::PipelineContext;
use crate::error::Result;
use crate::task::Task;

/// A boxed future for async plugin operations.
pub type PluginFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// One stage in a pipeline chain.
///
/// `run` owns the task for the duration of the call; there is no
/// concurrency within a single task. Plugins that perform I/O are expected
/// to observe the task's cancellation signal. A failure is reported either
/// by setting a failure result code on the task or by returning an error
/// (ideally [`crate::error::FlowgateError::TaskPluginFailed`], which carries
/// the code to record); either way the pipeline itself keeps running.
///
/// # Example
///
/// ```ignore
/// use flowgate_core::prelude::*;
///
/// struct Uppercase;
///
/// impl Plugin for Uppercase {
///     fn name(&self) -> &str {
///         "uppercase"
///     }
///
///     fn run<'a>(&'a self, task: &'a mut Task, _ctx: &'a PipelineContext) -> PluginFuture<'a, ()> {
///         Box::pin(async move {
///             if let Some(s) = task.get("text").and_then(Value::as_str) {
///                 let upper = s.to_uppercase();
///                 task.set("text", Value::from(upper));
///             }
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait Plugin: Send + Sync {
    /// The plugin's name, as referenced by pipeline configs.
    fn name(&self) -> &str;

    /// Called once per instance before the pipeline starts. A failure here
    /// aborts pipeline start.
    fn prepare<'a>(&'a self, ctx: &'a PipelineContext) -> PluginFuture<'a, ()> {
        let _ = ctx;
        Box::pin(async { Ok(()) })
    }

    /// Run one task through this stage.
    fn run<'a>(&'a self, task: &'a mut Task, ctx: &'a PipelineContext) -> PluginFuture<'a, ()>;

    /// Called once per instance when the pipeline stops. Instance-scoped
    /// data buckets should be deleted here.
    fn cleanup<'a>(&'a self, ctx: &'a PipelineContext) -> PluginFuture<'a, ()> {
        let _ = ctx;
        Box::pin(async { Ok(()) })
    }
}

/// Creates plugin instances from configuration.
///
/// Factories are registered with the engine's plugin registry by external
/// collaborators together with the plugin's parameter blob.
pub trait PluginFactory: Send + Sync {
    /// The plugin name this factory creates instances for.
    fn plugin_name(&self) -> &str;

    /// Whether one instance may be shared by all workers. Shareable plugins
    /// must synchronize internally.
    fn shareable(&self) -> bool {
        false
    }

    /// Create a new plugin instance from its parameter blob.
    fn create(&self, config: &serde_json::Value) -> Result<Arc<dyn Plugin>>;
}
