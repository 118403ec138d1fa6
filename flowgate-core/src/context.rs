//! Per-pipeline execution context.
//!
//! Every plugin invocation receives the pipeline's [`PipelineContext`]. It
//! binds the data buckets, the statistics, and the cross-pipeline channel,
//! and forwards source-input triggers to registered listeners (the scheduler
//! listens in dynamic-parallelism mode).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::bucket::{BucketScope, DataBucket};
use crate::cancel::Cancellation;
use crate::channel::{CrossPipelineRouter, DownstreamRequest};
use crate::config::PipelineConfig;
use crate::error::{FlowgateError, Result};
use crate::statistics::PipelineStatistics;

/// Reports the current queue length of a source plugin's input.
pub type SourceInputQueueLengthGetter = Arc<dyn Fn() -> u32 + Send + Sync>;

/// Listens for source-input triggers. Receives the getter name and the
/// queue-length getter.
pub type SourceInputListener = Arc<dyn Fn(&str, &SourceInputQueueLengthGetter) + Send + Sync>;

/// Per-pipeline facade over buckets, statistics, and the cross-pipeline
/// channel.
pub struct PipelineContext {
    pipeline_name: String,
    plugin_names: Vec<String>,
    statistics: Arc<PipelineStatistics>,
    buckets: RwLock<HashMap<(String, BucketScope), Arc<DataBucket>>>,
    router: Arc<CrossPipelineRouter>,
    source_input_listeners: RwLock<Vec<SourceInputListener>>,
    closed: AtomicBool,
}

impl PipelineContext {
    /// Create a context for a prepared config, register its cross-pipeline
    /// inbox, and start its statistics ticker. Must run within a Tokio
    /// runtime.
    pub fn new(config: &PipelineConfig, router: Arc<CrossPipelineRouter>) -> Arc<Self> {
        let statistics =
            PipelineStatistics::new(config.pipeline_name(), config.plugin_names());
        Arc::clone(&statistics).start_ticker();

        router.register(
            config.pipeline_name(),
            config.cross_pipeline_request_backlog() as usize,
        );

        Arc::new(Self {
            pipeline_name: config.pipeline_name().to_string(),
            plugin_names: config.plugin_names().to_vec(),
            statistics,
            buckets: RwLock::new(HashMap::new()),
            router,
            source_input_listeners: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// The pipeline name.
    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    /// The ordered plugin names of the chain.
    pub fn plugin_names(&self) -> &[String] {
        &self.plugin_names
    }

    /// The pipeline's statistics.
    pub fn statistics(&self) -> Arc<PipelineStatistics> {
        Arc::clone(&self.statistics)
    }

    /// Get (creating if necessary) the data bucket for a plugin and scope.
    ///
    /// Instance-scoped buckets are expected to be deleted by the plugin
    /// instance's cleanup hook; plugin-wide buckets live until the plugin is
    /// removed from the pipeline.
    pub fn data_bucket(&self, plugin: &str, scope: BucketScope) -> Arc<DataBucket> {
        let key = (plugin.to_string(), scope);
        if let Some(bucket) = self.buckets.read().get(&key) {
            return Arc::clone(bucket);
        }
        Arc::clone(
            self.buckets
                .write()
                .entry(key)
                .or_insert_with(|| Arc::new(DataBucket::new())),
        )
    }

    /// Delete a data bucket, returning it if it existed.
    pub fn delete_bucket(&self, plugin: &str, scope: BucketScope) -> Option<Arc<DataBucket>> {
        self.buckets
            .write()
            .remove(&(plugin.to_string(), scope))
    }

    /// Commit a request onto its upstream pipeline's inbox (downstream
    /// side). Blocks while the backlog is full.
    pub async fn commit_cross_pipeline_request(
        &self,
        request: DownstreamRequest,
        cancel: &Cancellation,
    ) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FlowgateError::closed(&self.pipeline_name));
        }
        self.router.commit(request, cancel).await
    }

    /// Claim the next pending request from this pipeline's inbox (upstream
    /// side). Returns `None` when cancelled or after close.
    pub async fn claim_cross_pipeline_request(
        &self,
        cancel: &Cancellation,
    ) -> Option<DownstreamRequest> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        self.router.claim(&self.pipeline_name, cancel).await
    }

    /// How many requests are waiting in `upstream_pipeline_name`'s inbox.
    pub fn cross_pipeline_wip_requests_count(&self, upstream_pipeline_name: &str) -> usize {
        self.router.wip_count(upstream_pipeline_name)
    }

    /// Report that input arrived at a source plugin. Forwarded to every
    /// registered listener; a no-op without listeners.
    pub fn trigger_source_input(
        &self,
        getter_name: &str,
        getter: SourceInputQueueLengthGetter,
    ) {
        let listeners: Vec<SourceInputListener> =
            self.source_input_listeners.read().iter().cloned().collect();
        for listener in listeners {
            (*listener)(getter_name, &getter);
        }
    }

    /// Register a source-input listener.
    pub fn on_source_input(&self, listener: SourceInputListener) {
        self.source_input_listeners.write().push(listener);
    }

    /// Close the context: remove the cross-pipeline inbox (answering pending
    /// requests best-effort), clear buckets, and stop the statistics timer.
    /// Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.router.close_pipeline(&self.pipeline_name).await;
        self.buckets.write().clear();
        self.source_input_listeners.write().clear();
        self.statistics.close();

        tracing::info!(pipeline = %self.pipeline_name, "pipeline context closed");
    }

    /// Whether the context has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
