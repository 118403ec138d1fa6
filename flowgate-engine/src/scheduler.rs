//! Linear pipeline scheduler.
//!
//! Drives tasks through an ordered plugin chain with a pool of parallel
//! workers. Each worker owns one task at a time: it synthesizes the task,
//! runs the chain (the first plugin ingests input, possibly from the
//! cross-pipeline inbox), records per-plugin and per-pipeline statistics,
//! runs recovery on failure, and fires the task's finish-callbacks.
//!
//! Lifecycle: Created → Prepared → Running → Stopping → Stopped. A stopped
//! pipeline never runs again; build a new one from the same config.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use flowgate_core::cancel::Cancellation;
use flowgate_core::channel::CrossPipelineRouter;
use flowgate_core::config::PipelineConfig;
use flowgate_core::context::PipelineContext;
use flowgate_core::error::{FlowgateError, Result};
use flowgate_core::statistics::{PipelineStatistics, StatisticsKind};
use flowgate_core::task::{ResultCode, Task};
use flowgate_core::traits::{Pipeline, PipelineFuture, PipelineState, Plugin};

use crate::registry::PluginRegistry;

/// Upper bound on dynamic worker growth, as a multiple of the base count.
const DYNAMIC_WORKER_CAP_FACTOR: usize = 10;

/// How often the scheduled-stop drain loop re-checks in-flight tasks.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long the dynamic-parallelism evaluator pauses between evaluations.
const REEVALUATION_INTERVAL: Duration = Duration::from_secs(1);

struct InflightTask {
    cancel: Cancellation,
    /// Set once the first plugin has ingested input. Tasks that never got
    /// past intake are cancelled even by a scheduled stop.
    past_source: Arc<AtomicBool>,
}

struct Inner {
    config: PipelineConfig,
    registry: Arc<PluginRegistry>,
    context: Arc<PipelineContext>,
    statistics: Arc<PipelineStatistics>,
    state: Mutex<PipelineState>,
    shared_instances: Mutex<HashMap<String, Arc<dyn Plugin>>>,
    /// Every created instance, for cleanup at stop.
    instances: Mutex<Vec<Arc<dyn Plugin>>>,
    /// Chains built during prepare, consumed by run.
    prepared_chains: Mutex<Vec<Vec<Arc<dyn Plugin>>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    /// Tells workers to stop pulling new tasks.
    stop: Cancellation,
    inflight: DashMap<u64, InflightTask>,
    active_workers: AtomicUsize,
    target_workers: AtomicUsize,
    next_worker_id: AtomicU64,
    max_seen_queue_len: AtomicU32,
    reeval_notify: Notify,
    base_parallelism: usize,
}

/// A linear pipeline: an ordered plugin chain executed by parallel workers.
pub struct LinearPipeline {
    inner: Arc<Inner>,
}

impl LinearPipeline {
    /// Build a pipeline from a config. Validates the config, allocates the
    /// context, and registers the cross-pipeline inbox. Must be called
    /// within a Tokio runtime.
    pub fn new(
        mut config: PipelineConfig,
        registry: Arc<PluginRegistry>,
        router: Arc<CrossPipelineRouter>,
    ) -> Result<Self> {
        config.prepare()?;

        let context = PipelineContext::new(&config, router);
        let statistics = context.statistics();

        let base_parallelism = match config.parallelism() {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n as usize,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                registry,
                context,
                statistics,
                state: Mutex::new(PipelineState::Created),
                shared_instances: Mutex::new(HashMap::new()),
                instances: Mutex::new(Vec::new()),
                prepared_chains: Mutex::new(Vec::new()),
                handles: Mutex::new(Vec::new()),
                stop: Cancellation::new(),
                inflight: DashMap::new(),
                active_workers: AtomicUsize::new(0),
                target_workers: AtomicUsize::new(base_parallelism),
                next_worker_id: AtomicU64::new(0),
                max_seen_queue_len: AtomicU32::new(0),
                reeval_notify: Notify::new(),
                base_parallelism,
            }),
        })
    }

    /// The pipeline name.
    pub fn name(&self) -> &str {
        self.inner.config.pipeline_name()
    }

    /// The current lifecycle state.
    pub fn state(&self) -> PipelineState {
        *self.inner.state.lock()
    }

    /// The pipeline's context.
    pub fn context(&self) -> Arc<PipelineContext> {
        Arc::clone(&self.inner.context)
    }

    /// The pipeline's statistics.
    pub fn statistics(&self) -> Arc<PipelineStatistics> {
        Arc::clone(&self.inner.statistics)
    }

    /// Number of live workers.
    pub fn active_workers(&self) -> usize {
        self.inner.active_workers.load(Ordering::Acquire)
    }

    /// Instantiate and prepare the plugin chains, in chain order. A plugin
    /// failing prepare aborts with [`FlowgateError::PluginPrepareFailed`].
    pub async fn prepare(&self) -> Result<()> {
        self.inner.ensure_state(PipelineState::Created, "Prepared")?;

        let workers = self.inner.base_parallelism;
        let mut chains = Vec::with_capacity(workers);
        for _ in 0..workers {
            chains.push(self.inner.build_chain().await?);
        }
        *self.inner.prepared_chains.lock() = chains;

        self.inner.set_state(PipelineState::Prepared);
        tracing::info!(
            pipeline = %self.name(),
            plugins = ?self.inner.config.plugin_names(),
            workers,
            "pipeline prepared"
        );
        Ok(())
    }

    /// Spawn the worker pool. In dynamic mode (`parallelism == 0`) also
    /// registers the source-input listener and the pool re-evaluator.
    pub async fn run(&self) -> Result<()> {
        self.inner.ensure_state(PipelineState::Prepared, "Running")?;

        let chains = std::mem::take(&mut *self.inner.prepared_chains.lock());
        for chain in chains {
            Inner::spawn_worker(&self.inner, chain);
        }

        if self.inner.config.parallelism() == 0 {
            let weak = Arc::downgrade(&self.inner);
            self.inner.context.on_source_input(Arc::new(move |_, getter| {
                if let Some(inner) = weak.upgrade() {
                    inner
                        .max_seen_queue_len
                        .fetch_max((**getter)(), Ordering::AcqRel);
                    inner.reeval_notify.notify_one();
                }
            }));

            let inner = Arc::clone(&self.inner);
            let handle = tokio::spawn(parallelism_loop(inner));
            self.inner.handles.lock().push(handle);
        }

        self.inner.set_state(PipelineState::Running);
        tracing::info!(
            pipeline = %self.name(),
            workers = self.active_workers(),
            dynamic = self.inner.config.parallelism() == 0,
            "pipeline running"
        );
        Ok(())
    }

    /// Stop the pipeline.
    ///
    /// `scheduled = false` cancels in-flight tasks immediately.
    /// `scheduled = true` stops task intake, waits up to the configured
    /// drain timeout for in-flight tasks to finish, then cancels stragglers.
    /// Either way, workers are joined and plugin instances cleaned up before
    /// this returns.
    pub async fn stop(&self, scheduled: bool) -> Result<()> {
        self.inner.ensure_state(PipelineState::Running, "Stopping")?;
        self.inner.set_state(PipelineState::Stopping);
        tracing::info!(pipeline = %self.name(), scheduled, "stopping pipeline");

        self.inner.stop.cancel();

        if scheduled {
            let deadline = Instant::now() + self.inner.config.drain_timeout();
            loop {
                // Workers still waiting at intake carry no real work; cancel
                // them so only genuinely in-flight tasks hold the drain.
                for entry in self.inner.inflight.iter() {
                    if !entry.value().past_source.load(Ordering::Acquire) {
                        entry.value().cancel.cancel();
                    }
                }
                if self.inner.inflight.is_empty() {
                    break;
                }
                if Instant::now() >= deadline {
                    tracing::warn!(
                        pipeline = %self.name(),
                        outstanding = self.inner.inflight.len(),
                        "drain deadline reached, cancelling remaining tasks"
                    );
                    break;
                }
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        }

        for entry in self.inner.inflight.iter() {
            entry.value().cancel.cancel();
        }

        // Drain until empty: the parallelism evaluator may push one last
        // handle concurrently with the take.
        loop {
            let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.handles.lock());
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                let _ = handle.await;
            }
        }

        self.inner.cleanup_instances().await;
        self.inner.set_state(PipelineState::Stopped);
        tracing::info!(pipeline = %self.name(), "pipeline stopped");
        Ok(())
    }

    /// Close the pipeline's context: drain the cross-pipeline inbox, drop
    /// buckets, stop the statistics timer. Idempotent; rejected while the
    /// pipeline is running.
    pub async fn close(&self) -> Result<()> {
        {
            let state = self.inner.state.lock();
            if matches!(*state, PipelineState::Running | PipelineState::Stopping) {
                return Err(FlowgateError::IllegalState {
                    from: state.to_string(),
                    to: "Stopped".to_string(),
                });
            }
        }

        // Covers the prepared-but-never-run path.
        self.inner.cleanup_instances().await;
        self.inner.context.close().await;
        self.inner.set_state(PipelineState::Stopped);
        Ok(())
    }
}

impl Pipeline for LinearPipeline {
    fn name(&self) -> &str {
        LinearPipeline::name(self)
    }

    fn state(&self) -> PipelineState {
        LinearPipeline::state(self)
    }

    fn prepare<'a>(&'a self) -> PipelineFuture<'a, ()> {
        Box::pin(LinearPipeline::prepare(self))
    }

    fn run<'a>(&'a self) -> PipelineFuture<'a, ()> {
        Box::pin(LinearPipeline::run(self))
    }

    fn stop<'a>(&'a self, scheduled: bool) -> PipelineFuture<'a, ()> {
        Box::pin(LinearPipeline::stop(self, scheduled))
    }

    fn close<'a>(&'a self) -> PipelineFuture<'a, ()> {
        Box::pin(LinearPipeline::close(self))
    }
}

impl Inner {
    fn ensure_state(&self, expected: PipelineState, attempted: &str) -> Result<()> {
        let state = self.state.lock();
        if *state != expected {
            return Err(FlowgateError::IllegalState {
                from: state.to_string(),
                to: attempted.to_string(),
            });
        }
        Ok(())
    }

    fn set_state(&self, to: PipelineState) {
        *self.state.lock() = to;
    }

    /// Instantiate one chain, preparing every new instance in chain order.
    /// Shareable plugins reuse the already-prepared shared instance.
    async fn build_chain(&self) -> Result<Vec<Arc<dyn Plugin>>> {
        let mut chain: Vec<Arc<dyn Plugin>> = Vec::with_capacity(self.config.plugin_names().len());

        for name in self.config.plugin_names() {
            if self.registry.shareable(name)? {
                let existing = self.shared_instances.lock().get(name).cloned();
                if let Some(plugin) = existing {
                    chain.push(plugin);
                    continue;
                }
            }

            let plugin = self.registry.instantiate(name)?;
            plugin
                .prepare(&self.context)
                .await
                .map_err(|e| FlowgateError::PluginPrepareFailed {
                    plugin: name.clone(),
                    cause: e.to_string(),
                })?;

            self.instances.lock().push(Arc::clone(&plugin));
            if self.registry.shareable(name)? {
                self.shared_instances
                    .lock()
                    .insert(name.clone(), Arc::clone(&plugin));
            }
            chain.push(plugin);
        }

        Ok(chain)
    }

    fn spawn_worker(inner: &Arc<Inner>, chain: Vec<Arc<dyn Plugin>>) {
        let worker_id = inner.next_worker_id.fetch_add(1, Ordering::Relaxed);
        inner.active_workers.fetch_add(1, Ordering::AcqRel);
        let task_inner = Arc::clone(inner);
        let handle = tokio::spawn(worker_loop(task_inner, worker_id, chain));
        inner.handles.lock().push(handle);
    }

    /// Let one worker above the target retire. Lock-free: the winner of the
    /// decrement race exits.
    fn try_retire(&self) -> bool {
        loop {
            let active = self.active_workers.load(Ordering::Acquire);
            let target = self.target_workers.load(Ordering::Acquire);
            if active <= target {
                return false;
            }
            if self
                .active_workers
                .compare_exchange(active, active - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    async fn cleanup_instances(&self) {
        let instances: Vec<Arc<dyn Plugin>> = std::mem::take(&mut *self.instances.lock());
        for plugin in instances {
            if let Err(error) = plugin.cleanup(&self.context).await {
                tracing::warn!(
                    pipeline = %self.config.pipeline_name(),
                    plugin = %plugin.name(),
                    error = %error,
                    "plugin cleanup failed"
                );
            }
        }
        self.shared_instances.lock().clear();
    }
}

async fn worker_loop(inner: Arc<Inner>, worker_id: u64, chain: Vec<Arc<dyn Plugin>>) {
    let pipeline = inner.config.pipeline_name().to_string();
    tracing::debug!(pipeline = %pipeline, worker = worker_id, "worker started");

    loop {
        // Keeps a chain of instantly-completing plugins cooperative.
        tokio::task::yield_now().await;

        if inner.stop.is_cancelled() {
            break;
        }
        if inner.try_retire() {
            tracing::debug!(pipeline = %pipeline, worker = worker_id, "worker retired");
            return;
        }

        let mut task = Task::new();
        let past_source = Arc::new(AtomicBool::new(false));
        inner.inflight.insert(
            worker_id,
            InflightTask {
                cancel: task.cancellation(),
                past_source: Arc::clone(&past_source),
            },
        );
        // A stop between the loop-top check and the insert above would miss
        // this task in its cancel sweep; the re-check closes that window.
        if inner.stop.is_cancelled() {
            task.cancel();
        }

        execute_task(&inner, &mut task, &chain, &past_source).await;

        inner.inflight.remove(&worker_id);
    }

    inner.active_workers.fetch_sub(1, Ordering::AcqRel);
    tracing::debug!(pipeline = %pipeline, worker = worker_id, "worker exiting");
}

/// Run one task through the chain, recording statistics and firing the
/// task's callbacks.
async fn execute_task(
    inner: &Inner,
    task: &mut Task,
    chain: &[Arc<dyn Plugin>],
    past_source: &AtomicBool,
) {
    let pipeline = inner.config.pipeline_name();
    let started = Instant::now();
    let mut aborted_at_intake = false;

    for (idx, plugin) in chain.iter().enumerate() {
        let plugin_started = Instant::now();
        let outcome = AssertUnwindSafe(plugin.run(task, &inner.context))
            .catch_unwind()
            .await;
        let elapsed = plugin_started.elapsed();

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(error)) => apply_plugin_error(task, plugin.name(), error),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(
                    pipeline = %pipeline,
                    plugin = %plugin.name(),
                    panic = %message,
                    "plugin panicked"
                );
                task.set_error(
                    ResultCode::InternalError,
                    format!("plugin '{}' panicked: {}", plugin.name(), message),
                );
            }
        }

        if idx == 0 {
            if task.result_code() == ResultCode::TaskCancelled {
                // The source observed stop/cancel before ingesting any
                // work; nothing real flowed, so nothing is recorded.
                aborted_at_intake = true;
                break;
            }
            past_source.store(true, Ordering::Release);
        }

        let kind = if task.result_code().is_succeed() {
            StatisticsKind::Success
        } else {
            StatisticsKind::Failure
        };
        inner
            .statistics
            .record_plugin_execution(plugin.name(), elapsed, kind);

        if task.result_code().is_failure() {
            tracing::warn!(
                pipeline = %pipeline,
                plugin = %plugin.name(),
                code = %task.result_code(),
                error = task.error().unwrap_or(""),
                "plugin failed task"
            );
            if !task.run_recovery_callbacks(plugin.name()) {
                break;
            }
        }
    }

    if aborted_at_intake {
        task.run_finish_callbacks(true);
        return;
    }

    let kind = if task.result_code().is_succeed() {
        StatisticsKind::Success
    } else {
        StatisticsKind::Failure
    };
    inner
        .statistics
        .record_pipeline_execution(started.elapsed(), kind);

    let cancelled = task.is_cancelled();
    task.run_finish_callbacks(cancelled);
}

/// Map a plugin's returned error onto the task's result code.
fn apply_plugin_error(task: &mut Task, plugin: &str, error: FlowgateError) {
    match error {
        FlowgateError::TaskPluginFailed { code, cause, .. } => task.set_error(code, cause),
        e if e.is_cancelled() => task.set_error(ResultCode::TaskCancelled, e.to_string()),
        e => task.set_error(
            ResultCode::InternalError,
            format!("plugin '{}': {}", plugin, e),
        ),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Grow (and let shrink) the worker pool from observed source-input queue
/// depth. Evaluates on trigger, at most once per second.
async fn parallelism_loop(inner: Arc<Inner>) {
    let cap = inner.base_parallelism * DYNAMIC_WORKER_CAP_FACTOR;

    loop {
        tokio::select! {
            _ = inner.reeval_notify.notified() => {}
            _ = inner.stop.cancelled() => break,
        }

        let observed = inner.max_seen_queue_len.swap(0, Ordering::AcqRel) as usize;
        let desired = observed.clamp(inner.base_parallelism, cap);
        inner.target_workers.store(desired, Ordering::Release);

        let active = inner.active_workers.load(Ordering::Acquire);
        if desired > active {
            for _ in active..desired {
                // A trigger can win the select above against a concurrent
                // stop; never grow the pool once stop has fired.
                if inner.stop.is_cancelled() {
                    break;
                }
                match inner.build_chain().await {
                    Ok(chain) => Inner::spawn_worker(&inner, chain),
                    Err(error) => {
                        tracing::error!(
                            pipeline = %inner.config.pipeline_name(),
                            error = %error,
                            "failed to grow worker pool"
                        );
                        break;
                    }
                }
            }
            tracing::debug!(
                pipeline = %inner.config.pipeline_name(),
                observed_queue = observed,
                from = active,
                to = desired,
                "grew worker pool"
            );
        } else if desired < active {
            tracing::debug!(
                pipeline = %inner.config.pipeline_name(),
                observed_queue = observed,
                from = active,
                to = desired,
                "shrinking worker pool"
            );
        }

        tokio::select! {
            _ = tokio::time::sleep(REEVALUATION_INTERVAL) => {}
            _ = inner.stop.cancelled() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_core::traits::{PluginFactory, PluginFuture};

    struct SinkPlugin;

    impl Plugin for SinkPlugin {
        fn name(&self) -> &str {
            "sink"
        }

        fn run<'a>(
            &'a self,
            _task: &'a mut Task,
            _ctx: &'a PipelineContext,
        ) -> PluginFuture<'a, ()> {
            Box::pin(async { Ok(()) })
        }
    }

    struct SinkFactory;

    impl PluginFactory for SinkFactory {
        fn plugin_name(&self) -> &str {
            "sink"
        }

        fn create(&self, _config: &serde_json::Value) -> Result<Arc<dyn Plugin>> {
            Ok(Arc::new(SinkPlugin))
        }
    }

    fn pipeline(config: PipelineConfig) -> Result<LinearPipeline> {
        let registry = Arc::new(PluginRegistry::new());
        registry.register(Arc::new(SinkFactory), serde_json::json!({}));
        LinearPipeline::new(config, registry, Arc::new(CrossPipelineRouter::new()))
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let err = match pipeline(PipelineConfig::new("edge")) {
            Err(e) => e,
            Ok(_) => panic!("expected pipeline construction to fail for invalid config"),
        };
        assert_eq!(err.code(), "E001");
    }

    #[tokio::test]
    async fn rejects_unknown_plugin_at_prepare() {
        let p = pipeline(
            PipelineConfig::new("edge")
                .with_plugins(["ghost"])
                .with_parallelism(1),
        )
        .unwrap();
        let err = p.prepare().await.unwrap_err();
        assert_eq!(err.code(), "E101");
    }

    #[tokio::test]
    async fn lifecycle_transitions_are_enforced() {
        let p = pipeline(
            PipelineConfig::new("edge")
                .with_plugins(["sink"])
                .with_parallelism(1),
        )
        .unwrap();
        assert_eq!(p.state(), PipelineState::Created);

        // Run before prepare is illegal.
        assert_eq!(p.run().await.unwrap_err().code(), "E401");

        p.prepare().await.unwrap();
        assert_eq!(p.state(), PipelineState::Prepared);
        // Prepare twice is illegal.
        assert_eq!(p.prepare().await.unwrap_err().code(), "E401");

        p.run().await.unwrap();
        assert_eq!(p.state(), PipelineState::Running);
        // Close while running is illegal.
        assert_eq!(p.close().await.unwrap_err().code(), "E401");

        p.stop(false).await.unwrap();
        assert_eq!(p.state(), PipelineState::Stopped);
        // Stop -> Run is not supported.
        assert_eq!(p.run().await.unwrap_err().code(), "E401");

        p.close().await.unwrap();
        p.close().await.unwrap();
    }

    #[tokio::test]
    async fn fixed_parallelism_spawns_exactly_n_workers() {
        let p = pipeline(
            PipelineConfig::new("edge")
                .with_plugins(["sink"])
                .with_parallelism(3),
        )
        .unwrap();
        p.prepare().await.unwrap();
        p.run().await.unwrap();
        assert_eq!(p.active_workers(), 3);
        p.stop(false).await.unwrap();
        assert_eq!(p.active_workers(), 0);
        p.close().await.unwrap();
    }

    #[tokio::test]
    async fn dynamic_parallelism_spawns_at_least_one_worker() {
        let p = pipeline(PipelineConfig::new("edge").with_plugins(["sink"])).unwrap();
        p.prepare().await.unwrap();
        p.run().await.unwrap();
        assert!(p.active_workers() >= 1);
        p.stop(false).await.unwrap();
        p.close().await.unwrap();
    }
}
