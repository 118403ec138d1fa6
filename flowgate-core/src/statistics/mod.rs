//! Per-pipeline statistics.
//!
//! One [`PipelineStatistics`] per pipeline records throughput and
//! execution-time distributions for the pipeline and for each plugin,
//! partitioned by [`StatisticsKind`]. A background timer ticks the rate
//! meters every [`TICK_INTERVAL`] and notifies registered callbacks when a
//! metric changed. Custom indicators let plugins publish their own gauges.
//!
//! Callback contract: callbacks are dispatched on spawned tasks so they can
//! never stall the tick loop, but they must not call back into statistics
//! mutating operations from the tick context.

pub mod meter;
pub mod sample;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;

use crate::cancel::Cancellation;
use crate::error::{FlowgateError, Result};
use crate::value::Value;

pub use meter::{RateMeter, TICK_INTERVAL};
pub use sample::{DEFAULT_SAMPLE_SIZE, ExecutionSample};

/// Which task outcomes a statistic covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatisticsKind {
    /// Tasks that finished with `Succeed`.
    Success,
    /// Tasks that finished with a failure code.
    Failure,
    /// All tasks regardless of outcome.
    All,
}

impl StatisticsKind {
    const COUNT: usize = 3;

    fn index(self) -> usize {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::All => 2,
        }
    }

    fn all_kinds() -> [Self; Self::COUNT] {
        [Self::Success, Self::Failure, Self::All]
    }
}

/// Evaluates a custom indicator. Receives (plugin name, indicator name).
pub type IndicatorEvaluator = Arc<dyn Fn(&str, &str) -> Result<Value> + Send + Sync>;

/// Callback fired when a pipeline-level metric changed. Receives the
/// pipeline name and the statistics.
pub type PipelineStatsCallback = Arc<dyn Fn(&str, &Arc<PipelineStatistics>) + Send + Sync>;

/// Callback fired when a plugin-level metric changed. Receives the plugin
/// name, the statistics, and the kind that changed.
pub type PluginStatsCallback =
    Arc<dyn Fn(&str, &Arc<PipelineStatistics>, StatisticsKind) + Send + Sync>;

struct KindStats {
    meter: RateMeter,
    sample: ExecutionSample,
}

impl KindStats {
    fn new() -> Self {
        Self {
            meter: RateMeter::new(),
            sample: ExecutionSample::new(),
        }
    }
}

struct PluginStats {
    kinds: [KindStats; StatisticsKind::COUNT],
}

impl PluginStats {
    fn new() -> Self {
        Self {
            kinds: [KindStats::new(), KindStats::new(), KindStats::new()],
        }
    }

    fn kind(&self, kind: StatisticsKind) -> &KindStats {
        &self.kinds[kind.index()]
    }
}

struct IndicatorEntry {
    instance_id: String,
    #[allow(dead_code)]
    description: String,
    evaluator: IndicatorEvaluator,
}

/// Statistics for one pipeline and its plugins.
///
/// Create with [`PipelineStatistics::new`], then call
/// [`PipelineStatistics::start_ticker`] from within a Tokio runtime to drive
/// the rate meters and callbacks. [`PipelineStatistics::close`] stops the
/// timer.
pub struct PipelineStatistics {
    pipeline_name: String,
    pipeline_stats: KindStats,
    task_counts: [AtomicU64; StatisticsKind::COUNT],
    plugins: HashMap<String, PluginStats>,
    indicators: DashMap<(String, String), IndicatorEntry>,
    pipeline_rate_callbacks: RwLock<HashMap<String, PipelineStatsCallback>>,
    pipeline_sample_callbacks: RwLock<HashMap<String, PipelineStatsCallback>>,
    plugin_rate_callbacks: RwLock<HashMap<String, PluginStatsCallback>>,
    plugin_sample_callbacks: RwLock<HashMap<String, PluginStatsCallback>>,
    ticker_cancel: Cancellation,
}

impl PipelineStatistics {
    /// Create statistics for a pipeline with the given plugin chain.
    pub fn new(pipeline_name: impl Into<String>, plugin_names: &[String]) -> Arc<Self> {
        let plugins = plugin_names
            .iter()
            .map(|name| (name.clone(), PluginStats::new()))
            .collect();

        Arc::new(Self {
            pipeline_name: pipeline_name.into(),
            pipeline_stats: KindStats::new(),
            task_counts: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
            plugins,
            indicators: DashMap::new(),
            pipeline_rate_callbacks: RwLock::new(HashMap::new()),
            pipeline_sample_callbacks: RwLock::new(HashMap::new()),
            plugin_rate_callbacks: RwLock::new(HashMap::new()),
            plugin_sample_callbacks: RwLock::new(HashMap::new()),
            ticker_cancel: Cancellation::new(),
        })
    }

    /// The pipeline these statistics belong to.
    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    // =========================================================================
    // Recording (called by the scheduler)
    // =========================================================================

    /// Record one completed task with its total chain duration.
    /// `kind` must be `Success` or `Failure`.
    pub fn record_pipeline_execution(&self, duration: Duration, kind: StatisticsKind) {
        self.pipeline_stats.meter.mark();
        self.pipeline_stats.sample.update(duration);
        self.task_counts[StatisticsKind::All.index()].fetch_add(1, Ordering::Relaxed);
        if kind != StatisticsKind::All {
            self.task_counts[kind.index()].fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record one plugin invocation with its duration.
    /// `kind` must be `Success` or `Failure`; `All` is derived.
    pub fn record_plugin_execution(&self, plugin: &str, duration: Duration, kind: StatisticsKind) {
        let Some(stats) = self.plugins.get(plugin) else {
            tracing::warn!(
                pipeline = %self.pipeline_name,
                plugin = %plugin,
                "execution recorded for unknown plugin"
            );
            return;
        };

        for k in [kind, StatisticsKind::All] {
            if k == StatisticsKind::All && kind == StatisticsKind::All {
                continue;
            }
            let slot = stats.kind(k);
            slot.meter.mark();
            slot.sample.update(duration);
        }
    }

    // =========================================================================
    // Pipeline queries
    // =========================================================================

    /// Tasks/second over the 1-minute window.
    pub fn pipeline_throughput_rate1(&self) -> Result<f64> {
        self.rate(self.pipeline_stats.meter.rate1())
    }

    /// Tasks/second over the 5-minute window.
    pub fn pipeline_throughput_rate5(&self) -> Result<f64> {
        self.rate(self.pipeline_stats.meter.rate5())
    }

    /// Tasks/second over the 15-minute window.
    pub fn pipeline_throughput_rate15(&self) -> Result<f64> {
        self.rate(self.pipeline_stats.meter.rate15())
    }

    /// Total tasks driven through the pipeline.
    pub fn pipeline_execution_count(&self) -> u64 {
        self.pipeline_stats.meter.count()
    }

    /// Smallest observed chain duration.
    pub fn pipeline_execution_time_min(&self) -> Result<Duration> {
        self.pipeline_stats.sample.min()
    }

    /// Largest observed chain duration.
    pub fn pipeline_execution_time_max(&self) -> Result<Duration> {
        self.pipeline_stats.sample.max()
    }

    /// Chain-duration percentile, `percentile` in `[0, 1]`.
    pub fn pipeline_execution_time_percentile(&self, percentile: f64) -> Result<Duration> {
        self.pipeline_stats.sample.percentile(percentile)
    }

    /// Chain-duration standard deviation in nanoseconds.
    pub fn pipeline_execution_time_stddev(&self) -> Result<f64> {
        self.pipeline_stats.sample.stddev()
    }

    /// Chain-duration variance in nanoseconds squared.
    pub fn pipeline_execution_time_variance(&self) -> Result<f64> {
        self.pipeline_stats.sample.variance()
    }

    /// Completed-task count for one kind.
    pub fn task_execution_count(&self, kind: StatisticsKind) -> u64 {
        self.task_counts[kind.index()].load(Ordering::Relaxed)
    }

    // =========================================================================
    // Plugin queries
    // =========================================================================

    /// Plugin invocations/second over the 1-minute window.
    pub fn plugin_throughput_rate1(&self, plugin: &str, kind: StatisticsKind) -> Result<f64> {
        self.rate(self.plugin(plugin)?.kind(kind).meter.rate1())
    }

    /// Plugin invocations/second over the 5-minute window.
    pub fn plugin_throughput_rate5(&self, plugin: &str, kind: StatisticsKind) -> Result<f64> {
        self.rate(self.plugin(plugin)?.kind(kind).meter.rate5())
    }

    /// Plugin invocations/second over the 15-minute window.
    pub fn plugin_throughput_rate15(&self, plugin: &str, kind: StatisticsKind) -> Result<f64> {
        self.rate(self.plugin(plugin)?.kind(kind).meter.rate15())
    }

    /// Total plugin invocations for one kind.
    pub fn plugin_execution_count(&self, plugin: &str, kind: StatisticsKind) -> Result<u64> {
        Ok(self.plugin(plugin)?.kind(kind).meter.count())
    }

    /// Smallest observed plugin duration for one kind.
    pub fn plugin_execution_time_min(&self, plugin: &str, kind: StatisticsKind) -> Result<Duration> {
        self.plugin(plugin)?.kind(kind).sample.min()
    }

    /// Largest observed plugin duration for one kind.
    pub fn plugin_execution_time_max(&self, plugin: &str, kind: StatisticsKind) -> Result<Duration> {
        self.plugin(plugin)?.kind(kind).sample.max()
    }

    /// Plugin-duration percentile, `percentile` in `[0, 1]`.
    pub fn plugin_execution_time_percentile(
        &self,
        plugin: &str,
        kind: StatisticsKind,
        percentile: f64,
    ) -> Result<Duration> {
        self.plugin(plugin)?.kind(kind).sample.percentile(percentile)
    }

    /// Plugin-duration standard deviation in nanoseconds.
    pub fn plugin_execution_time_stddev(&self, plugin: &str, kind: StatisticsKind) -> Result<f64> {
        self.plugin(plugin)?.kind(kind).sample.stddev()
    }

    /// Plugin-duration variance in nanoseconds squared.
    pub fn plugin_execution_time_variance(&self, plugin: &str, kind: StatisticsKind) -> Result<f64> {
        self.plugin(plugin)?.kind(kind).sample.variance()
    }

    // =========================================================================
    // Custom indicators
    // =========================================================================

    /// Register a custom indicator for a plugin instance.
    ///
    /// Returns `Ok(true)` when newly registered, `Ok(false)` when the same
    /// instance already owns the name, and [`FlowgateError::DuplicateIndicator`]
    /// when another instance owns it.
    pub fn register_plugin_indicator(
        &self,
        plugin: &str,
        instance_id: &str,
        indicator: &str,
        description: &str,
        evaluator: IndicatorEvaluator,
    ) -> Result<bool> {
        match self
            .indicators
            .entry((plugin.to_string(), indicator.to_string()))
        {
            Entry::Occupied(occupied) => {
                if occupied.get().instance_id == instance_id {
                    Ok(false)
                } else {
                    Err(FlowgateError::DuplicateIndicator {
                        plugin: plugin.to_string(),
                        indicator: indicator.to_string(),
                    })
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(IndicatorEntry {
                    instance_id: instance_id.to_string(),
                    description: description.to_string(),
                    evaluator,
                });
                Ok(true)
            }
        }
    }

    /// Unregister an indicator. Only the owning instance's entry is removed;
    /// unknown names are ignored.
    pub fn unregister_plugin_indicator(&self, plugin: &str, instance_id: &str, indicator: &str) {
        self.indicators
            .remove_if(&(plugin.to_string(), indicator.to_string()), |_, entry| {
                entry.instance_id == instance_id
            });
    }

    /// Names of the indicators registered for a plugin.
    pub fn plugin_indicator_names(&self, plugin: &str) -> Vec<String> {
        self.indicators
            .iter()
            .filter(|entry| entry.key().0 == plugin)
            .map(|entry| entry.key().1.clone())
            .collect()
    }

    /// Evaluate an indicator. Evaluator errors surface unchanged.
    pub fn plugin_indicator_value(&self, plugin: &str, indicator: &str) -> Result<Value> {
        let evaluator = {
            let entry = self
                .indicators
                .get(&(plugin.to_string(), indicator.to_string()))
                .ok_or_else(|| FlowgateError::NoStatisticsInfo {
                    scope: format!("indicator {}/{}", plugin, indicator),
                })?;
            Arc::clone(&entry.evaluator)
        };
        (*evaluator)(plugin, indicator)
    }

    // =========================================================================
    // Callbacks
    // =========================================================================

    /// Register a pipeline throughput-rate callback. Re-adding a name
    /// replaces the callback.
    pub fn add_pipeline_throughput_rate_updated_callback(
        &self,
        name: impl Into<String>,
        callback: PipelineStatsCallback,
    ) {
        self.pipeline_rate_callbacks
            .write()
            .insert(name.into(), callback);
    }

    /// Delete a pipeline throughput-rate callback. Idempotent.
    pub fn delete_pipeline_throughput_rate_updated_callback(&self, name: &str) {
        self.pipeline_rate_callbacks.write().remove(name);
    }

    /// Register a pipeline execution-sample callback.
    pub fn add_pipeline_execution_sample_updated_callback(
        &self,
        name: impl Into<String>,
        callback: PipelineStatsCallback,
    ) {
        self.pipeline_sample_callbacks
            .write()
            .insert(name.into(), callback);
    }

    /// Delete a pipeline execution-sample callback. Idempotent.
    pub fn delete_pipeline_execution_sample_updated_callback(&self, name: &str) {
        self.pipeline_sample_callbacks.write().remove(name);
    }

    /// Register a plugin throughput-rate callback.
    pub fn add_plugin_throughput_rate_updated_callback(
        &self,
        name: impl Into<String>,
        callback: PluginStatsCallback,
    ) {
        self.plugin_rate_callbacks
            .write()
            .insert(name.into(), callback);
    }

    /// Delete a plugin throughput-rate callback. Idempotent.
    pub fn delete_plugin_throughput_rate_updated_callback(&self, name: &str) {
        self.plugin_rate_callbacks.write().remove(name);
    }

    /// Register a plugin execution-sample callback.
    pub fn add_plugin_execution_sample_updated_callback(
        &self,
        name: impl Into<String>,
        callback: PluginStatsCallback,
    ) {
        self.plugin_sample_callbacks
            .write()
            .insert(name.into(), callback);
    }

    /// Delete a plugin execution-sample callback. Idempotent.
    pub fn delete_plugin_execution_sample_updated_callback(&self, name: &str) {
        self.plugin_sample_callbacks.write().remove(name);
    }

    // =========================================================================
    // Ticker
    // =========================================================================

    /// Spawn the background tick task. Must run within a Tokio runtime.
    pub fn start_ticker(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of a Tokio interval fires immediately.
            interval.tick().await;

            let mut seen = TickSeen::new(&self);
            loop {
                tokio::select! {
                    _ = interval.tick() => run_tick(&self, &mut seen),
                    _ = self.ticker_cancel.cancelled() => break,
                }
            }
            tracing::debug!(pipeline = %self.pipeline_name, "statistics ticker stopped");
        });
    }

    /// Stop the background tick task. Idempotent.
    pub fn close(&self) {
        self.ticker_cancel.cancel();
    }

    fn plugin(&self, name: &str) -> Result<&PluginStats> {
        self.plugins
            .get(name)
            .ok_or_else(|| FlowgateError::NoStatisticsInfo {
                scope: format!("plugin {}", name),
            })
    }

    fn rate(&self, rate: Option<f64>) -> Result<f64> {
        rate.ok_or_else(|| FlowgateError::NoStatisticsInfo {
            scope: format!("pipeline {} throughput", self.pipeline_name),
        })
    }
}

struct PluginSeen {
    marks: [u64; StatisticsKind::COUNT],
    samples: [u64; StatisticsKind::COUNT],
}

struct TickSeen {
    pipeline_marks: u64,
    pipeline_samples: u64,
    plugins: HashMap<String, PluginSeen>,
}

/// One tick: fold rate deltas, then notify callbacks whose metric changed.
fn run_tick(stats: &Arc<PipelineStatistics>, seen: &mut TickSeen) {
    stats.pipeline_stats.meter.tick();
    for plugin_stats in stats.plugins.values() {
        for kind in StatisticsKind::all_kinds() {
            plugin_stats.kind(kind).meter.tick();
        }
    }

    let marks = stats.pipeline_stats.meter.count();
    if marks != seen.pipeline_marks {
        seen.pipeline_marks = marks;
        fire_pipeline_callbacks(stats, &stats.pipeline_rate_callbacks);
    }
    let samples = stats.pipeline_stats.sample.count();
    if samples != seen.pipeline_samples {
        seen.pipeline_samples = samples;
        fire_pipeline_callbacks(stats, &stats.pipeline_sample_callbacks);
    }

    for (name, plugin_stats) in &stats.plugins {
        let counters = seen
            .plugins
            .get_mut(name)
            .expect("plugin set is fixed at construction");
        for kind in StatisticsKind::all_kinds() {
            let slot = plugin_stats.kind(kind);
            let marks = slot.meter.count();
            if marks != counters.marks[kind.index()] {
                counters.marks[kind.index()] = marks;
                fire_plugin_callbacks(stats, &stats.plugin_rate_callbacks, name, kind);
            }
            let samples = slot.sample.count();
            if samples != counters.samples[kind.index()] {
                counters.samples[kind.index()] = samples;
                fire_plugin_callbacks(stats, &stats.plugin_sample_callbacks, name, kind);
            }
        }
    }
}

fn fire_pipeline_callbacks(
    stats: &Arc<PipelineStatistics>,
    table: &RwLock<HashMap<String, PipelineStatsCallback>>,
) {
    let callbacks: Vec<PipelineStatsCallback> = table.read().values().cloned().collect();
    for callback in callbacks {
        let stats = Arc::clone(stats);
        tokio::spawn(async move {
            let name = stats.pipeline_name.clone();
            (*callback)(&name, &stats);
        });
    }
}

fn fire_plugin_callbacks(
    stats: &Arc<PipelineStatistics>,
    table: &RwLock<HashMap<String, PluginStatsCallback>>,
    plugin: &str,
    kind: StatisticsKind,
) {
    let callbacks: Vec<PluginStatsCallback> = table.read().values().cloned().collect();
    for callback in callbacks {
        let stats = Arc::clone(stats);
        let plugin = plugin.to_string();
        tokio::spawn(async move {
            (*callback)(&plugin, &stats, kind);
        });
    }
}

impl TickSeen {
    fn new(stats: &PipelineStatistics) -> Self {
        Self {
            pipeline_marks: 0,
            pipeline_samples: 0,
            plugins: stats
                .plugins
                .keys()
                .map(|name| {
                    (
                        name.clone(),
                        PluginSeen {
                            marks: [0; StatisticsKind::COUNT],
                            samples: [0; StatisticsKind::COUNT],
                        },
                    )
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn stats() -> Arc<PipelineStatistics> {
        PipelineStatistics::new("edge", &["src".to_string(), "sink".to_string()])
    }

    #[test]
    fn success_plus_failure_equals_all() {
        let stats = stats();
        stats.record_plugin_execution("src", Duration::from_millis(1), StatisticsKind::Success);
        stats.record_plugin_execution("src", Duration::from_millis(2), StatisticsKind::Success);
        stats.record_plugin_execution("src", Duration::from_millis(3), StatisticsKind::Failure);

        let success = stats
            .plugin_execution_count("src", StatisticsKind::Success)
            .unwrap();
        let failure = stats
            .plugin_execution_count("src", StatisticsKind::Failure)
            .unwrap();
        let all = stats
            .plugin_execution_count("src", StatisticsKind::All)
            .unwrap();
        assert_eq!(success + failure, all);
        assert_eq!(all, 3);
    }

    #[test]
    fn task_counts_partition_by_kind() {
        let stats = stats();
        stats.record_pipeline_execution(Duration::from_millis(5), StatisticsKind::Success);
        stats.record_pipeline_execution(Duration::from_millis(5), StatisticsKind::Failure);

        assert_eq!(stats.task_execution_count(StatisticsKind::Success), 1);
        assert_eq!(stats.task_execution_count(StatisticsKind::Failure), 1);
        assert_eq!(stats.task_execution_count(StatisticsKind::All), 2);
        assert_eq!(stats.pipeline_execution_count(), 2);
    }

    #[test]
    fn unticked_rates_report_no_statistics() {
        let stats = stats();
        assert_eq!(stats.pipeline_throughput_rate1().unwrap_err().code(), "E301");
    }

    #[test]
    fn unknown_plugin_reports_no_statistics() {
        let stats = stats();
        let err = stats
            .plugin_execution_count("ghost", StatisticsKind::All)
            .unwrap_err();
        assert_eq!(err.code(), "E301");
    }

    #[test]
    fn indicator_registration_rules() {
        let stats = stats();
        let evaluator: IndicatorEvaluator = Arc::new(|_, _| Ok(Value::from(1i64)));

        assert!(
            stats
                .register_plugin_indicator("src", "inst-1", "depth", "queue depth", evaluator.clone())
                .unwrap()
        );
        // Same owner: already registered, not an error.
        assert!(
            !stats
                .register_plugin_indicator("src", "inst-1", "depth", "queue depth", evaluator.clone())
                .unwrap()
        );
        // Different owner: rejected.
        let err = stats
            .register_plugin_indicator("src", "inst-2", "depth", "queue depth", evaluator.clone())
            .unwrap_err();
        assert_eq!(err.code(), "E302");

        assert_eq!(stats.plugin_indicator_names("src"), vec!["depth".to_string()]);
        assert_eq!(
            stats
                .plugin_indicator_value("src", "depth")
                .unwrap()
                .as_int(),
            Some(1)
        );

        // Only the owner can unregister.
        stats.unregister_plugin_indicator("src", "inst-2", "depth");
        assert_eq!(stats.plugin_indicator_names("src").len(), 1);
        stats.unregister_plugin_indicator("src", "inst-1", "depth");
        assert!(stats.plugin_indicator_names("src").is_empty());
    }

    #[test]
    fn indicator_evaluator_errors_surface_unchanged() {
        let stats = stats();
        let evaluator: IndicatorEvaluator = Arc::new(|plugin, _| {
            Err(FlowgateError::NoStatisticsInfo {
                scope: format!("not warm: {}", plugin),
            })
        });
        stats
            .register_plugin_indicator("src", "inst-1", "lag", "", evaluator)
            .unwrap();

        let err = stats.plugin_indicator_value("src", "lag").unwrap_err();
        assert!(err.to_string().contains("not warm: src"));
    }

    #[tokio::test]
    async fn tick_fires_changed_callbacks_only() {
        let stats = stats();
        let rate_fired = Arc::new(AtomicUsize::new(0));
        let sample_fired = Arc::new(AtomicUsize::new(0));

        let fired = rate_fired.clone();
        stats.add_pipeline_throughput_rate_updated_callback(
            "test",
            Arc::new(move |_, _| {
                fired.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let fired = sample_fired.clone();
        stats.add_plugin_execution_sample_updated_callback(
            "test",
            Arc::new(move |_, _, _| {
                fired.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let mut seen = TickSeen::new(&stats);
        // Nothing recorded: no callbacks.
        run_tick(&stats, &mut seen);
        tokio::task::yield_now().await;
        assert_eq!(rate_fired.load(Ordering::SeqCst), 0);
        assert_eq!(sample_fired.load(Ordering::SeqCst), 0);

        stats.record_pipeline_execution(Duration::from_millis(1), StatisticsKind::Success);
        stats.record_plugin_execution("sink", Duration::from_millis(1), StatisticsKind::Success);
        run_tick(&stats, &mut seen);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(rate_fired.load(Ordering::SeqCst), 1);
        // Success + All both changed for the plugin sample.
        assert_eq!(sample_fired.load(Ordering::SeqCst), 2);

        // Deleting is idempotent.
        stats.delete_pipeline_throughput_rate_updated_callback("test");
        stats.delete_pipeline_throughput_rate_updated_callback("test");
    }
}
