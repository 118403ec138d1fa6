//! Shared test plugins and helpers for the engine integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use flowgate_core::prelude::*;
use flowgate_engine::registry::PluginRegistry;

/// Payloads observed by a [`RecordSink`].
pub type SeenPayloads = Arc<Mutex<Vec<HashMap<String, Value>>>>;

pub fn new_seen() -> SeenPayloads {
    Arc::new(Mutex::new(Vec::new()))
}

/// Install a tracing subscriber for test debugging; harmless if repeated.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Poll `cond` until it holds or `deadline` elapses.
pub async fn wait_until(deadline: Duration, cond: impl Fn() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Source that emits `budget` tasks per instance with a fixed payload, then
/// blocks on the task's cancellation signal like an idle network source.
pub struct BudgetSource {
    name: String,
    budget: AtomicU32,
    payload: Vec<(String, i64)>,
}

impl BudgetSource {
    pub fn new(name: &str, budget: u32, payload: &[(&str, i64)]) -> Self {
        Self {
            name: name.to_string(),
            budget: AtomicU32::new(budget),
            payload: payload
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
        }
    }
}

impl Plugin for BudgetSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self, task: &'a mut Task, _ctx: &'a PipelineContext) -> PluginFuture<'a, ()> {
        Box::pin(async move {
            let granted = self
                .budget
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if granted {
                for (key, value) in &self.payload {
                    task.set(key.clone(), Value::from(*value));
                }
                Ok(())
            } else {
                task.cancellation().cancelled().await;
                Err(FlowgateError::cancelled("source input"))
            }
        })
    }
}

/// Middleware that sets `to = from + 1`.
pub struct AddOne {
    name: String,
    from: String,
    to: String,
}

impl AddOne {
    pub fn new(name: &str, from: &str, to: &str) -> Self {
        Self {
            name: name.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

impl Plugin for AddOne {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self, task: &'a mut Task, _ctx: &'a PipelineContext) -> PluginFuture<'a, ()> {
        Box::pin(async move {
            let Some(input) = task.get(&self.from).and_then(Value::as_int) else {
                return Err(FlowgateError::TaskPluginFailed {
                    plugin: self.name.clone(),
                    code: ResultCode::MissingInput,
                    cause: format!("payload key '{}' absent", self.from),
                });
            };
            task.set(self.to.clone(), Value::from(input + 1));
            Ok(())
        })
    }
}

/// Sink that records every payload it sees.
pub struct RecordSink {
    name: String,
    seen: SeenPayloads,
}

impl RecordSink {
    pub fn new(name: &str, seen: SeenPayloads) -> Self {
        Self {
            name: name.to_string(),
            seen,
        }
    }
}

impl Plugin for RecordSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self, task: &'a mut Task, _ctx: &'a PipelineContext) -> PluginFuture<'a, ()> {
        Box::pin(async move {
            self.seen.lock().push(task.payload().clone());
            Ok(())
        })
    }
}

/// Middleware that fails every task with a fixed result code.
pub struct FailWith {
    name: String,
    code: ResultCode,
}

impl FailWith {
    pub fn new(name: &str, code: ResultCode) -> Self {
        Self {
            name: name.to_string(),
            code,
        }
    }
}

impl Plugin for FailWith {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self, task: &'a mut Task, _ctx: &'a PipelineContext) -> PluginFuture<'a, ()> {
        Box::pin(async move {
            task.set_error(self.code, "injected failure");
            Ok(())
        })
    }
}

/// Middleware that arms each task with a recovery callback resetting it to
/// success.
pub struct RecoverArm {
    name: String,
}

impl RecoverArm {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Plugin for RecoverArm {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self, task: &'a mut Task, _ctx: &'a PipelineContext) -> PluginFuture<'a, ()> {
        Box::pin(async move {
            task.add_recovery_callback(
                "recover-arm",
                Box::new(|task, _failed_plugin| task.recover()),
            );
            Ok(())
        })
    }
}

/// Middleware that holds each task for a fixed delay, ignoring cancellation,
/// like a committed downstream call.
pub struct SlowRelay {
    name: String,
    delay: Duration,
}

impl SlowRelay {
    pub fn new(name: &str, delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            delay,
        }
    }
}

impl Plugin for SlowRelay {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self, _task: &'a mut Task, _ctx: &'a PipelineContext) -> PluginFuture<'a, ()> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Ok(())
        })
    }
}

/// Payload key under which [`ClaimSource`] stashes the claimed request for
/// [`RespondSink`].
pub const REQUEST_KEY: &str = "__request";

/// Source for upstream pipelines: claims the next cross-pipeline request
/// from the context's inbox and materializes it as the task payload.
pub struct ClaimSource {
    name: String,
}

impl ClaimSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Plugin for ClaimSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self, task: &'a mut Task, ctx: &'a PipelineContext) -> PluginFuture<'a, ()> {
        Box::pin(async move {
            let cancel = task.cancellation();
            match ctx.claim_cross_pipeline_request(&cancel).await {
                Some(mut request) => {
                    task.set_payload(request.take_data());
                    task.set(REQUEST_KEY, Value::Custom(Arc::new(request)));
                    Ok(())
                }
                None => Err(FlowgateError::cancelled("cross-pipeline claim")),
            }
        })
    }
}

/// Sink for upstream pipelines: answers the claimed request with the task's
/// payload plus `ok: true`.
pub struct RespondSink {
    name: String,
}

impl RespondSink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Plugin for RespondSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self, task: &'a mut Task, ctx: &'a PipelineContext) -> PluginFuture<'a, ()> {
        Box::pin(async move {
            let request: Arc<DownstreamRequest> = match task.get(REQUEST_KEY) {
                Some(Value::Custom(any)) => {
                    any.clone()
                        .downcast()
                        .map_err(|_| FlowgateError::TaskPluginFailed {
                            plugin: self.name.clone(),
                            code: ResultCode::BadInput,
                            cause: "request slot holds a foreign value".to_string(),
                        })?
                }
                _ => {
                    return Err(FlowgateError::TaskPluginFailed {
                        plugin: self.name.clone(),
                        code: ResultCode::MissingInput,
                        cause: "no claimed request on task".to_string(),
                    });
                }
            };

            let mut data = task.payload().clone();
            data.remove(REQUEST_KEY);
            data.insert("ok".to_string(), Value::from(true));

            let response = UpstreamResponse {
                upstream_pipeline_name: ctx.pipeline_name().to_string(),
                data,
                task_error: task.error().map(str::to_string),
                task_result_code: task.result_code(),
            };
            let cancel = task.cancellation();
            request.respond(response, &cancel).await
        })
    }
}

struct ClosureFactory {
    name: String,
    shareable: bool,
    build: Box<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>,
}

impl PluginFactory for ClosureFactory {
    fn plugin_name(&self) -> &str {
        &self.name
    }

    fn shareable(&self) -> bool {
        self.shareable
    }

    fn create(&self, _config: &serde_json::Value) -> Result<Arc<dyn Plugin>> {
        Ok((self.build)())
    }
}

/// Register a per-worker-instance plugin built by `build`.
pub fn register_plugin(
    registry: &PluginRegistry,
    name: &str,
    build: impl Fn() -> Arc<dyn Plugin> + Send + Sync + 'static,
) {
    registry.register(
        Arc::new(ClosureFactory {
            name: name.to_string(),
            shareable: false,
            build: Box::new(build),
        }),
        serde_json::json!({}),
    );
}

/// Build a prepared config.
pub fn prepared_config(name: &str, plugins: &[&str], backlog: u16) -> PipelineConfig {
    let mut config = PipelineConfig::new(name)
        .with_plugins(plugins.iter().copied())
        .with_backlog(backlog);
    config.prepare().unwrap();
    config
}
