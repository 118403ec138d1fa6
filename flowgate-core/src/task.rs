//! Tasks, the unit of work flowing through a pipeline.
//!
//! A task is created by a worker, filled by a source plugin (or from a
//! cross-pipeline request), mutated only by the worker that owns it, and
//! destroyed when the worker finishes the plugin chain for it. Ownership is
//! exclusive, so the payload needs no internal locking; the cancellation
//! signal is the only part shared with other parties.

use std::collections::HashMap;
use std::fmt;

use crate::cancel::Cancellation;
use crate::value::Value;

/// Outcome of running a task through (part of) a plugin chain.
///
/// Ordering is by severity: codes are monotonic on a task, so a later
/// [`Task::set_result_code`] only takes effect when the new code is at least
/// as severe as the current one. Only recovery may go back to `Succeed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResultCode {
    /// The task completed (or is still completing) successfully.
    Succeed,
    /// A required input was absent.
    MissingInput,
    /// An input was present but malformed.
    BadInput,
    /// A downstream dependency refused or was unreachable.
    ServiceUnavailable,
    /// A dependency did not answer in time.
    TimeoutError,
    /// The task was shed by flow control.
    FlowControl,
    /// A plugin failed unexpectedly (including panics).
    InternalError,
    /// The task's cancellation signal fired before completion.
    TaskCancelled,
}

impl ResultCode {
    /// Whether this code means the task has (so far) succeeded.
    pub fn is_succeed(self) -> bool {
        self == Self::Succeed
    }

    /// Whether this code is a terminal failure that stops the chain unless
    /// a recovery callback intervenes.
    pub fn is_failure(self) -> bool {
        !self.is_succeed()
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Succeed => "Succeed",
            Self::MissingInput => "MissingInput",
            Self::BadInput => "BadInput",
            Self::ServiceUnavailable => "ServiceUnavailable",
            Self::TimeoutError => "TimeoutError",
            Self::FlowControl => "FlowControl",
            Self::InternalError => "InternalError",
            Self::TaskCancelled => "TaskCancelled",
        };
        f.write_str(s)
    }
}

/// A finish-callback. Receives the finished task and whether it was
/// cancelled. Runs exactly once, in reverse registration order.
pub type FinishFn = Box<dyn FnOnce(&Task, bool) + Send>;

/// A recovery-callback. Receives the task and the name of the plugin that
/// failed it, and may call [`Task::recover`] to resume the chain.
pub type RecoveryFn = Box<dyn FnMut(&mut Task, &str) + Send>;

/// One unit of work carrying payload, cancellation, and outcome through a
/// plugin chain.
pub struct Task {
    payload: HashMap<String, Value>,
    result_code: ResultCode,
    error: Option<String>,
    cancellation: Cancellation,
    finish_callbacks: Vec<(String, FinishFn)>,
    recovery_callbacks: Vec<(String, RecoveryFn)>,
    finished: bool,
}

impl Task {
    /// Create an empty task with a fresh cancellation signal.
    pub fn new() -> Self {
        Self::with_cancellation(Cancellation::new())
    }

    /// Create an empty task bound to an existing cancellation signal.
    pub fn with_cancellation(cancellation: Cancellation) -> Self {
        Self {
            payload: HashMap::new(),
            result_code: ResultCode::Succeed,
            error: None,
            cancellation,
            finish_callbacks: Vec::new(),
            recovery_callbacks: Vec::new(),
            finished: false,
        }
    }

    /// Bind a payload entry, returning the previous value if any.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.payload.insert(key.into(), value)
    }

    /// Look up a payload entry.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// The whole payload, for handoff and inspection.
    pub fn payload(&self) -> &HashMap<String, Value> {
        &self.payload
    }

    /// Replace the whole payload (used when a task is materialized from a
    /// cross-pipeline request).
    pub fn set_payload(&mut self, payload: HashMap<String, Value>) {
        self.payload = payload;
    }

    /// Fire the task's cancellation signal.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// The task's cancellation signal. Plugins performing I/O are expected
    /// to observe it.
    pub fn cancellation(&self) -> Cancellation {
        self.cancellation.clone()
    }

    /// Whether the cancellation signal has fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Record a result code. Codes only escalate: a less severe code than
    /// the current one is ignored.
    pub fn set_result_code(&mut self, code: ResultCode) {
        if code >= self.result_code {
            self.result_code = code;
        }
    }

    /// Record a result code together with an error description.
    pub fn set_error(&mut self, code: ResultCode, error: impl Into<String>) {
        if code >= self.result_code {
            self.result_code = code;
            self.error = Some(error.into());
        }
    }

    /// The current result code.
    pub fn result_code(&self) -> ResultCode {
        self.result_code
    }

    /// The recorded error description, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Reset the task to `Succeed` and clear the error. Reserved for
    /// recovery callbacks; the chain continues when a recovery does this.
    pub fn recover(&mut self) {
        self.result_code = ResultCode::Succeed;
        self.error = None;
    }

    /// Register a finish-callback under a name. Re-registering a name
    /// replaces the callback but keeps its position in the firing order.
    pub fn add_finish_callback(&mut self, name: impl Into<String>, callback: FinishFn) {
        let name = name.into();
        if let Some(slot) = self.finish_callbacks.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = callback;
        } else {
            self.finish_callbacks.push((name, callback));
        }
    }

    /// Register a recovery-callback under a name, replacing any previous
    /// callback with that name in place.
    pub fn add_recovery_callback(&mut self, name: impl Into<String>, callback: RecoveryFn) {
        let name = name.into();
        if let Some(slot) = self.recovery_callbacks.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = callback;
        } else {
            self.recovery_callbacks.push((name, callback));
        }
    }

    /// Run recovery callbacks in reverse registration order and report
    /// whether one of them recovered the task.
    ///
    /// Callbacks stay registered afterwards so a later plugin failure can
    /// invoke them again.
    pub fn run_recovery_callbacks(&mut self, failed_plugin: &str) -> bool {
        let mut callbacks = std::mem::take(&mut self.recovery_callbacks);
        for (_, callback) in callbacks.iter_mut().rev() {
            callback(self, failed_plugin);
            if self.result_code.is_succeed() {
                break;
            }
        }
        // Callbacks registered during recovery land after the restored ones.
        callbacks.append(&mut self.recovery_callbacks);
        self.recovery_callbacks = callbacks;
        self.result_code.is_succeed()
    }

    /// Fire finish-callbacks in reverse registration order, exactly once.
    /// `cancelled` reports best-effort whether the task was cancelled.
    pub fn run_finish_callbacks(&mut self, cancelled: bool) {
        if self.finished {
            return;
        }
        self.finished = true;
        let callbacks = std::mem::take(&mut self.finish_callbacks);
        for (_, callback) in callbacks.into_iter().rev() {
            callback(self, cancelled);
        }
    }
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("payload", &self.payload)
            .field("result_code", &self.result_code)
            .field("error", &self.error)
            .field("finish_callbacks", &self.finish_callbacks.len())
            .field("recovery_callbacks", &self.recovery_callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn payload_round_trip() {
        let mut task = Task::new();
        assert!(task.set("x", Value::from(1i64)).is_none());
        assert_eq!(task.get("x").and_then(Value::as_int), Some(1));
        let old = task.set("x", Value::from(2i64));
        assert_eq!(old.and_then(|v| v.as_int()), Some(1));
    }

    #[test]
    fn result_code_is_monotonic() {
        let mut task = Task::new();
        task.set_error(ResultCode::InternalError, "boom");
        // A milder code must not downgrade the recorded one.
        task.set_result_code(ResultCode::BadInput);
        assert_eq!(task.result_code(), ResultCode::InternalError);
        assert_eq!(task.error(), Some("boom"));

        task.recover();
        assert_eq!(task.result_code(), ResultCode::Succeed);
        assert!(task.error().is_none());
    }

    #[test]
    fn finish_callbacks_fire_lifo_exactly_once() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut task = Task::new();

        for name in ["a", "b", "c"] {
            let order = order.clone();
            task.add_finish_callback(name, Box::new(move |_, _| order.lock().unwrap().push(name)));
        }

        task.run_finish_callbacks(false);
        task.run_finish_callbacks(false);

        assert_eq!(*order.lock().unwrap(), vec!["c", "b", "a"]);
    }

    #[test]
    fn finish_callbacks_report_cancellation() {
        let seen = Arc::new(AtomicBool::new(false));
        let mut task = Task::new();
        let seen2 = seen.clone();
        task.add_finish_callback(
            "observer",
            Box::new(move |_, cancelled| seen2.store(cancelled, Ordering::SeqCst)),
        );
        task.cancel();
        let cancelled = task.is_cancelled();
        task.run_finish_callbacks(cancelled);
        assert!(seen.load(Ordering::SeqCst));
    }

    #[test]
    fn recovery_resets_result_code() {
        let mut task = Task::new();
        task.add_recovery_callback(
            "retry",
            Box::new(|task, plugin| {
                assert_eq!(plugin, "flaky");
                task.recover();
            }),
        );

        task.set_error(ResultCode::ServiceUnavailable, "503");
        assert!(task.run_recovery_callbacks("flaky"));
        assert_eq!(task.result_code(), ResultCode::Succeed);

        // Callbacks survive a recovery round.
        task.set_error(ResultCode::ServiceUnavailable, "503 again");
        assert!(task.run_recovery_callbacks("flaky"));
    }

    #[test]
    fn recovery_runs_lifo_and_stops_once_recovered() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut task = Task::new();

        let order1 = order.clone();
        task.add_recovery_callback(
            "first",
            Box::new(move |_, _| order1.lock().unwrap().push("first")),
        );
        let order2 = order.clone();
        task.add_recovery_callback(
            "second",
            Box::new(move |task, _| {
                order2.lock().unwrap().push("second");
                task.recover();
            }),
        );

        task.set_result_code(ResultCode::InternalError);
        assert!(task.run_recovery_callbacks("mw"));
        // "second" registered last, runs first, recovers; "first" never runs.
        assert_eq!(*order.lock().unwrap(), vec!["second"]);
    }

    #[test]
    fn unrecovered_failure_reports_false() {
        let mut task = Task::new();
        task.set_result_code(ResultCode::InternalError);
        assert!(!task.run_recovery_callbacks("mw"));
        assert_eq!(task.result_code(), ResultCode::InternalError);
    }
}
