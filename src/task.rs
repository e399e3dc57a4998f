//! Named task lifecycle (v0.1)
//!
//! [`FlowTask`] wraps one flow run in a small state machine:
//!
//! ```text
//! NotStarted ──execute()──> Processing ──┬──> Finished
//!                                        ├──> Failed    (any error, logged)
//!                                        └──> Stopped   (external stop())
//! ```
//!
//! The task decodes its definition, hands the graph to a [`FlowEngine`],
//! blocks until the engine reports completion, then gathers output from
//! every collector-capable step and offloads the result map to the
//! [`ResultStore`] so finished tasks do not pin memory.
//!
//! `stop()` and `status_report()` are safe to call from other threads
//! while `execute()` is in flight. Cancellation is cooperative: the
//! engine may run on for a while after `stop()` returns, and the status
//! re-check after `await_completion` is what keeps a stopped task from
//! persisting partial results.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, instrument};

use crate::engine::{EngineFactory, FlowEngine, RunOptions};
use crate::error::TaskError;
use crate::flow::Flow;
use crate::logging::{LevelLogger, LogLevel, LogSink, TaskLog};
use crate::store::{ResultHandle, ResultMap, ResultStore};

// ============================================================================
// STATUS
// ============================================================================

/// Task lifecycle states. `Finished`, `Failed` and `Stopped` are terminal:
/// no transition leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    NotStarted,
    Processing,
    Finished,
    Failed,
    Stopped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Finished | TaskStatus::Failed | TaskStatus::Stopped
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskStatus::NotStarted => "NOT_STARTED",
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Finished => "FINISHED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Stopped => "STOPPED",
        };
        write!(f, "{}", name)
    }
}

/// Snapshot returned by [`FlowTask::status_report`]: the current status
/// plus the rendered status/log text.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub status: TaskStatus,
    pub message: String,
}

// ============================================================================
// TASK
// ============================================================================

/// A named, cancellable, long-running flow execution.
pub struct FlowTask {
    name: Mutex<String>,
    /// Serialized flow document, decoded once at execute time.
    definition: String,
    /// Environment variables to set for the flow before it runs.
    parameters: HashMap<String, String>,
    sequential: bool,
    factory: Arc<dyn EngineFactory>,
    store: Arc<ResultStore>,
    log: TaskLog,
    logger: LevelLogger,

    status: Mutex<TaskStatus>,
    /// Live engine while `Processing`. `stop()` signals through this slot;
    /// `execute()` clears it only after the terminal transition, so the
    /// stop-side read is never stale.
    engine: Mutex<Option<Arc<dyn FlowEngine>>>,
    collected: Mutex<Option<ResultMap>>,
    persisted: Mutex<Option<ResultHandle>>,
}

impl FlowTask {
    pub fn new(
        name: impl Into<String>,
        definition: impl Into<String>,
        parameters: HashMap<String, String>,
        sequential: bool,
        factory: Arc<dyn EngineFactory>,
        store: Arc<ResultStore>,
    ) -> Self {
        let name = name.into();
        let log = TaskLog::new();
        let sink: Arc<dyn LogSink> = Arc::new(log.clone());
        let logger = LevelLogger::for_entity(&name, None, Some(sink));

        Self {
            name: Mutex::new(name),
            definition: definition.into(),
            parameters,
            sequential,
            factory,
            store,
            log,
            logger,
            status: Mutex::new(TaskStatus::NotStarted),
            engine: Mutex::new(None),
            collected: Mutex::new(None),
            persisted: Mutex::new(None),
        }
    }

    /// Override the logging threshold (default `Basic`).
    pub fn with_log_threshold(mut self, threshold: LogLevel) -> Self {
        self.logger = self.logger.with_threshold(threshold);
        self
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.lock() = name.into();
    }

    pub fn definition(&self) -> &str {
        &self.definition
    }

    pub fn parameters(&self) -> &HashMap<String, String> {
        &self.parameters
    }

    pub fn sequential(&self) -> bool {
        self.sequential
    }

    pub fn status(&self) -> TaskStatus {
        *self.status.lock()
    }

    /// The task's log caches, shared with every logger attached to it.
    pub fn task_log(&self) -> TaskLog {
        self.log.clone()
    }

    /// In-memory result map, present only until a successful offload (or
    /// after [`FlowTask::load_result`] rehydrates it).
    pub fn collected_result(&self) -> Option<ResultMap> {
        self.collected.lock().clone()
    }

    /// Handle to the persisted artifact, present once offload succeeds.
    pub fn persisted_result(&self) -> Option<ResultHandle> {
        self.persisted.lock().clone()
    }

    // ------------------------------------------------------------------
    // lifecycle
    // ------------------------------------------------------------------

    /// Run the flow to completion. Single-shot: a second call is ignored.
    ///
    /// Never returns an error — every failure is converted into a
    /// `Failed` status plus a logged diagnostic, and the only way to
    /// learn of it is polling [`FlowTask::status_report`].
    #[instrument(skip(self), fields(task = %self.name()))]
    pub async fn execute(&self) {
        {
            let status = self.status.lock();
            if *status != TaskStatus::NotStarted {
                drop(status);
                self.logger
                    .log_warning("execute() called on a task that already ran; ignoring");
                return;
            }
        }

        if let Err(err) = self.run().await {
            self.fail(err);
        }

        // cleanup regardless of outcome; the terminal status is already
        // published, so stop() cannot observe a half-torn-down task
        *self.engine.lock() = None;
    }

    async fn run(&self) -> Result<(), TaskError> {
        let flow = Flow::from_json(&self.definition)?;
        debug!(steps = flow.steps.len(), "decoded flow definition");

        let mut environment = HashMap::new();
        if !self.parameters.is_empty() {
            self.logger.log_basic("Setting parameters for the flow");
            environment.extend(
                self.parameters
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
        }
        let options = RunOptions {
            sequential: self.sequential,
            environment,
        };

        let engine = self.factory.create();
        *self.engine.lock() = Some(Arc::clone(&engine));
        *self.status.lock() = TaskStatus::Processing;

        engine.start(&flow, &options, self.logger.clone())?;
        let outcome = engine.await_completion().await;

        if self.status() == TaskStatus::Stopped {
            // stop() won the race; a halted graph's partial output is
            // neither collected nor persisted
            debug!("task stopped during execution, skipping result collection");
            return Ok(());
        }
        outcome?;

        let mut results = ResultMap::new();
        for step in engine.steps() {
            if let Some(collector) = &step.collector {
                if let Some(data) = collector.retrieve_data() {
                    results.insert(step.name.to_string(), data);
                }
            }
        }
        debug!(collected = results.len(), "gathered collectible outputs");

        if !results.is_empty() {
            *self.collected.lock() = Some(results);
            self.offload();
        }

        self.finish(TaskStatus::Finished);
        Ok(())
    }

    /// Best-effort offload of the collected map to durable storage.
    ///
    /// The in-memory copy is cleared only after the write is confirmed.
    /// On failure the handle is cleared and the map is discarded: fail
    /// open to protect server memory, accept the result loss, tell the
    /// operator through the log.
    fn offload(&self) {
        let mut collected = self.collected.lock();
        let Some(results) = collected.as_ref() else {
            return;
        };

        match self.store.persist(results) {
            Ok(handle) => {
                *self.persisted.lock() = Some(handle);
                *collected = None;
            }
            Err(err) => {
                *self.persisted.lock() = None;
                *collected = None;
                self.logger.log_error(
                    "Unable to persist collected results",
                    Some(&anyhow::Error::new(err)),
                );
            }
        }
    }

    fn fail(&self, err: TaskError) {
        let cause = match err {
            TaskError::Engine(inner) => inner,
            other => anyhow::Error::new(other),
        };
        // log before the transition: a poller that sees FAILED must also
        // see the diagnostic that explains it
        self.logger
            .log_error(&format!("Flow task failed: {}", cause), Some(&cause));
        self.finish(TaskStatus::Failed);
    }

    /// Move to a terminal state unless one was already reached.
    fn finish(&self, terminal: TaskStatus) {
        let mut status = self.status.lock();
        if !status.is_terminal() {
            *status = terminal;
        }
    }

    /// Ask a running task to halt. Cooperative: the engine may keep
    /// running for a while after this returns. Safe from any thread; a
    /// no-op before execution starts or after a terminal state.
    pub fn stop(&self) {
        let mut status = self.status.lock();
        if *status != TaskStatus::Processing {
            return;
        }
        // holding the status lock makes this atomic with respect to the
        // execute-side teardown, which clears the slot only after the
        // terminal transition
        if let Some(engine) = self.engine.lock().as_ref() {
            engine.request_stop();
        }
        *status = TaskStatus::Stopped;
    }

    /// Current status plus the accumulated status/log text. Read-only
    /// snapshot, safe to poll from any thread at any rate. Entries
    /// produced before a terminal transition are always visible once
    /// that status is observed.
    pub fn status_report(&self) -> StatusReport {
        let status = self.status();

        let mut message = String::from("@@@ Status messages:\n\n");
        for entry in self.log.status_cache() {
            message.push_str(&entry);
            message.push('\n');
        }
        message.push_str("\n@@@ Log messages:\n\n");
        for entry in self.log.log_cache() {
            message.push_str(&entry);
            message.push('\n');
        }

        StatusReport { status, message }
    }

    // ------------------------------------------------------------------
    // persisted results
    // ------------------------------------------------------------------

    /// Reload the persisted result map into memory and return it.
    ///
    /// Fails with [`TaskError::NotFound`] when nothing was persisted or
    /// the artifact has since been purged. Does not touch task status.
    pub fn load_result(&self) -> Result<ResultMap, TaskError> {
        let handle = self
            .persisted
            .lock()
            .clone()
            .ok_or_else(|| TaskError::NotFound("no persisted result artifact".to_string()))?;

        let results = self.store.load(&handle)?;
        *self.collected.lock() = Some(results.clone());
        Ok(results)
    }

    /// Remove the persisted artifact, if any. Never fails: the store
    /// defers a removal it cannot complete.
    pub fn purge(&self) {
        if let Some(handle) = self.persisted.lock().as_ref() {
            self.store.purge(handle);
        }
    }
}

impl std::fmt::Debug for FlowTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowTask")
            .field("name", &self.name())
            .field("status", &self.status())
            .field("sequential", &self.sequential)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_task() -> FlowTask {
        let factory: Arc<dyn EngineFactory> =
            Arc::new(|| -> Arc<dyn FlowEngine> { unreachable!("never started") });
        FlowTask::new(
            "idle",
            r#"{"steps": []}"#,
            HashMap::new(),
            false,
            factory,
            Arc::new(ResultStore::new("unused")),
        )
    }

    #[test]
    fn status_displays_external_values() {
        assert_eq!(TaskStatus::NotStarted.to_string(), "NOT_STARTED");
        assert_eq!(TaskStatus::Processing.to_string(), "PROCESSING");
        assert_eq!(TaskStatus::Finished.to_string(), "FINISHED");
        assert_eq!(TaskStatus::Failed.to_string(), "FAILED");
        assert_eq!(TaskStatus::Stopped.to_string(), "STOPPED");
    }

    #[test]
    fn terminal_states() {
        assert!(!TaskStatus::NotStarted.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Finished.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Stopped.is_terminal());
    }

    #[test]
    fn stop_before_start_is_a_no_op() {
        let task = idle_task();
        task.stop();
        assert_eq!(task.status(), TaskStatus::NotStarted);
    }

    #[test]
    fn name_is_mutable() {
        let task = idle_task();
        assert_eq!(task.name(), "idle");
        task.set_name("renamed");
        assert_eq!(task.name(), "renamed");
    }

    #[test]
    fn fresh_task_renders_empty_sections() {
        let task = idle_task();
        let report = task.status_report();
        assert_eq!(report.status, TaskStatus::NotStarted);
        assert_eq!(
            report.message,
            "@@@ Status messages:\n\n\n@@@ Log messages:\n\n"
        );
    }

    #[test]
    fn load_result_without_artifact_is_not_found() {
        let task = idle_task();
        let err = task.load_result().unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn purge_without_artifact_is_a_no_op() {
        let task = idle_task();
        task.purge();
    }
}
