//! Execution engine contract (v0.1)
//!
//! The task drives an opaque dataflow engine through this narrow seam:
//! start it, wait for it, ask it to stop, enumerate its steps for
//! collectible output. How the engine schedules the graph internally —
//! threads, actors, connection wiring — is its own business.
//!
//! Engines report failures as [`anyhow::Error`] so arbitrary backends can
//! attach context without depending on this crate's error taxonomy.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::flow::Flow;
use crate::logging::LevelLogger;

/// Options handed to the engine at start.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Launch the flow's start points one at a time instead of
    /// concurrently. Scheduling policy belongs to the engine; the task
    /// only carries the flag.
    pub sequential: bool,

    /// Environment variables visible to the flow during execution.
    pub environment: HashMap<String, String>,
}

/// Collectible-output capability.
///
/// Steps that accumulate data during a run expose it here once the run is
/// over. Steps without the capability are simply not queried.
pub trait DataCollector: Send + Sync {
    /// The collected output, or `None` when the step produced nothing.
    fn retrieve_data(&self) -> Option<Value>;
}

/// One step as seen by the task layer: a display name plus the optional
/// collector capability.
#[derive(Clone)]
pub struct StepHandle {
    pub name: Arc<str>,
    pub collector: Option<Arc<dyn DataCollector>>,
}

impl StepHandle {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            collector: None,
        }
    }

    pub fn with_collector(mut self, collector: Arc<dyn DataCollector>) -> Self {
        self.collector = Some(collector);
        self
    }
}

/// The execution engine seam, consumed (not implemented) by the task layer.
///
/// `request_stop` is cooperative and may return well before the graph has
/// actually halted; `await_completion` is the only completion signal, and
/// the task re-checks its own status after it returns.
#[async_trait]
pub trait FlowEngine: Send + Sync {
    /// Begin executing `flow`. Returns once execution has been launched.
    fn start(&self, flow: &Flow, options: &RunOptions, logger: LevelLogger) -> Result<()>;

    /// Wait until the graph, across however many workers the engine uses,
    /// has finished or halted. `Err` means the graph failed; a run halted
    /// by `request_stop` resolves `Ok`.
    async fn await_completion(&self) -> Result<()>;

    /// Ask the engine to halt cooperatively. No guaranteed immediacy.
    fn request_stop(&self);

    /// Steps of the flow, in flow order.
    fn steps(&self) -> Vec<StepHandle>;
}

/// Builds a fresh engine for each task run.
///
/// Implemented for closures, so a scheduler can wire an engine in with
/// `Arc::new(|| ... )`.
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Arc<dyn FlowEngine>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> Arc<dyn FlowEngine> + Send + Sync,
{
    fn create(&self) -> Arc<dyn FlowEngine> {
        self()
    }
}
