//! Leveled, prefixed logging for concurrent tasks and steps (v0.1)
//!
//! Many flows execute at once and all of them write into one stream, so
//! every message carries a severity tag and a per-entity prefix. Two pieces:
//!
//! - [`TaskLog`]: thread-safe, append-only status/log caches for one task.
//!   The status cache holds short operator-facing lines, the log cache the
//!   full diagnostics. Both are rendered verbatim when status is polled.
//! - [`LevelLogger`]: per-entity wrapper around a [`LogSink`] that filters
//!   by severity threshold, always passes warnings/errors, and mirrors
//!   them as terse status lines.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

// ============================================================================
// SEVERITY
// ============================================================================

/// Message severity.
///
/// `Low..=Debugging` form the verbosity ladder compared against a logger's
/// threshold. `Warning` and `Error` sit outside the ladder and are emitted
/// unconditionally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Low = 0,
    Basic = 1,
    Detailed = 2,
    Debugging = 3,
    Warning = 4,
    Error = 5,
}

impl LogLevel {
    /// Warnings and errors bypass threshold filtering.
    pub fn is_out_of_band(self) -> bool {
        matches!(self, LogLevel::Warning | LogLevel::Error)
    }

    fn rank(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogLevel::Low => "LOW",
            LogLevel::Basic => "BASIC",
            LogLevel::Detailed => "DETAILED",
            LogLevel::Debugging => "DEBUGGING",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        };
        write!(f, "{}", name)
    }
}

// ============================================================================
// SINK
// ============================================================================

/// Target a [`LevelLogger`] writes through.
///
/// [`TaskLog`] is the in-tree implementation; a scheduler may supply its own
/// (e.g. one forwarding to a central log service).
pub trait LogSink: Send + Sync {
    /// Append a full diagnostic line to the log channel.
    fn log_message(&self, message: &str);

    /// Append a short operator-facing line to the status channel.
    fn status_message(&self, message: &str);
}

// ============================================================================
// TASK LOG
// ============================================================================

/// Append-only status/log caches for one task.
///
/// Clones share storage, so the task, its loggers, and a polling thread can
/// all hold the same caches. Writers append under a write lock; readers take
/// snapshot copies, never blocking accumulation.
#[derive(Clone, Default)]
pub struct TaskLog {
    status: Arc<RwLock<Vec<String>>>,
    log: Arc<RwLock<Vec<String>>>,
}

impl TaskLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the status cache, in arrival order.
    pub fn status_cache(&self) -> Vec<String> {
        self.status.read().clone()
    }

    /// Snapshot of the log cache, in arrival order.
    pub fn log_cache(&self) -> Vec<String> {
        self.log.read().clone()
    }
}

impl LogSink for TaskLog {
    fn log_message(&self, message: &str) {
        self.log.write().push(message.to_string());
    }

    fn status_message(&self, message: &str) {
        self.status.write().push(message.to_string());
    }
}

impl std::fmt::Debug for TaskLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskLog")
            .field("status_entries", &self.status.read().len())
            .field("log_entries", &self.log.read().len())
            .finish()
    }
}

// ============================================================================
// LEVEL LOGGER
// ============================================================================

/// Process-wide counter for identity tokens. Two concurrent entities with
/// the same display name stay distinguishable in the interleaved stream.
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Severity-filtering, prefixing logger for one entity (a task or a step).
///
/// Emits iff the severity is out-of-band or at most the threshold. Emitted
/// lines are formatted `[LEVEL] prefix message`, with the full cause chain
/// appended when one is supplied. Without a sink, lines fall back to the
/// unbuffered error stream.
#[derive(Clone)]
pub struct LevelLogger {
    sink: Option<Arc<dyn LogSink>>,
    threshold: LogLevel,
    prefix: String,
    mirror_status: bool,
}

impl LevelLogger {
    /// Logger for a named entity. The prefix is
    /// `<name>$<identity-token>|<options>|`, options included only when
    /// given (so configuration differences between instances of the same
    /// step type are visible without reading the log body).
    pub fn for_entity(name: &str, options: Option<&str>, sink: Option<Arc<dyn LogSink>>) -> Self {
        let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        let mut prefix = format!("{}${}|", name, token);
        if let Some(options) = options {
            prefix.push_str(options);
            prefix.push('|');
        }

        Self {
            sink,
            threshold: LogLevel::Basic,
            prefix,
            mirror_status: true,
        }
    }

    /// Override the severity threshold (default `Basic`).
    pub fn with_threshold(mut self, threshold: LogLevel) -> Self {
        self.threshold = threshold;
        self
    }

    /// Disable the terse status lines mirrored for warnings/errors.
    pub fn without_status_mirror(mut self) -> Self {
        self.mirror_status = false;
        self
    }

    pub fn threshold(&self) -> LogLevel {
        self.threshold
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn log(&self, message: &str, level: LogLevel) {
        self.emit(message, level, None);
    }

    pub fn log_low(&self, message: &str) {
        self.log(message, LogLevel::Low);
    }

    pub fn log_basic(&self, message: &str) {
        self.log(message, LogLevel::Basic);
    }

    pub fn log_detailed(&self, message: &str) {
        self.log(message, LogLevel::Detailed);
    }

    pub fn log_debug(&self, message: &str) {
        self.log(message, LogLevel::Debugging);
    }

    pub fn log_warning(&self, message: &str) {
        self.emit(message, LogLevel::Warning, None);
        if self.mirror_status {
            self.status_message(&format!("WARNING: {}", message));
        }
    }

    pub fn log_error(&self, message: &str, cause: Option<&anyhow::Error>) {
        self.emit(message, LogLevel::Error, cause);
        if self.mirror_status {
            self.status_message(&format!("ERROR: {}", message));
        }
    }

    /// Post a prefixed line to the status channel, bypassing filtering.
    pub fn status_message(&self, message: &str) {
        if let Some(sink) = &self.sink {
            sink.status_message(&format!("{}{}", self.prefix, message));
        }
    }

    fn emit(&self, message: &str, level: LogLevel, cause: Option<&anyhow::Error>) {
        if !level.is_out_of_band() && level.rank() > self.threshold.rank() {
            return;
        }

        let mut line = format!("[{}] {}{}", level, self.prefix, message);
        if let Some(cause) = cause {
            // {:?} on anyhow::Error renders the message plus the full
            // cause chain, the closest thing to a printed stack trace
            line.push('\n');
            line.push_str(&format!("{:?}", cause));
        }

        match &self.sink {
            Some(sink) => {
                sink.log_message(&line);
                if level.is_out_of_band() && self.mirror_status {
                    self.status_message(&format!("{} (see log for details)", level));
                }
            }
            None => eprintln!("{}", line),
        }
    }
}

impl std::fmt::Debug for LevelLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LevelLogger")
            .field("prefix", &self.prefix)
            .field("threshold", &self.threshold)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn entity_logger(name: &str) -> (LevelLogger, TaskLog) {
        let log = TaskLog::new();
        let sink: Arc<dyn LogSink> = Arc::new(log.clone());
        (LevelLogger::for_entity(name, None, Some(sink)), log)
    }

    #[test]
    fn threshold_filters_higher_verbosity() {
        let (logger, log) = entity_logger("filter");

        logger.log_basic("kept");
        logger.log_debug("filtered");

        let cache = log.log_cache();
        assert_eq!(cache.len(), 1);
        assert!(cache[0].contains("kept"));
    }

    #[test]
    fn warning_bypasses_threshold_and_mirrors_status() {
        let (logger, log) = entity_logger("warn");

        logger.log_debug("filtered");
        logger.log_warning("disk nearly full");

        let cache = log.log_cache();
        assert_eq!(cache.len(), 1);
        assert!(cache[0].starts_with("[WARNING] warn$"));

        let status = log.status_cache();
        assert!(status.iter().any(|s| s.contains("WARNING: disk nearly full")));
        assert!(status.iter().any(|s| s.contains("WARNING (see log for details)")));
    }

    #[test]
    fn error_appends_cause_chain() {
        let (logger, log) = entity_logger("err");

        let cause = anyhow!("connection refused").context("engine start failed");
        logger.log_error("flow did not launch", Some(&cause));

        let cache = log.log_cache();
        assert_eq!(cache.len(), 1);
        assert!(cache[0].starts_with("[ERROR] err$"));
        assert!(cache[0].contains("flow did not launch"));
        assert!(cache[0].contains("engine start failed"));
        assert!(cache[0].contains("connection refused"));

        let status = log.status_cache();
        assert!(status.iter().any(|s| s.contains("ERROR: flow did not launch")));
    }

    #[test]
    fn prefix_distinguishes_same_named_entities() {
        let (a, _log_a) = entity_logger("step");
        let (b, _log_b) = entity_logger("step");

        assert_ne!(a.prefix(), b.prefix());
        assert!(a.prefix().starts_with("step$"));
        assert!(a.prefix().ends_with('|'));
    }

    #[test]
    fn options_appear_in_prefix() {
        let log = TaskLog::new();
        let sink: Arc<dyn LogSink> = Arc::new(log.clone());
        let logger = LevelLogger::for_entity("loader", Some("path=/data in.csv"), Some(sink));

        logger.log_basic("reading");
        assert!(log.log_cache()[0].contains("|path=/data in.csv|"));
    }

    #[test]
    fn raised_threshold_admits_debug() {
        let (logger, log) = entity_logger("dbg");
        let logger = logger.with_threshold(LogLevel::Debugging);

        logger.log_debug("now visible");
        assert_eq!(log.log_cache().len(), 1);
    }

    #[test]
    fn status_mirror_can_be_disabled() {
        let (logger, log) = entity_logger("quiet");
        let logger = logger.without_status_mirror();

        logger.log_warning("still logged");

        assert_eq!(log.log_cache().len(), 1);
        assert!(log.status_cache().is_empty());
    }

    #[test]
    fn missing_sink_does_not_panic() {
        let logger = LevelLogger::for_entity("orphan", None, None);
        logger.log_basic("goes to stderr");
        logger.log_error("also stderr", None);
    }

    #[test]
    fn caches_are_shared_across_clones_and_threads() {
        use std::thread;

        let log = TaskLog::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let log = log.clone();
                thread::spawn(move || {
                    log.log_message(&format!("entry {}", i));
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(log.log_cache().len(), 8);
    }
}
