//! Durable result artifacts (v0.1)
//!
//! Collected results are offloaded to disk so a finished task does not pin
//! its output in server memory. Each persist writes a fresh JSON artifact
//! via temp-file-then-rename, so a partially written artifact is never
//! visible to `load`. An artifact belongs to exactly one task until purged.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::TaskError;

/// Step name → collected output for one task run.
pub type ResultMap = BTreeMap<String, Value>;

/// Handle to one persisted artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultHandle(PathBuf);

impl ResultHandle {
    pub fn path(&self) -> &Path {
        &self.0
    }
}

/// Directory-backed store for task result maps.
pub struct ResultStore {
    dir: PathBuf,
    /// Artifacts whose removal failed. Retried on later purges and at
    /// store teardown instead of surfacing an error to the caller.
    deferred: Mutex<Vec<PathBuf>>,
}

impl ResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            deferred: Mutex::new(Vec::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Serialize `results` to a new uniquely named artifact.
    ///
    /// The write lands in a temp sibling first and is renamed into place,
    /// so `load` can never observe a half-written artifact.
    pub fn persist(&self, results: &ResultMap) -> Result<ResultHandle, TaskError> {
        fs::create_dir_all(&self.dir).map_err(|e| storage("create store directory", &e))?;

        let target = self.dir.join(format!("result-{}.json", Uuid::new_v4()));
        let staging = target.with_extension("json.tmp");

        let bytes =
            serde_json::to_vec_pretty(results).map_err(|e| storage("encode result map", &e))?;
        fs::write(&staging, &bytes).map_err(|e| storage("write artifact", &e))?;
        if let Err(e) = fs::rename(&staging, &target) {
            let _ = fs::remove_file(&staging);
            return Err(storage("finalize artifact", &e));
        }

        debug!(artifact = %target.display(), entries = results.len(), "persisted result map");
        Ok(ResultHandle(target))
    }

    /// Load an artifact back into memory.
    pub fn load(&self, handle: &ResultHandle) -> Result<ResultMap, TaskError> {
        let bytes = match fs::read(handle.path()) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(TaskError::NotFound(handle.path().display().to_string()));
            }
            Err(e) => return Err(storage("read artifact", &e)),
        };

        serde_json::from_slice(&bytes).map_err(|e| storage("decode artifact", &e))
    }

    /// Remove an artifact. A delete that cannot complete is queued for
    /// deferred removal rather than surfaced; a missing artifact is fine.
    pub fn purge(&self, handle: &ResultHandle) {
        self.sweep_deferred();

        match fs::remove_file(handle.path()) {
            Ok(()) => debug!(artifact = %handle.path().display(), "purged result artifact"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(artifact = %handle.path().display(), error = %e, "purge deferred");
                self.deferred.lock().push(handle.path().to_path_buf());
            }
        }
    }

    /// Retry previously failed removals, keeping whatever still resists.
    fn sweep_deferred(&self) {
        let mut deferred = self.deferred.lock();
        deferred.retain(|path| match fs::remove_file(path) {
            Ok(()) => false,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(_) => true,
        });
    }
}

impl Drop for ResultStore {
    fn drop(&mut self) {
        for path in self.deferred.get_mut().drain(..) {
            let _ = fs::remove_file(path);
        }
    }
}

fn storage(action: &str, cause: &dyn std::fmt::Display) -> TaskError {
    TaskError::Storage {
        details: format!("{}: {}", action, cause),
    }
}
