//! Per-run scratch directory.
//!
//! Every intermediate file a run produces lives in its own directory under
//! the temp root, so concurrent runs never collide and cleanup only ever
//! touches this run's files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;

/// What a cleanup pass managed to remove
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct RunWorkspace {
    run_id: Uuid,
    path: PathBuf,
    dir: Option<TempDir>,
    artifacts: Mutex<Vec<PathBuf>>,
}

impl RunWorkspace {
    /// Create `run-<id>-XXXX` under `root`, creating `root` if needed
    pub fn create(root: &Path, run_id: Uuid) -> io::Result<Self> {
        fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("run-{}-", run_id))
            .tempdir_in(root)?;
        let path = dir.path().to_path_buf();

        debug!("Run {} workspace at {:?}", run_id, path);

        Ok(Self {
            run_id,
            path,
            dir: Some(dir),
            artifacts: Mutex::new(Vec::new()),
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reserve a path for an intermediate file and track it for cleanup.
    ///
    /// Tracking happens before the file exists, so a half-written output
    /// from a failed tool is still removed.
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        let path = self.path.join(name);
        let mut artifacts = self.artifacts.lock().unwrap_or_else(|e| e.into_inner());
        if !artifacts.contains(&path) {
            artifacts.push(path.clone());
        }
        path
    }

    /// Paths reserved so far
    pub fn artifacts(&self) -> Vec<PathBuf> {
        self.artifacts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Delete one artifact now. Returns true if a file was removed.
    pub fn remove_artifact(&self, path: &Path) -> bool {
        match remove_if_present(path) {
            Ok(removed) => removed,
            Err(e) => {
                warn!("Run {}: failed to remove {:?}: {}", self.run_id, path, e);
                false
            }
        }
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.dir.is_none()
    }

    /// Best-effort removal of every artifact and the directory itself.
    ///
    /// Safe to call more than once; only the first call does anything.
    /// Failures are logged, never raised.
    pub fn cleanup(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();
        let Some(dir) = self.dir.take() else {
            return report;
        };

        let artifacts = std::mem::take(
            &mut *self.artifacts.lock().unwrap_or_else(|e| e.into_inner()),
        );
        for path in &artifacts {
            match remove_if_present(path) {
                Ok(true) => report.removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("Run {}: failed to remove {:?}: {}", self.run_id, path, e);
                    report.failed += 1;
                }
            }
        }

        match dir.close() {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(
                    "Run {}: failed to remove workspace {:?}: {}",
                    self.run_id, self.path, e
                );
                report.failed += 1;
            }
        }

        debug!(
            "Run {} cleanup: {} removed, {} failed",
            self.run_id, report.removed, report.failed
        );
        report
    }
}

impl Drop for RunWorkspace {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn remove_if_present(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
