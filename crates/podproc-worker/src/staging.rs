//! Job-scoped staging directories.
//!
//! Layout: `<base>/podcast-production/<pid>/<job_id>/`. Every worker process
//! stages under its own process id so several workers can share one work
//! dir. A [`StagingDir`] owns its directory; [`StagingDir::close`] removes it
//! on the normal path and `Drop` removes it when a job is cancelled.

use std::path::{Path, PathBuf};

use podproc_models::JobId;
use tracing::{debug, info, warn};

use crate::error::{WorkerError, WorkerResult};

/// Directory under the work dir that holds all job directories.
pub const STAGING_ROOT: &str = "podcast-production";

/// Root directory for staging under `base`.
pub fn staging_root(base: &Path) -> PathBuf {
    base.join(STAGING_ROOT)
}

/// Directory holding the jobs of the process `pid`.
pub fn process_root(base: &Path, pid: u32) -> PathBuf {
    staging_root(base).join(pid.to_string())
}

/// A job's private scratch directory.
#[derive(Debug)]
pub struct StagingDir {
    path: PathBuf,
    closed: bool,
}

impl StagingDir {
    /// Create the staging directory for `job_id` under `base`.
    ///
    /// Fails if the directory already exists; a job directory is never
    /// shared.
    pub async fn create(base: &Path, job_id: &JobId) -> WorkerResult<Self> {
        let root = process_root(base, std::process::id());
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| WorkerError::staging(&root, e))?;

        let path = root.join(job_id.as_str());
        tokio::fs::create_dir(&path)
            .await
            .map_err(|e| WorkerError::staging(&path, e))?;

        debug!("Created staging directory {}", path.display());
        Ok(Self { path, closed: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path for a file inside the directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Remove the directory without blocking the runtime.
    ///
    /// Failures are logged; a leftover directory is picked up by the next
    /// sweep once this process is gone.
    pub async fn close(mut self) {
        self.closed = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => debug!("Removed staging directory {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove staging directory {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Removed staging directory {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove staging directory {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Whether a process with `pid` is still running.
#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

/// Without procfs there is no cheap liveness check; foreign owners are kept.
#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

/// Remove staging directories whose owning process has exited.
///
/// Directories of this process and of any live process are left alone.
/// Entries not named after a process id predate the per-process layout and
/// are removed. Returns how many directories were removed. Best effort:
/// failures are logged and skipped.
pub async fn sweep_stale_staging(base: &Path) -> usize {
    let root = staging_root(base);
    let mut entries = match tokio::fs::read_dir(&root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
        Err(e) => {
            warn!("Cannot scan {} for stale jobs: {}", root.display(), e);
            return 0;
        }
    };

    let own_pid = std::process::id();
    let mut removed = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let owner = entry.file_name().to_str().and_then(|name| name.parse::<u32>().ok());
        if let Some(pid) = owner {
            if pid == own_pid || process_alive(pid) {
                debug!(pid, "Keeping staging directories of running process");
                continue;
            }
        }

        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to remove stale staging directory {}: {}", path.display(), e),
        }
    }

    if removed > 0 {
        info!("Removed {} stale staging directories under {}", removed, root.display());
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Above the largest pid Linux hands out, so never a live process.
    const DEAD_PID: u32 = 4_194_305;

    #[tokio::test]
    async fn test_layout_and_cleanup_on_drop() {
        let base = tempfile::tempdir().unwrap();
        let job_id = JobId::from_string("job-1");

        let staging = StagingDir::create(base.path(), &job_id).await.unwrap();
        let path = staging.path().to_path_buf();
        assert_eq!(
            path,
            base.path()
                .join("podcast-production")
                .join(std::process::id().to_string())
                .join("job-1")
        );
        assert!(path.is_dir());

        std::fs::write(staging.file("000_a.mp3"), b"x").unwrap();
        drop(staging);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_close_removes_directory() {
        let base = tempfile::tempdir().unwrap();
        let staging = StagingDir::create(base.path(), &JobId::from_string("job-2"))
            .await
            .unwrap();
        let path = staging.path().to_path_buf();
        std::fs::write(staging.file("output.mp3"), b"x").unwrap();

        staging.close().await;
        assert!(!path.exists());
        assert!(process_root(base.path(), std::process::id()).is_dir());
    }

    #[tokio::test]
    async fn test_directory_never_reused() {
        let base = tempfile::tempdir().unwrap();
        let job_id = JobId::from_string("dup");

        let _first = StagingDir::create(base.path(), &job_id).await.unwrap();
        let second = StagingDir::create(base.path(), &job_id).await;
        assert!(matches!(second, Err(WorkerError::Staging { .. })));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_sweep_removes_leftovers_of_exited_process() {
        let base = tempfile::tempdir().unwrap();
        assert_eq!(sweep_stale_staging(base.path()).await, 0);

        for id in ["a", "b"] {
            let dir = process_root(base.path(), DEAD_PID).join(id);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("output.mp3"), b"x").unwrap();
        }
        std::fs::create_dir_all(staging_root(base.path()).join("old-layout-job")).unwrap();

        assert_eq!(sweep_stale_staging(base.path()).await, 2);
        assert!(staging_root(base.path()).is_dir());
        assert_eq!(std::fs::read_dir(staging_root(base.path())).unwrap().count(), 0);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_sweep_keeps_live_job() {
        let base = tempfile::tempdir().unwrap();
        let live = StagingDir::create(base.path(), &JobId::from_string("in-flight"))
            .await
            .unwrap();
        std::fs::write(live.file("000_a.mp3"), b"x").unwrap();

        // Another worker on the host, still running
        let neighbour = process_root(base.path(), 1).join("other-job");
        std::fs::create_dir_all(&neighbour).unwrap();

        std::fs::create_dir_all(process_root(base.path(), DEAD_PID).join("abandoned")).unwrap();

        assert_eq!(sweep_stale_staging(base.path()).await, 1);
        assert!(live.file("000_a.mp3").exists());
        assert!(neighbour.is_dir());
        assert!(!process_root(base.path(), DEAD_PID).exists());
    }
}
