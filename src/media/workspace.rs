//! Per-job scoped temporary storage.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::error;
use uuid::Uuid;

/// Exclusively owned directory tree for one job's intermediate artifacts.
///
/// Torn down on drop, whichever way the job ends. Never shared between jobs.
#[derive(Debug)]
pub struct JobWorkspace {
    root: PathBuf,
    job_id: String,
}

impl JobWorkspace {
    pub fn create(jobs_dir: &Path) -> io::Result<Self> {
        let job_id = Uuid::new_v4().to_string();
        let root = jobs_dir.join(&job_id);
        fs::create_dir_all(&root)?;
        Ok(Self { root, job_id })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Frame directory for a single-asset job. Created on first call.
    pub fn frames_dir(&self) -> io::Result<PathBuf> {
        let dir = self.root.join("frames");
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Frame directory for one overlay layer. Created on first call.
    pub fn indexed_frames_dir(&self, index: usize) -> io::Result<PathBuf> {
        let dir = self.root.join(format!("frames-{}", index));
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Intermediate single-layer video for one overlay layer.
    pub fn layer_video_path(&self, index: usize) -> PathBuf {
        self.root.join(format!("layer-{}.webm", index))
    }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_dir_all(&self.root) {
            if err.kind() != io::ErrorKind::NotFound {
                error!("Failed to remove job folder {}: {}", self.job_id, err);
            }
        }
    }
}

/// Deletes the wrapped file when dropped. Used for fetched inputs and for
/// the delivered artifact once the job resolves.
#[derive(Debug)]
pub struct ScopedFile(PathBuf);

impl ScopedFile {
    pub fn new(path: PathBuf) -> Self {
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for ScopedFile {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.0) {
            if err.kind() != io::ErrorKind::NotFound {
                error!("Failed to remove {}: {}", self.0.display(), err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_creates_and_removes_its_tree() {
        let jobs_dir = tempfile::tempdir().unwrap();

        let root = {
            let workspace = JobWorkspace::create(jobs_dir.path()).unwrap();
            let frames = workspace.frames_dir().unwrap();
            let layer_frames = workspace.indexed_frames_dir(1).unwrap();
            assert!(frames.is_dir());
            assert!(layer_frames.is_dir());
            assert!(layer_frames.ends_with("frames-1"));
            jobs_dir.path().join(workspace.job_id())
        };

        assert!(!root.exists());
    }

    #[test]
    fn workspaces_never_collide() {
        let jobs_dir = tempfile::tempdir().unwrap();
        let a = JobWorkspace::create(jobs_dir.path()).unwrap();
        let b = JobWorkspace::create(jobs_dir.path()).unwrap();
        assert_ne!(a.job_id(), b.job_id());
    }

    #[test]
    fn cleanup_tolerates_already_removed_tree() {
        let jobs_dir = tempfile::tempdir().unwrap();
        let workspace = JobWorkspace::create(jobs_dir.path()).unwrap();
        fs::remove_dir_all(jobs_dir.path().join(workspace.job_id())).unwrap();
        drop(workspace); // must not panic
    }

    #[test]
    fn scoped_file_removes_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.webm");
        fs::write(&path, b"x").unwrap();
        drop(ScopedFile::new(path.clone()));
        assert!(!path.exists());
    }
}
