use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::RunnerError;

/// Private working directory for one sandboxed run.
///
/// The directory is removed recursively when the guard is dropped, so every
/// exit path of a run (return, `?`, panic, cancelled future) releases it.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    /// Create `<root>/pilot-run-<uuid>`
    pub fn create(root: &Path) -> Result<Self, RunnerError> {
        std::fs::create_dir_all(root).map_err(|source| RunnerError::WorkDir {
            path: root.to_path_buf(),
            source,
        })?;

        let path = root.join(format!("pilot-run-{}", Uuid::new_v4()));
        std::fs::create_dir(&path).map_err(|source| RunnerError::WorkDir {
            path: path.clone(),
            source,
        })?;

        debug!(path = %path.display(), "created working directory");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a file inside the directory and return its path
    pub async fn write_source(&self, file_name: &str, contents: &str) -> Result<PathBuf, RunnerError> {
        let path = self.path.join(file_name);
        tokio::fs::write(&path, contents)
            .await
            .map_err(|source| RunnerError::WriteSource {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed working directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), err = %e, "failed to remove working directory"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_makes_unique_directories() {
        let root = TempDir::new().unwrap();
        let a = WorkDir::create(root.path()).unwrap();
        let b = WorkDir::create(root.path()).unwrap();

        assert!(a.path().is_dir());
        assert!(b.path().is_dir());
        assert_ne!(a.path(), b.path());
        assert!(a.path().starts_with(root.path()));
    }

    #[test]
    fn test_drop_removes_directory_with_contents() {
        let root = TempDir::new().unwrap();
        let workdir = WorkDir::create(root.path()).unwrap();
        let path = workdir.path().to_path_buf();
        std::fs::create_dir(path.join("nested")).unwrap();
        std::fs::write(path.join("nested").join("file.txt"), "data").unwrap();

        drop(workdir);
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_on_panic_still_removes_directory() {
        let root = TempDir::new().unwrap();
        let root_path = root.path().to_path_buf();

        let outcome = std::panic::catch_unwind(move || {
            let _workdir = WorkDir::create(&root_path).unwrap();
            panic!("boom");
        });

        assert!(outcome.is_err());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_write_source() {
        let root = TempDir::new().unwrap();
        let workdir = WorkDir::create(root.path()).unwrap();

        let path = workdir.write_source("main.sh", "echo hi").await.unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "echo hi");
    }
}
