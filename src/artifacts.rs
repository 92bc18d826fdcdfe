//! Per-request temporary artifact directories.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::PerfscopeResult;

const ARTIFACT_PREFIX: &str = "perfscope-";
const TRACE_FILE: &str = "perf.data";

#[derive(Debug, Clone)]
pub struct ArtifactManager {
    root: PathBuf,
}

impl ArtifactManager {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a fresh, uniquely named directory under the root.
    ///
    /// The directory is removed when the returned handle is dropped, so every
    /// exit path of the caller (including unwinding) releases it.
    pub fn acquire(&self) -> PerfscopeResult<ArtifactHandle> {
        std::fs::create_dir_all(&self.root)?;
        let dir = self
            .root
            .join(format!("{ARTIFACT_PREFIX}{}", uuid::Uuid::new_v4()));
        std::fs::create_dir(&dir)?;
        tracing::debug!("acquired artifact dir {}", dir.display());
        Ok(ArtifactHandle {
            dir,
            released: false,
        })
    }

    /// Runs `f` with a fresh handle and releases it afterwards, whatever `f` returns.
    pub fn scoped<T>(
        &self,
        f: impl FnOnce(&ArtifactHandle) -> PerfscopeResult<T>,
    ) -> PerfscopeResult<T> {
        let mut handle = self.acquire()?;
        let out = f(&handle);
        handle.release();
        out
    }
}

#[derive(Debug)]
pub struct ArtifactHandle {
    dir: PathBuf,
    released: bool,
}

impl ArtifactHandle {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location the record phase writes its binary trace to.
    pub fn trace_path(&self) -> PathBuf {
        self.dir.join(TRACE_FILE)
    }

    /// Deletes the directory and everything under it; returns the number of files removed.
    ///
    /// Failures are logged rather than returned. Calling this more than once is a no-op.
    pub fn release(&mut self) -> usize {
        if self.released {
            return 0;
        }
        self.released = true;

        let files = WalkDir::new(&self.dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .count();
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => {
                tracing::debug!("released artifact dir {} ({files} files)", self.dir.display());
                files
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => 0,
            Err(err) => {
                tracing::warn!("failed to remove artifact dir {}: {err}", self.dir.display());
                0
            }
        }
    }
}

impl Drop for ArtifactHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PerfscopeError;

    fn temp_root(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("perfscope-artifacts-{name}-{}", uuid::Uuid::new_v4()))
    }

    fn entries(root: &Path) -> usize {
        std::fs::read_dir(root).map(|it| it.count()).unwrap_or(0)
    }

    #[test]
    fn acquire_creates_unique_directories() {
        let manager = ArtifactManager::new(temp_root("unique"));
        let a = manager.acquire().expect("acquire a");
        let b = manager.acquire().expect("acquire b");
        assert_ne!(a.dir(), b.dir());
        assert!(a.dir().is_dir());
        assert!(b.trace_path().starts_with(b.dir()));
        drop(a);
        drop(b);
        assert_eq!(entries(manager.root()), 0);
    }

    #[test]
    fn release_reports_removed_files_once() {
        let manager = ArtifactManager::new(temp_root("release"));
        let mut handle = manager.acquire().expect("acquire");
        std::fs::write(handle.trace_path(), b"data").expect("trace");
        std::fs::create_dir(handle.dir().join("nested")).expect("nested");
        std::fs::write(handle.dir().join("nested").join("x"), b"x").expect("nested file");
        assert_eq!(handle.release(), 2);
        assert_eq!(handle.release(), 0);
        assert!(!handle.dir().exists());
    }

    #[test]
    fn scoped_cleans_up_on_error() {
        let manager = ArtifactManager::new(temp_root("scoped-err"));
        let out: PerfscopeResult<()> = manager.scoped(|handle| {
            std::fs::write(handle.trace_path(), b"partial")?;
            Err(PerfscopeError::Parse("boom".to_string()))
        });
        assert!(matches!(out, Err(PerfscopeError::Parse(_))));
        assert_eq!(entries(manager.root()), 0);
    }

    #[test]
    fn drop_cleans_up_on_panic() {
        let manager = ArtifactManager::new(temp_root("panic"));
        let m = manager.clone();
        let res = std::panic::catch_unwind(move || {
            let handle = m.acquire().expect("acquire");
            std::fs::write(handle.trace_path(), b"data").expect("trace");
            panic!("injected fault");
        });
        assert!(res.is_err());
        assert_eq!(entries(manager.root()), 0);
    }
}
