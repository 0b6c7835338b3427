//! Per-project change locks
//!
//! A change lock gates every write to a project's catalog and resource
//! directories. Acquisition never blocks: a second attempt while the lock is
//! held returns `None`, and the caller reports the sync as skipped.
//!
//! Two layers are taken in order: an in-process set keyed by project id, then
//! an exclusive advisory lock on `.formsync/sync.lock`, so separate processes
//! (and separate coordinators) working on the same project exclude each other.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use fs4::fs_std::FileExt;
use thiserror::Error;
use tracing::debug;

use crate::core::project::Project;

/// The lock file could not be opened or locked
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cannot lock {}: {message}", .path.display())]
pub struct LockError {
    pub path: PathBuf,
    pub message: String,
}

impl LockError {
    fn new(path: &Path, err: std::io::Error) -> Self {
        Self {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

/// Registry of held project locks
#[derive(Debug, Clone, Default)]
pub struct ChangeLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl ChangeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, HashSet<String>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take the lock for `project` if nobody holds it, in this process or another
    pub fn try_acquire(&self, project: &Project) -> Result<Option<ChangeLockGuard>, LockError> {
        let project_id = project.id();
        if !self.held().insert(project_id.clone()) {
            return Ok(None);
        }

        // From here the set entry is released by the guard's Drop on every path
        let mut guard = ChangeLockGuard {
            held: Arc::clone(&self.held),
            project_id,
            file: None,
        };

        let path = project.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| LockError::new(&path, e))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                guard.file = Some(file);
                Ok(Some(guard))
            }
            Err(err)
                if err.kind() == ErrorKind::WouldBlock
                    || err.raw_os_error() == fs4::lock_contended_error().raw_os_error() =>
            {
                debug!(path = %path.display(), "lock file held by another process");
                Ok(None)
            }
            Err(err) => Err(LockError::new(&path, err)),
        }
    }

    /// Whether this registry currently holds `project_id`.
    ///
    /// Locks held by other processes are not visible here.
    pub fn is_locked(&self, project_id: &str) -> bool {
        self.held().contains(project_id)
    }

    /// Run `f` under the lock, or return `Ok(None)` without running it
    pub fn with_lock<T>(
        &self,
        project: &Project,
        f: impl FnOnce() -> T,
    ) -> Result<Option<T>, LockError> {
        let Some(_guard) = self.try_acquire(project)? else {
            return Ok(None);
        };
        Ok(Some(f()))
    }
}

/// Releases its project lock when dropped
#[derive(Debug)]
pub struct ChangeLockGuard {
    held: Arc<Mutex<HashSet<String>>>,
    project_id: String,
    file: Option<File>,
}

impl ChangeLockGuard {
    pub fn project_id(&self) -> &str {
        &self.project_id
    }
}

impl Drop for ChangeLockGuard {
    fn drop(&mut self) {
        // File lock first, then the set entry
        drop(self.file.take());

        let mut held = self
            .held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let released = held.remove(&self.project_id);
        debug_assert!(released, "change lock released twice");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;
    use tempfile::{tempdir, TempDir};

    fn project() -> (TempDir, Project) {
        let tmp = tempdir().unwrap();
        let project = Project::init(tmp.path()).unwrap();
        (tmp, project)
    }

    #[test]
    fn test_second_acquire_fails_until_release() {
        let (_tmp, p) = project();
        let locks = ChangeLocks::new();
        let guard = locks.try_acquire(&p).unwrap().unwrap();
        assert!(locks.try_acquire(&p).unwrap().is_none());
        assert!(locks.is_locked(&p.id()));
        assert!(p.lock_path().is_file());

        drop(guard);
        assert!(!locks.is_locked(&p.id()));
        assert!(locks.try_acquire(&p).unwrap().is_some());
    }

    #[test]
    fn test_projects_are_independent() {
        let (_tp, p) = project();
        let (_tq, q) = project();
        let locks = ChangeLocks::new();
        let _p = locks.try_acquire(&p).unwrap().unwrap();
        assert!(locks.try_acquire(&q).unwrap().is_some());
    }

    #[test]
    fn test_separate_registries_exclude_through_lock_file() {
        let (_tmp, p) = project();
        let first = ChangeLocks::new();
        let second = ChangeLocks::new();

        let guard = first.try_acquire(&p).unwrap().unwrap();
        assert!(second.try_acquire(&p).unwrap().is_none());
        // The failed attempt must not leave its own set entry behind
        assert!(!second.is_locked(&p.id()));

        drop(guard);
        assert!(second.try_acquire(&p).unwrap().is_some());
    }

    #[test]
    fn test_missing_project_dir_is_an_error() {
        let (tmp, p) = project();
        std::fs::remove_dir_all(tmp.path().join(".formsync")).unwrap();

        let locks = ChangeLocks::new();
        assert!(locks.try_acquire(&p).is_err());
        assert!(!locks.is_locked(&p.id()));
    }

    #[test]
    fn test_with_lock_skips_when_held() {
        let (_tmp, p) = project();
        let locks = ChangeLocks::new();
        assert_eq!(locks.with_lock(&p, || 7).unwrap(), Some(7));

        let _guard = ChangeLocks::new().try_acquire(&p).unwrap().unwrap();
        let mut ran = false;
        assert_eq!(locks.with_lock(&p, || ran = true).unwrap(), None);
        assert!(!ran);
    }

    #[test]
    fn test_exactly_one_concurrent_winner() {
        let (_tmp, p) = project();
        let barrier = Arc::new(Barrier::new(8));

        // Half share a registry, half bring their own
        let shared = ChangeLocks::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let locks = if i % 2 == 0 {
                    shared.clone()
                } else {
                    ChangeLocks::new()
                };
                let project = p.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let guard = locks.try_acquire(&project).unwrap();
                    // Hold until every thread has tried
                    barrier.wait();
                    guard.is_some()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
