//! Sync coordination
//!
//! One sync attempt for a project runs as:
//!
//! ```text
//! try-acquire lock ──busy──> LockSkipped (nothing read or written)
//!        │
//!   inProgress = true
//!        │
//!   classify ──error──> Failed
//!        │
//!   for each absent/stale entry, in listing order:
//!       cancelled? ──> PartiallyCompleted
//!       download   ──error──> Failed
//!        │
//!    Completed
//! ```
//!
//! Every exit path after acquisition releases the lock and then publishes
//! `inProgress = false`. Entries downloaded before a stop stay registered;
//! the rest come back as `not_started` and are picked up by the next run.

use std::borrow::Cow;

use thiserror::Error;
use tracing::{info, warn};

use crate::core::catalog::{fetch_catalog, CatalogEntry, CatalogError};
use crate::core::download::{download_form, DownloadError, DownloadOptions, DownloadedForm};
use crate::core::fetcher::ResourceFetcher;
use crate::core::lock::{ChangeLocks, LockError};
use crate::core::project::Project;
use crate::core::reconcile::{classify, count_by_status, ClassifiedEntry, EntryStatus};
use crate::core::state::{Completion, SyncStates};
use crate::core::store::{LocalCatalogStore, LocalForm, StoreError};

/// Why a sync attempt failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Download of '{form_id}' failed: {source}")]
    Download {
        form_id: String,
        source: DownloadError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lock(#[from] LockError),
}

/// Terminal state of one sync attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Every entry needing a download was downloaded
    Completed,
    /// Cancelled between entries
    PartiallyCompleted,
    Failed(SyncError),
    /// Another sync of the same project held the lock
    LockSkipped,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Completed => "completed",
            SyncOutcome::PartiallyCompleted => "partially_completed",
            SyncOutcome::Failed(_) => "failed",
            SyncOutcome::LockSkipped => "lock_skipped",
        }
    }
}

/// An entry that was downloaded during this attempt
#[derive(Debug, Clone)]
pub struct CompletedEntry {
    pub entry: ClassifiedEntry,
    pub download: DownloadedForm,
}

/// Result of one sync attempt
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub completed: Vec<CompletedEntry>,
    /// Entries that needed a download but were not finished, in listing order
    pub not_started: Vec<ClassifiedEntry>,
    pub up_to_date: Vec<ClassifiedEntry>,
}

impl SyncReport {
    fn empty(outcome: SyncOutcome) -> Self {
        Self {
            outcome,
            completed: Vec::new(),
            not_started: Vec::new(),
            up_to_date: Vec::new(),
        }
    }

    pub fn lock_skipped(&self) -> bool {
        self.outcome == SyncOutcome::LockSkipped
    }

    pub fn error(&self) -> Option<&SyncError> {
        match &self.outcome {
            SyncOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Progress notifications emitted while syncing
#[derive(Debug, Clone, Copy)]
pub enum ProgressEvent<'a> {
    Classified {
        absent: usize,
        stale: usize,
        current: usize,
    },
    Started {
        index: usize,
        total: usize,
        form_id: &'a str,
    },
    Finished {
        index: usize,
        total: usize,
        form_id: &'a str,
        media_changed: bool,
    },
    Failed {
        index: usize,
        total: usize,
        form_id: &'a str,
        error: &'a DownloadError,
    },
}

/// Receives [`ProgressEvent`]s
pub trait SyncProgress {
    fn on_event(&mut self, event: ProgressEvent<'_>);
}

impl SyncProgress for () {
    fn on_event(&mut self, _event: ProgressEvent<'_>) {}
}

impl<F: FnMut(ProgressEvent<'_>)> SyncProgress for F {
    fn on_event(&mut self, event: ProgressEvent<'_>) {
        self(event)
    }
}

/// Result of a delete request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Number of rows soft-deleted
    Deleted(usize),
    LockSkipped,
}

enum Listing<'a> {
    Given(&'a [CatalogEntry]),
    Url(&'a str),
}

/// How the download loop stopped
enum Step {
    Done,
    Cancelled,
    Failed(SyncError),
}

/// Drives sync attempts for any number of projects
#[derive(Debug, Clone, Default)]
pub struct SyncCoordinator {
    locks: ChangeLocks,
    states: SyncStates,
    options: DownloadOptions,
}

impl SyncCoordinator {
    pub fn new(options: DownloadOptions) -> Self {
        Self {
            locks: ChangeLocks::new(),
            states: SyncStates::new(),
            options,
        }
    }

    pub fn states(&self) -> &SyncStates {
        &self.states
    }

    pub fn locks(&self) -> &ChangeLocks {
        &self.locks
    }

    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    /// Sync `project` against an already fetched listing
    pub fn run_sync(
        &self,
        project: &Project,
        remote: &[CatalogEntry],
        fetcher: &dyn ResourceFetcher,
        cancelled: &dyn Fn() -> bool,
        progress: &mut dyn SyncProgress,
    ) -> SyncReport {
        self.sync(project, Listing::Given(remote), fetcher, cancelled, progress)
    }

    /// Fetch the listing at `catalog_url`, then sync against it.
    ///
    /// A listing that cannot be fetched or parsed fails the attempt before
    /// anything is downloaded.
    pub fn sync_with_catalog(
        &self,
        project: &Project,
        catalog_url: &str,
        fetcher: &dyn ResourceFetcher,
        cancelled: &dyn Fn() -> bool,
        progress: &mut dyn SyncProgress,
    ) -> SyncReport {
        self.sync(project, Listing::Url(catalog_url), fetcher, cancelled, progress)
    }

    fn sync(
        &self,
        project: &Project,
        listing: Listing<'_>,
        fetcher: &dyn ResourceFetcher,
        cancelled: &dyn Fn() -> bool,
        progress: &mut dyn SyncProgress,
    ) -> SyncReport {
        let project_id = project.id();

        let guard = match self.locks.try_acquire(project) {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                warn!(project = %project_id, "sync already running, skipping");
                return SyncReport::empty(SyncOutcome::LockSkipped);
            }
            Err(e) => {
                warn!(project = %project_id, error = %e, "could not take change lock");
                return SyncReport::empty(SyncOutcome::Failed(e.into()));
            }
        };
        info!(project = %project_id, "change lock acquired");
        self.states.start(&project_id);

        let (report, completion) =
            self.sync_locked(project, listing, fetcher, cancelled, progress);

        drop(guard);
        self.states.finish(&project_id, completion);

        info!(
            project = %project_id,
            outcome = report.outcome.as_str(),
            completed = report.completed.len(),
            not_started = report.not_started.len(),
            "sync finished"
        );
        report
    }

    fn sync_locked(
        &self,
        project: &Project,
        listing: Listing<'_>,
        fetcher: &dyn ResourceFetcher,
        cancelled: &dyn Fn() -> bool,
        progress: &mut dyn SyncProgress,
    ) -> (SyncReport, Completion) {
        let failed = |error: SyncError| {
            warn!(error = %error, "sync failed before downloading");
            (
                SyncReport::empty(SyncOutcome::Failed(error.clone())),
                Completion::Failed(error),
            )
        };

        let mut store = match LocalCatalogStore::open(project.root()) {
            Ok(store) => store,
            Err(e) => return failed(e.into()),
        };

        let remote: Cow<'_, [CatalogEntry]> = match listing {
            Listing::Given(entries) => Cow::Borrowed(entries),
            Listing::Url(url) => match fetch_catalog(fetcher, url) {
                Ok(entries) => Cow::Owned(entries),
                Err(e) => return failed(e.into()),
            },
        };

        let classified = match classify(&remote, &store, fetcher) {
            Ok(classified) => classified,
            Err(e) => return failed(e.into()),
        };

        let counts = count_by_status(&classified);
        let count = |status: EntryStatus| counts.get(&status).copied().unwrap_or(0);
        progress.on_event(ProgressEvent::Classified {
            absent: count(EntryStatus::Absent),
            stale: count(EntryStatus::Stale),
            current: count(EntryStatus::Current),
        });

        let (mut pending, up_to_date): (Vec<_>, Vec<_>) =
            classified.into_iter().partition(ClassifiedEntry::needs_download);

        let total = pending.len();
        let mut completed = Vec::new();
        let mut next = 0;
        let mut step = Step::Done;

        while next < total {
            if cancelled() {
                info!(remaining = total - next, "sync cancelled");
                step = Step::Cancelled;
                break;
            }

            let item = &pending[next];
            let form_id = item.entry.id.as_str();
            progress.on_event(ProgressEvent::Started {
                index: next,
                total,
                form_id,
            });

            match download_form(project, item, &mut store, fetcher, &self.options) {
                Ok(download) => {
                    progress.on_event(ProgressEvent::Finished {
                        index: next,
                        total,
                        form_id,
                        media_changed: download.media_changed(),
                    });
                    completed.push(CompletedEntry {
                        entry: item.clone(),
                        download,
                    });
                    next += 1;
                }
                Err(error) => {
                    progress.on_event(ProgressEvent::Failed {
                        index: next,
                        total,
                        form_id,
                        error: &error,
                    });
                    warn!(form_id, error = %error, "download failed, stopping sync");
                    step = Step::Failed(SyncError::Download {
                        form_id: form_id.to_string(),
                        source: error,
                    });
                    break;
                }
            }
        }

        let not_started = pending.split_off(next);
        let (outcome, completion) = match step {
            Step::Done => (SyncOutcome::Completed, Completion::Succeeded),
            Step::Cancelled => (SyncOutcome::PartiallyCompleted, Completion::Cancelled),
            Step::Failed(error) => (
                SyncOutcome::Failed(error.clone()),
                Completion::Failed(error),
            ),
        };

        (
            SyncReport {
                outcome,
                completed,
                not_started,
                up_to_date,
            },
            completion,
        )
    }

    /// Classify without downloading anything
    pub fn preview(
        &self,
        project: &Project,
        remote: &[CatalogEntry],
        fetcher: &dyn ResourceFetcher,
    ) -> Result<Vec<ClassifiedEntry>, SyncError> {
        let store = LocalCatalogStore::open(project.root())?;
        Ok(classify(remote, &store, fetcher)?)
    }

    /// Fetch the listing at `catalog_url` and classify it without downloading
    pub fn preview_catalog(
        &self,
        project: &Project,
        catalog_url: &str,
        fetcher: &dyn ResourceFetcher,
    ) -> Result<Vec<ClassifiedEntry>, SyncError> {
        let remote = fetch_catalog(fetcher, catalog_url)?;
        self.preview(project, &remote, fetcher)
    }

    /// Soft-delete one version of a form, or every version when `version` is `None`
    pub fn delete_form(
        &self,
        project: &Project,
        form_id: &str,
        version: Option<&str>,
    ) -> Result<DeleteOutcome, SyncError> {
        let deleted = self.locks.with_lock(project, || -> Result<usize, SyncError> {
            let mut store = LocalCatalogStore::open(project.root())?;
            Ok(store.soft_delete(form_id, version)?)
        })?;

        match deleted {
            Some(deleted) => {
                let deleted = deleted?;
                info!(form_id, version = version.unwrap_or("*"), deleted, "soft-deleted form rows");
                Ok(DeleteOutcome::Deleted(deleted))
            }
            None => {
                warn!(project = %project.id(), form_id, "project is syncing, delete skipped");
                Ok(DeleteOutcome::LockSkipped)
            }
        }
    }

    /// Local form rows, newest first within each id
    pub fn list_forms(
        &self,
        project: &Project,
        include_deleted: bool,
    ) -> Result<Vec<LocalForm>, SyncError> {
        let store = LocalCatalogStore::open(project.root())?;
        Ok(store.all_forms(include_deleted)?)
    }
}
