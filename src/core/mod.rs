//! Core module - reconciliation, download and sync engine

pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod download;
pub mod draft;
pub mod entities;
pub mod fetcher;
pub mod hashing;
pub mod lock;
pub mod media;
pub mod project;
pub mod reconcile;
pub mod state;
pub mod store;

pub use catalog::{CatalogEntry, CatalogError, ManifestEntry, ResourceKind};
pub use config::Config;
pub use coordinator::{
    CompletedEntry, DeleteOutcome, ProgressEvent, SyncCoordinator, SyncError, SyncOutcome,
    SyncProgress, SyncReport,
};
pub use download::{DownloadError, DownloadOptions, DownloadedForm};
pub use fetcher::{FetchError, LocalDirFetcher, MemoryFetcher, ResourceFetcher};
pub use hashing::ContentHash;
pub use lock::{ChangeLockGuard, ChangeLocks, LockError};
pub use project::{Project, ProjectError};
pub use reconcile::{ClassifiedEntry, EntryStatus};
pub use state::{SyncState, SyncStateChange, SyncStates};
pub use store::{LocalCatalogStore, LocalForm, SharedResourceKey, StoreError};
