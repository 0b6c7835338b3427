//! Observable per-project sync state
//!
//! The coordinator owns one [`SyncStates`] handle and shares clones of it
//! with whoever wants to watch progress. Every change is pushed to
//! subscribers over an mpsc channel; disconnected subscribers are dropped.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::core::coordinator::SyncError;

/// Sync state of one project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncState {
    pub in_progress: bool,
    #[serde(serialize_with = "serialize_error")]
    pub last_error: Option<SyncError>,
}

fn serialize_error<S: serde::Serializer>(
    error: &Option<SyncError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

/// A state transition pushed to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStateChange {
    pub project_id: String,
    pub state: SyncState,
}

/// How a sync attempt that held the lock ended
#[derive(Debug, Clone)]
pub(crate) enum Completion {
    Succeeded,
    Cancelled,
    Failed(SyncError),
}

#[derive(Debug, Default)]
struct Inner {
    states: HashMap<String, SyncState>,
    subscribers: Vec<Sender<SyncStateChange>>,
}

/// Keyed store of sync states
#[derive(Debug, Clone, Default)]
pub struct SyncStates {
    inner: Arc<Mutex<Inner>>,
}

impl SyncStates {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current state of a project; unknown projects are idle with no error
    pub fn get(&self, project_id: &str) -> SyncState {
        self.inner()
            .states
            .get(project_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Receive every subsequent state change, for all projects
    pub fn subscribe(&self) -> Receiver<SyncStateChange> {
        let (tx, rx) = mpsc::channel();
        self.inner().subscribers.push(tx);
        rx
    }

    /// Forget the last surfaced error of a project
    pub fn clear_error(&self, project_id: &str) {
        self.update(project_id, |state| state.last_error = None);
    }

    pub(crate) fn start(&self, project_id: &str) {
        self.update(project_id, |state| state.in_progress = true);
    }

    pub(crate) fn finish(&self, project_id: &str, completion: Completion) {
        self.update(project_id, |state| {
            state.in_progress = false;
            match completion {
                Completion::Succeeded => state.last_error = None,
                Completion::Cancelled => {}
                Completion::Failed(error) => state.last_error = Some(error),
            }
        });
    }

    fn update(&self, project_id: &str, f: impl FnOnce(&mut SyncState)) {
        let mut inner = self.inner();
        let state = inner.states.entry(project_id.to_string()).or_default();
        let before = state.clone();
        f(state);
        if *state == before {
            return;
        }

        let change = SyncStateChange {
            project_id: project_id.to_string(),
            state: state.clone(),
        };
        inner
            .subscribers
            .retain(|tx| tx.send(change.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::CatalogError;

    fn catalog_failure() -> SyncError {
        SyncError::Catalog(CatalogError::NotOpenRosaServer {
            url: "forms.json".to_string(),
        })
    }

    #[test]
    fn test_unknown_project_is_idle() {
        let states = SyncStates::new();
        assert_eq!(states.get("p"), SyncState::default());
    }

    #[test]
    fn test_lifecycle() {
        let states = SyncStates::new();
        states.start("p");
        assert!(states.get("p").in_progress);

        states.finish("p", Completion::Failed(catalog_failure()));
        let state = states.get("p");
        assert!(!state.in_progress);
        assert_eq!(state.last_error, Some(catalog_failure()));

        // A cancelled run leaves the surfaced error in place
        states.start("p");
        states.finish("p", Completion::Cancelled);
        assert_eq!(states.get("p").last_error, Some(catalog_failure()));

        states.clear_error("p");
        assert_eq!(states.get("p").last_error, None);

        states.finish("p", Completion::Failed(catalog_failure()));
        states.finish("p", Completion::Succeeded);
        assert_eq!(states.get("p").last_error, None);
    }

    #[test]
    fn test_subscribers_see_changes() {
        let states = SyncStates::new();
        let rx = states.subscribe();

        states.start("p");
        states.start("p"); // no change, no event
        states.finish("p", Completion::Succeeded);

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert!(events[0].state.in_progress);
        assert!(!events[1].state.in_progress);
        assert_eq!(events[1].project_id, "p");
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let states = SyncStates::new();
        drop(states.subscribe());
        states.start("p");
        assert!(states.inner().subscribers.is_empty());
    }
}
