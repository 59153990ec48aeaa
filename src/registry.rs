// In-memory job registry: per-session progress and cancellation flags
//
// The single shared mutable resource in the process. The orchestrator writes
// progress and reads the cancel flag, the cancel endpoint writes the flag,
// and the streamer reads progress and eventually clears the entry. No
// operation spans more than one lock acquisition; check-then-set races
// between a finishing job and a late cancel are accepted and handled by the
// orchestrator's post-fetch re-check.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::downloader::models::JobProgress;

#[derive(Default)]
pub struct JobRegistry {
    progress: Mutex<HashMap<String, JobProgress>>,
    cancelled: Mutex<HashSet<String>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh job for this session: a leftover cancel flag or
    /// terminal progress entry from a previous job must not leak into it.
    pub fn begin(&self, session_id: &str) {
        self.cancelled.lock().remove(session_id);
        self.progress.lock().remove(session_id);
    }

    /// Last write wins; no history is retained.
    pub fn set_progress(&self, session_id: &str, progress: JobProgress) {
        self.progress
            .lock()
            .insert(session_id.to_string(), progress);
    }

    /// Absence means "no update available", not an error: the session may
    /// not have started yet or may already have been cleared.
    pub fn get_progress(&self, session_id: &str) -> Option<JobProgress> {
        self.progress.lock().get(session_id).cloned()
    }

    pub fn clear(&self, session_id: &str) {
        self.progress.lock().remove(session_id);
        self.cancelled.lock().remove(session_id);
    }

    /// Reclaim only the progress entry. A pending cancel flag survives so a
    /// still-running job keeps seeing it.
    pub fn clear_progress(&self, session_id: &str) {
        self.progress.lock().remove(session_id);
    }

    /// Monotonic within a job: once set the flag stays set until the next
    /// `begin`/`clear` for this session. Idempotent.
    pub fn request_cancel(&self, session_id: &str) {
        self.cancelled.lock().insert(session_id.to_string());
    }

    pub fn is_cancelled(&self, session_id: &str) -> bool {
        self.cancelled.lock().contains(session_id)
    }
}
