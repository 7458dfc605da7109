use std::{collections::HashSet, sync::Arc, time::Duration};

use tokio::sync::RwLock;
use tracing::info;

use crate::{buffer::EventBuffer, registry::JobRegistry};

pub type SharedState = Arc<RwLock<CoordinationState>>;

/// Everything the submission path and the event path both touch.
///
/// Registry and buffer live behind one lock so that "is this id registered,
/// otherwise buffer it" and "register, then drain and replay" can never
/// interleave.
#[derive(Debug)]
pub struct CoordinationState {
    pub registry: JobRegistry,
    pub buffer: EventBuffer,
    pending_submissions: HashSet<String>,
    submitting_for_file: Option<String>,
    busy: bool,
    fetching_results: HashSet<String>,
}

impl CoordinationState {
    pub fn new(buffer_ttl: Duration) -> Self {
        Self {
            registry: JobRegistry::new(),
            buffer: EventBuffer::new(buffer_ttl),
            pending_submissions: HashSet::new(),
            submitting_for_file: None,
            busy: false,
            fetching_results: HashSet::new(),
        }
    }

    pub fn shared(buffer_ttl: Duration) -> SharedState {
        Arc::new(RwLock::new(Self::new(buffer_ttl)))
    }

    /// Marks a submission as in flight for `file_path` and locks the UI.
    ///
    /// Refuses when the file already has a submission in flight or an
    /// unfinished job, so a file never ends up with two competing ids.
    pub fn begin_submission(&mut self, file_path: &str) -> Result<(), String> {
        if self.pending_submissions.contains(file_path) {
            return Err(format!("An analysis is already being submitted for {file_path}"));
        }
        if let Some(job) = self.registry.active_job_for_file(file_path) {
            return Err(format!(
                "Analysis {} is still running for {file_path}",
                job.id
            ));
        }

        self.submitting_for_file = Some(file_path.to_string());
        self.busy = true;
        self.pending_submissions.insert(file_path.to_string());
        Ok(())
    }

    /// Clears the pending marker and the submitting slot for `file_path`.
    pub fn end_submission(&mut self, file_path: &str) {
        self.pending_submissions.remove(file_path);
        if self.submitting_for_file.as_deref() == Some(file_path) {
            self.submitting_for_file = None;
        }
    }

    pub fn is_submitting(&self, file_path: &str) -> bool {
        self.pending_submissions.contains(file_path)
    }

    pub fn submitting_for_file(&self) -> Option<&str> {
        self.submitting_for_file.as_deref()
    }

    pub fn busy(&self) -> bool {
        self.busy
    }

    pub fn set_busy(&mut self, busy: bool) {
        if self.busy != busy {
            info!(busy, "Analysis busy flag changed");
        }
        self.busy = busy;
    }

    /// Claims the result fetch for `analysis_id`. Returns `false` when a
    /// fetch is already running, which happens on duplicate completion events.
    pub fn begin_result_fetch(&mut self, analysis_id: &str) -> bool {
        self.fetching_results.insert(analysis_id.to_string())
    }

    pub fn end_result_fetch(&mut self, analysis_id: &str) {
        self.fetching_results.remove(analysis_id);
    }

    pub fn is_fetching_result(&self, analysis_id: &str) -> bool {
        self.fetching_results.contains(analysis_id)
    }
}
