use std::collections::HashMap;

use chrono::Utc;
use tracing::info;

use crate::models::{AnalysisJob, AnalysisPhase, AnalysisResult, JobStatus, ProgressUpdate};

/// Authoritative record of every analysis the client knows about.
///
/// Jobs are keyed by the engine-assigned id; `file_to_job` points each file at
/// the most recently registered job for it.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: HashMap<String, AnalysisJob>,
    file_to_job: HashMap<String, String>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job: AnalysisJob) {
        info!(
            job_id = %job.id,
            file_path = %job.file_path,
            status = job.status.as_str(),
            "Registered analysis job"
        );
        if let Some(previous) = self
            .file_to_job
            .insert(job.file_path.clone(), job.id.clone())
        {
            if previous != job.id {
                info!(
                    job_id = %job.id,
                    previous_job_id = %previous,
                    "File mapping moved to newer analysis"
                );
            }
        }
        self.jobs.insert(job.id.clone(), job);
    }

    pub fn get(&self, id: &str) -> Option<&AnalysisJob> {
        self.jobs.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.jobs.contains_key(id)
    }

    pub fn job_for_file(&self, file_path: &str) -> Option<&AnalysisJob> {
        self.file_to_job
            .get(file_path)
            .and_then(|id| self.jobs.get(id))
    }

    /// The job currently tracked for `file_path`, if it has not finished.
    pub fn active_job_for_file(&self, file_path: &str) -> Option<&AnalysisJob> {
        self.job_for_file(file_path)
            .filter(|job| !job.status.is_terminal())
    }

    /// Applies a progress update. Returns `false` when the job is unknown or
    /// already terminal; finished jobs are never resurrected.
    pub fn update_progress(&mut self, id: &str, update: ProgressUpdate) -> bool {
        let Some(job) = self.jobs.get_mut(id) else {
            return false;
        };
        if job.status.is_terminal() {
            info!(
                job_id = %id,
                status = job.status.as_str(),
                "Skipping progress update: job finished"
            );
            return false;
        }

        job.status = JobStatus::Running;
        job.progress = update.progress.clamp(0.0, 100.0);
        job.current_step = update.current_step;
        job.phase = update.phase;
        job.updated_at = Utc::now();
        true
    }

    pub fn complete(&mut self, id: &str, result: AnalysisResult) -> bool {
        let Some(job) = self.active_mut(id) else {
            return false;
        };
        job.status = JobStatus::Completed;
        job.progress = 100.0;
        job.current_step = "Analysis complete".to_string();
        job.phase = AnalysisPhase::Done;
        job.result = Some(result);
        job.error = None;
        job.updated_at = Utc::now();

        info!(job_id = %id, "Analysis completed");
        true
    }

    pub fn fail(&mut self, id: &str, message: impl Into<String>) -> bool {
        let message = message.into();
        let Some(job) = self.active_mut(id) else {
            return false;
        };
        job.status = JobStatus::Error;
        job.current_step = "Analysis failed".to_string();
        job.phase = AnalysisPhase::Failed;
        job.error = Some(message.clone());
        job.updated_at = Utc::now();

        info!(job_id = %id, error = %message, "Analysis failed");
        true
    }

    /// Records the local acknowledgment of a stop request.
    pub fn cancel(&mut self, id: &str) -> bool {
        let Some(job) = self.active_mut(id) else {
            return false;
        };
        job.status = JobStatus::Cancelled;
        job.current_step = "Analysis cancelled".to_string();
        job.phase = AnalysisPhase::Cancelled;
        job.updated_at = Utc::now();

        info!(job_id = %id, "Analysis cancelled");
        true
    }

    /// Removes a job. The file mapping is cleared only if it still points here.
    pub fn dismiss(&mut self, id: &str) -> Option<AnalysisJob> {
        let job = self.jobs.remove(id)?;
        if self
            .file_to_job
            .get(&job.file_path)
            .is_some_and(|mapped| mapped == id)
        {
            self.file_to_job.remove(&job.file_path);
        }
        info!(job_id = %id, file_path = %job.file_path, "Dismissed analysis job");
        Some(job)
    }

    pub fn clear_finished(&mut self) -> usize {
        let finished: Vec<String> = self
            .jobs
            .values()
            .filter(|job| job.status.is_terminal())
            .map(|job| job.id.clone())
            .collect();
        for id in &finished {
            self.dismiss(id);
        }
        finished.len()
    }

    /// All jobs, oldest first.
    pub fn jobs(&self) -> Vec<AnalysisJob> {
        let mut jobs: Vec<AnalysisJob> = self.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    pub fn running_jobs(&self) -> Vec<AnalysisJob> {
        self.jobs()
            .into_iter()
            .filter(|job| !job.status.is_terminal())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn active_mut(&mut self, id: &str) -> Option<&mut AnalysisJob> {
        self.jobs
            .get_mut(id)
            .filter(|job| !job.status.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn running(id: &str, file: &str) -> AnalysisJob {
        AnalysisJob::new(id, file, JobStatus::Running)
    }

    fn update(progress: f64, step: &str) -> ProgressUpdate {
        ProgressUpdate {
            progress,
            current_step: step.to_string(),
            phase: AnalysisPhase::derive(JobStatus::Running, progress),
        }
    }

    #[test]
    fn register_maps_file_to_latest_job() {
        let mut registry = JobRegistry::new();
        registry.register(running("J1", "a.edf"));
        registry.register(running("J2", "a.edf"));

        assert_eq!(registry.job_for_file("a.edf").map(|j| j.id.as_str()), Some("J2"));
        assert!(registry.contains("J1"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn progress_is_ignored_after_terminal_state() {
        let mut registry = JobRegistry::new();
        registry.register(running("J1", "a.edf"));
        assert!(registry.update_progress("J1", update(30.0, "Filtering")));
        assert!(registry.complete("J1", json!({"channels": 4})));

        assert!(!registry.update_progress("J1", update(50.0, "Late")));
        let job = registry.get("J1").expect("job");
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100.0);
        assert_eq!(job.current_step, "Analysis complete");
    }

    #[test]
    fn terminal_transitions_apply_once() {
        let mut registry = JobRegistry::new();
        registry.register(running("J1", "a.edf"));

        assert!(registry.fail("J1", "engine crashed"));
        assert!(!registry.fail("J1", "second failure"));
        assert!(!registry.complete("J1", json!({})));
        assert!(!registry.cancel("J1"));

        let job = registry.get("J1").expect("job");
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error.as_deref(), Some("engine crashed"));
        assert!(job.result.is_none());
    }

    #[test]
    fn cancelled_is_terminal() {
        let mut registry = JobRegistry::new();
        registry.register(AnalysisJob::new("J1", "a.edf", JobStatus::Pending));

        assert!(registry.cancel("J1"));
        assert!(!registry.update_progress("J1", update(10.0, "Late")));
        assert!(!registry.complete("J1", json!({})));
        assert_eq!(registry.get("J1").map(|j| j.status), Some(JobStatus::Cancelled));
        assert!(registry.active_job_for_file("a.edf").is_none());
    }

    #[test]
    fn progress_moves_pending_to_running_and_clamps() {
        let mut registry = JobRegistry::new();
        registry.register(AnalysisJob::new("J1", "a.edf", JobStatus::Pending));

        assert!(registry.update_progress("J1", update(140.0, "Overshoot")));
        let job = registry.get("J1").expect("job");
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.progress, 100.0);
    }

    #[test]
    fn dismiss_keeps_newer_file_mapping() {
        let mut registry = JobRegistry::new();
        registry.register(running("J1", "a.edf"));
        registry.register(running("J2", "a.edf"));

        assert!(registry.dismiss("J1").is_some());
        assert_eq!(registry.job_for_file("a.edf").map(|j| j.id.as_str()), Some("J2"));

        assert!(registry.dismiss("J2").is_some());
        assert!(registry.job_for_file("a.edf").is_none());
        assert!(registry.dismiss("J2").is_none());
    }

    #[test]
    fn clear_finished_keeps_running_jobs() {
        let mut registry = JobRegistry::new();
        registry.register(running("J1", "a.edf"));
        registry.register(running("J2", "b.edf"));
        registry.register(running("J3", "c.edf"));
        registry.complete("J1", json!({}));
        registry.cancel("J3");

        assert_eq!(registry.clear_finished(), 2);
        let ids: Vec<String> = registry.jobs().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec!["J2".to_string()]);
        assert_eq!(registry.running_jobs().len(), 1);
    }
}
