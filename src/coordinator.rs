use std::{sync::Arc, time::Instant};

use tracing::{info, warn};

use crate::{
    correlator::{route_event, EventCorrelator},
    engine::AnalysisEngine,
    models::{AnalysisJob, AnalysisRequest, JobStatus, StartAnalysisResponse},
    state::SharedState,
};

/// Guards the window between "start requested" and "job id known".
#[derive(Clone)]
pub struct SubmissionCoordinator {
    state: SharedState,
    engine: Arc<dyn AnalysisEngine>,
    correlator: EventCorrelator,
}

impl SubmissionCoordinator {
    pub fn new(
        state: SharedState,
        engine: Arc<dyn AnalysisEngine>,
        correlator: EventCorrelator,
    ) -> Self {
        Self {
            state,
            engine,
            correlator,
        }
    }

    pub async fn start(&self, file_path: &str, spec: &AnalysisRequest) -> StartAnalysisResponse {
        if let Err(reason) = self.state.write().await.begin_submission(file_path) {
            warn!(file_path = %file_path, "Rejected analysis submission: {reason}");
            return StartAnalysisResponse::rejected(reason);
        }
        info!(file_path = %file_path, "Submitting analysis");

        let submitted = self.engine.submit_job(file_path, spec).await;

        let (analysis_id, follow_ups) = {
            let mut state = self.state.write().await;
            state.end_submission(file_path);

            let job = match submitted {
                Ok(job) => job,
                Err(err) => {
                    state.set_busy(false);
                    warn!(file_path = %file_path, "Analysis submission failed: {err}");
                    return StartAnalysisResponse::rejected(err.user_message());
                }
            };

            state
                .registry
                .register(AnalysisJob::new(job.id.clone(), file_path, JobStatus::Running));

            let now = Instant::now();
            let buffered = state.buffer.drain(&job.id, now);
            if !buffered.is_empty() {
                info!(
                    job_id = %job.id,
                    events = buffered.len(),
                    "Replaying events received before registration"
                );
            }
            let follow_ups: Vec<_> = buffered
                .into_iter()
                .filter_map(|event| route_event(&mut state, event, now))
                .collect();
            (job.id, follow_ups)
        };

        for follow_up in follow_ups {
            self.correlator.run_follow_up(follow_up).await;
        }

        StartAnalysisResponse::started(analysis_id)
    }

    /// Sends a best-effort stop request and, if the engine acknowledges it,
    /// marks the job cancelled locally.
    pub async fn cancel(&self, analysis_id: &str) -> bool {
        {
            let state = self.state.read().await;
            match state.registry.get(analysis_id) {
                Some(job) if !job.status.is_terminal() => {}
                Some(_) => return false,
                None => {
                    warn!(job_id = %analysis_id, "Cancel requested for unknown analysis");
                    return false;
                }
            }
        }

        let acknowledged = match self.engine.cancel_job().await {
            Ok(outcome) => outcome.success,
            Err(err) => {
                warn!(job_id = %analysis_id, "Cancel request failed: {err}");
                false
            }
        };
        if !acknowledged {
            return false;
        }

        let mut state = self.state.write().await;
        let cancelled = state.registry.cancel(analysis_id);
        if cancelled {
            state.set_busy(false);
        }
        cancelled
    }
}
