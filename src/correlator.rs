use std::{sync::Arc, time::Instant};

use tracing::{debug, info, warn};

use crate::{
    engine::AnalysisEngine,
    models::{AnalysisPhase, EngineEvent, EngineEventStatus, JobStatus, ProgressUpdate},
    notify::{failure_notification, notify_best_effort, success_notification, Notifier},
    state::{CoordinationState, SharedState},
};

pub const DEFAULT_ENGINE_FAILURE: &str = "Analysis failed";
pub const RESULT_UNAVAILABLE: &str = "Analysis completed but result unavailable";

/// Work left over after an event has been applied under the state lock.
#[derive(Debug, Clone, PartialEq)]
pub enum FollowUp {
    FetchResult {
        analysis_id: String,
        file_path: String,
    },
    NotifyFailure {
        analysis_id: String,
        file_path: String,
        message: String,
    },
}

/// Applies one engine event to the coordination state.
///
/// Events for unknown ids are buffered. Everything that needs the engine or
/// the notifier is returned as a [`FollowUp`] so the caller can run it after
/// releasing the lock.
pub fn route_event(
    state: &mut CoordinationState,
    event: EngineEvent,
    now: Instant,
) -> Option<FollowUp> {
    let Some(job) = state.registry.get(&event.analysis_id) else {
        state.buffer.buffer(event, now);
        return None;
    };
    let file_path = job.file_path.clone();

    if job.status.is_terminal() {
        debug!(
            job_id = %event.analysis_id,
            status = job.status.as_str(),
            "Ignoring event for finished analysis"
        );
        return None;
    }

    match event.status {
        EngineEventStatus::Running => {
            if state.is_fetching_result(&event.analysis_id) {
                return None;
            }
            let progress = event.progress.unwrap_or(job.progress);
            let update = ProgressUpdate {
                progress,
                current_step: event
                    .message
                    .clone()
                    .unwrap_or_else(|| job.current_step.clone()),
                phase: AnalysisPhase::derive(JobStatus::Running, progress),
            };
            state.registry.update_progress(&event.analysis_id, update);
            None
        }
        EngineEventStatus::Completed => {
            if !state.begin_result_fetch(&event.analysis_id) {
                debug!(job_id = %event.analysis_id, "Result fetch already in flight");
                return None;
            }
            info!(job_id = %event.analysis_id, "Engine reported completion, fetching result");
            Some(FollowUp::FetchResult {
                analysis_id: event.analysis_id,
                file_path,
            })
        }
        EngineEventStatus::Error => {
            let message = event
                .message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ENGINE_FAILURE.to_string());
            if !state.registry.fail(&event.analysis_id, message.clone()) {
                return None;
            }
            state.set_busy(false);
            Some(FollowUp::NotifyFailure {
                analysis_id: event.analysis_id,
                file_path,
                message,
            })
        }
    }
}

#[derive(Clone)]
pub struct EventCorrelator {
    state: SharedState,
    engine: Arc<dyn AnalysisEngine>,
    notifier: Arc<dyn Notifier>,
}

impl EventCorrelator {
    pub fn new(
        state: SharedState,
        engine: Arc<dyn AnalysisEngine>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            state,
            engine,
            notifier,
        }
    }

    pub async fn route(&self, event: EngineEvent) -> Option<FollowUp> {
        let mut state = self.state.write().await;
        route_event(&mut state, event, Instant::now())
    }

    /// Routes an event and runs its follow-up to completion.
    pub async fn handle_event(&self, event: EngineEvent) {
        if let Some(follow_up) = self.route(event).await {
            self.run_follow_up(follow_up).await;
        }
    }

    pub async fn run_follow_up(&self, follow_up: FollowUp) {
        match follow_up {
            FollowUp::FetchResult {
                analysis_id,
                file_path,
            } => self.finish_completed(&analysis_id, &file_path).await,
            FollowUp::NotifyFailure {
                analysis_id,
                file_path,
                message,
            } => notify_best_effort(
                self.notifier.as_ref(),
                failure_notification(&analysis_id, &file_path, &message),
            ),
        }
    }

    async fn finish_completed(&self, analysis_id: &str, file_path: &str) {
        let fetched = self.engine.fetch_result(analysis_id).await;

        let failure = {
            let mut state = self.state.write().await;
            state.end_result_fetch(analysis_id);
            state.set_busy(false);

            match fetched {
                Ok(Some(result)) => {
                    if !state.registry.complete(analysis_id, result) {
                        return;
                    }
                    None
                }
                Ok(None) => {
                    warn!(job_id = %analysis_id, "Engine returned no result for completed analysis");
                    if !state.registry.fail(analysis_id, RESULT_UNAVAILABLE) {
                        return;
                    }
                    Some(RESULT_UNAVAILABLE.to_string())
                }
                Err(err) => {
                    warn!(job_id = %analysis_id, "Failed to fetch analysis result: {err}");
                    let message = format!("{RESULT_UNAVAILABLE}: {}", err.user_message());
                    if !state.registry.fail(analysis_id, message.clone()) {
                        return;
                    }
                    Some(message)
                }
            }
        };

        let notification = match failure {
            None => success_notification(analysis_id, file_path),
            Some(message) => failure_notification(analysis_id, file_path, &message),
        };
        notify_best_effort(self.notifier.as_ref(), notification);
    }
}
