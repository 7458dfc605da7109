use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Opaque analysis request forwarded to the engine untouched.
pub type AnalysisRequest = Value;

/// Full result payload returned by the engine for a completed analysis.
pub type AnalysisResult = Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisPhase {
    Queued,
    Preprocessing,
    Computing,
    Finalizing,
    Done,
    Failed,
    Cancelled,
}

impl AnalysisPhase {
    pub fn derive(status: JobStatus, progress: f64) -> Self {
        match status {
            JobStatus::Completed => Self::Done,
            JobStatus::Error => Self::Failed,
            JobStatus::Cancelled => Self::Cancelled,
            JobStatus::Pending => Self::Queued,
            JobStatus::Running => {
                if progress <= 0.0 {
                    Self::Queued
                } else if progress < 25.0 {
                    Self::Preprocessing
                } else if progress < 90.0 {
                    Self::Computing
                } else {
                    Self::Finalizing
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisJob {
    pub id: String,
    pub file_path: String,
    pub status: JobStatus,
    pub progress: f64,
    pub current_step: String,
    pub phase: AnalysisPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisJob {
    pub fn new(id: impl Into<String>, file_path: impl Into<String>, status: JobStatus) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            file_path: file_path.into(),
            status,
            progress: 0.0,
            current_step: "Starting analysis".to_string(),
            phase: AnalysisPhase::derive(status, 0.0),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EngineEventStatus {
    Running,
    Completed,
    Error,
}

/// Payload delivered on the engine's event channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineEvent {
    pub analysis_id: String,
    pub status: EngineEventStatus,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
}

impl EngineEvent {
    pub fn running(analysis_id: impl Into<String>, progress: f64, message: impl Into<String>) -> Self {
        Self {
            analysis_id: analysis_id.into(),
            status: EngineEventStatus::Running,
            progress: Some(progress),
            message: Some(message.into()),
        }
    }

    pub fn completed(analysis_id: impl Into<String>) -> Self {
        Self {
            analysis_id: analysis_id.into(),
            status: EngineEventStatus::Completed,
            progress: Some(100.0),
            message: None,
        }
    }

    pub fn error(analysis_id: impl Into<String>, message: Option<String>) -> Self {
        Self {
            analysis_id: analysis_id.into(),
            status: EngineEventStatus::Error,
            progress: None,
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub progress: f64,
    pub current_step: String,
    pub phase: AnalysisPhase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAnalysisRequest {
    pub file_path: String,
    #[serde(default)]
    pub spec: AnalysisRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StartAnalysisResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StartAnalysisResponse {
    pub fn started(analysis_id: String) -> Self {
        Self {
            success: true,
            analysis_id: Some(analysis_id),
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            analysis_id: None,
            error: Some(error.into()),
        }
    }
}

/// Window of raw signal data requested from the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRequest {
    pub file_path: String,
    pub start_sample: u64,
    pub sample_count: u64,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub preprocessing: Value,
}

/// Downsampled whole-file view requested from the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OverviewRequest {
    pub file_path: String,
    #[serde(default)]
    pub channels: Vec<String>,
    pub max_points: usize,
}

/// Per-file read model consumed by views bound to a single file.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileAnalysisView {
    pub analysis_id: Option<String>,
    pub is_submitting: bool,
    pub is_running: bool,
    pub is_completed: bool,
    pub has_error: bool,
    pub is_cancelled: bool,
    pub progress: f64,
    pub current_step: Option<String>,
    pub phase: Option<AnalysisPhase>,
    pub result: Option<AnalysisResult>,
    pub error: Option<String>,
}

impl FileAnalysisView {
    pub fn from_job(job: &AnalysisJob, is_submitting: bool) -> Self {
        Self {
            analysis_id: Some(job.id.clone()),
            is_submitting,
            is_running: matches!(job.status, JobStatus::Pending | JobStatus::Running),
            is_completed: job.status == JobStatus::Completed,
            has_error: job.status == JobStatus::Error,
            is_cancelled: job.status == JobStatus::Cancelled,
            progress: job.progress,
            current_step: Some(job.current_step.clone()),
            phase: Some(job.phase),
            result: job.result.clone(),
            error: job.error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GlobalAnalysisView {
    pub all_jobs: Vec<AnalysisJob>,
    pub running_jobs: Vec<AnalysisJob>,
    pub is_running: bool,
    pub submitting_for_file: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub analysis_id: String,
    pub file_path: String,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub chunk_entries: usize,
    pub chunk_loading: usize,
    pub overview_entries: usize,
    pub overview_loading: usize,
}
