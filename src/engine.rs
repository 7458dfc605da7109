use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::Command;

use crate::{
    error::EngineError,
    models::{AnalysisRequest, AnalysisResult, ChunkRequest, OverviewRequest},
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobRequest<'a> {
    pub file_path: &'a str,
    pub spec: &'a AnalysisRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedJob {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOutcome {
    pub success: bool,
}

/// Operations the compute engine exposes to the coordinator.
///
/// Progress and completion are not returned here; they arrive separately on
/// the event channel and are handled by the correlator.
#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    async fn submit_job(
        &self,
        file_path: &str,
        spec: &AnalysisRequest,
    ) -> Result<SubmittedJob, EngineError>;

    /// `Ok(None)` means the engine has no result for the id after all.
    async fn fetch_result(&self, analysis_id: &str)
        -> Result<Option<AnalysisResult>, EngineError>;

    /// Best-effort stop request for the running analysis.
    async fn cancel_job(&self) -> Result<CancelOutcome, EngineError>;

    async fn fetch_chunk(&self, request: &ChunkRequest) -> Result<Value, EngineError>;

    async fn fetch_overview(&self, request: &OverviewRequest) -> Result<Value, EngineError>;
}

#[derive(Debug, Clone)]
pub struct HttpEngineClient {
    base_url: String,
    token: Option<String>,
}

impl HttpEngineClient {
    pub fn new(base_url: String, token: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    async fn call(&self, method: &str, path: &str, body: Option<String>) -> Result<Value, EngineError> {
        let url = format!("{}{}", self.base_url, path);
        let reply = execute_curl(method, &url, self.token.as_deref(), body)
            .await
            .map_err(|err| EngineError::Transport(format!("{err:#}")))?;
        let parsed = decode_reply(&reply)?;
        reject_if_error(&parsed)?;
        Ok(parsed)
    }

    async fn post_json<T: Serialize + Sync>(&self, path: &str, payload: &T) -> Result<Value, EngineError> {
        let body = serde_json::to_string(payload)
            .map_err(|err| EngineError::Decode(format!("failed to encode request for {path}: {err}")))?;
        self.call("POST", path, Some(body)).await
    }
}

#[async_trait]
impl AnalysisEngine for HttpEngineClient {
    async fn submit_job(
        &self,
        file_path: &str,
        spec: &AnalysisRequest,
    ) -> Result<SubmittedJob, EngineError> {
        let parsed = self
            .post_json("/analyses", &SubmitJobRequest { file_path, spec })
            .await?;
        serde_json::from_value::<SubmittedJob>(parsed)
            .map_err(|err| EngineError::Decode(format!("submit response: {err}")))
    }

    async fn fetch_result(
        &self,
        analysis_id: &str,
    ) -> Result<Option<AnalysisResult>, EngineError> {
        let parsed = self
            .call("GET", &format!("/analyses/{analysis_id}/result"), None)
            .await?;
        if parsed.is_null() {
            return Ok(None);
        }
        Ok(Some(parsed))
    }

    async fn cancel_job(&self) -> Result<CancelOutcome, EngineError> {
        let parsed = self.call("POST", "/cancel", None).await?;
        serde_json::from_value::<CancelOutcome>(parsed)
            .map_err(|err| EngineError::Decode(format!("cancel response: {err}")))
    }

    async fn fetch_chunk(&self, request: &ChunkRequest) -> Result<Value, EngineError> {
        self.post_json("/chunks", request).await
    }

    async fn fetch_overview(&self, request: &OverviewRequest) -> Result<Value, EngineError> {
        self.post_json("/overviews", request).await
    }
}

fn reject_if_error(payload: &Value) -> Result<(), EngineError> {
    let Some(error) = payload.get("error") else {
        return Ok(());
    };
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| error.as_str())
        .unwrap_or("Engine returned an error")
        .to_string();
    Err(EngineError::Rejected(message))
}

/// Raw engine reply: HTTP status plus the untouched body text.
#[derive(Debug)]
struct EngineReply {
    status: u16,
    body: String,
}

/// Turns a reply into JSON. Non-2xx statuses are engine rejections, carrying
/// the engine's error message when the body has one.
fn decode_reply(reply: &EngineReply) -> Result<Value, EngineError> {
    let body = reply.body.trim();
    let parsed = if body.is_empty() {
        Ok(Value::Null)
    } else {
        serde_json::from_str::<Value>(body)
    };

    if !(200..300).contains(&reply.status) {
        if let Ok(payload) = &parsed {
            reject_if_error(payload)?;
        }
        return Err(EngineError::Rejected(format!(
            "engine answered HTTP {}",
            reply.status
        )));
    }

    parsed.map_err(|err| EngineError::Decode(format!("{err}: {body}")))
}

/// Splits curl output produced with `-w "\n%{http_code}"`.
fn split_status_line(stdout: &str) -> Result<EngineReply> {
    let (body, code) = stdout
        .rsplit_once('\n')
        .unwrap_or(("", stdout));
    let status = code
        .trim()
        .parse::<u16>()
        .with_context(|| format!("Missing HTTP status in curl output: {}", code.trim()))?;
    Ok(EngineReply {
        status,
        body: body.to_string(),
    })
}

async fn execute_curl(
    method: &str,
    url: &str,
    token: Option<&str>,
    body: Option<String>,
) -> Result<EngineReply> {
    let mut command = Command::new("curl");
    command
        .arg("-sS")
        .arg("-w")
        .arg("\n%{http_code}")
        .arg("-X")
        .arg(method)
        .arg(url)
        .arg("-H")
        .arg("Content-Type: application/json");

    if let Some(token) = token {
        command
            .arg("-H")
            .arg(format!("Authorization: Bearer {}", token));
    }

    if let Some(body) = body {
        command.arg("-d").arg(body);
    }

    let output = command
        .output()
        .await
        .with_context(|| format!("Failed to execute curl for {}", url))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("Engine unreachable at {}: {}", url, stderr.trim());
    }

    let stdout = String::from_utf8(output.stdout).context("Engine response was not valid UTF-8")?;
    split_status_line(&stdout)
}
