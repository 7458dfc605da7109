#![allow(dead_code)]

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use analysis_coordinator::{
    engine::{AnalysisEngine, CancelOutcome, SubmittedJob},
    error::EngineError,
    models::{AnalysisRequest, AnalysisResult, ChunkRequest, OverviewRequest},
    AnalysisService, Config,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::oneshot;

type SubmitOutcome = Result<SubmittedJob, EngineError>;

/// Engine double whose submit call stays open until the test resolves it.
#[derive(Default)]
pub struct ScriptedEngine {
    submit_gates: tokio::sync::Mutex<Vec<oneshot::Receiver<SubmitOutcome>>>,
    results: Mutex<HashMap<String, Result<Option<Value>, EngineError>>>,
    pub submits: AtomicUsize,
    pub fetches: AtomicUsize,
    pub page_fetches: AtomicUsize,
}

impl ScriptedEngine {
    /// Queues the next submit call; resolve it through the returned sender.
    pub async fn hold_next_submit(&self) -> oneshot::Sender<SubmitOutcome> {
        let (tx, rx) = oneshot::channel();
        self.submit_gates.lock().await.push(rx);
        tx
    }

    pub async fn accept_next_submit(&self, id: &str) {
        let tx = self.hold_next_submit().await;
        let _ = tx.send(Ok(SubmittedJob { id: id.to_string() }));
    }

    pub fn set_result(&self, id: &str, result: Result<Option<Value>, EngineError>) {
        self.results.lock().unwrap().insert(id.to_string(), result);
    }
}

#[async_trait]
impl AnalysisEngine for ScriptedEngine {
    async fn submit_job(
        &self,
        _file_path: &str,
        _spec: &AnalysisRequest,
    ) -> Result<SubmittedJob, EngineError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        let gate = {
            let mut gates = self.submit_gates.lock().await;
            if gates.is_empty() {
                None
            } else {
                Some(gates.remove(0))
            }
        };
        let Some(gate) = gate else {
            return Err(EngineError::Rejected("no submission scripted".to_string()));
        };
        gate.await
            .unwrap_or_else(|_| Err(EngineError::Transport("gate dropped".to_string())))
    }

    async fn fetch_result(
        &self,
        analysis_id: &str,
    ) -> Result<Option<AnalysisResult>, EngineError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.results
            .lock()
            .unwrap()
            .remove(analysis_id)
            .unwrap_or(Ok(None))
    }

    async fn cancel_job(&self) -> Result<CancelOutcome, EngineError> {
        Ok(CancelOutcome { success: true })
    }

    /// Echoes the window so tests can tell pages apart.
    async fn fetch_chunk(&self, request: &ChunkRequest) -> Result<Value, EngineError> {
        self.page_fetches.fetch_add(1, Ordering::SeqCst);
        if request.file_path == "unreadable.edf" {
            return Err(EngineError::Rejected("file not readable".to_string()));
        }
        Ok(json!({
            "filePath": request.file_path,
            "startSample": request.start_sample,
            "samples": vec![0.0; request.sample_count.min(4) as usize],
        }))
    }

    async fn fetch_overview(&self, request: &OverviewRequest) -> Result<Value, EngineError> {
        self.page_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(json!({
            "filePath": request.file_path,
            "points": request.max_points,
        }))
    }
}

pub fn service_with(engine: Arc<ScriptedEngine>) -> Arc<AnalysisService> {
    let service = Arc::new(AnalysisService::new(Config::default(), engine));
    assert!(service.attach_listener());
    service
}

/// Polls `condition` until it holds or two seconds pass.
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
