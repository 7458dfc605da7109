mod common;

use std::sync::{atomic::Ordering, Arc};

use analysis_coordinator::api;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use common::{service_with, wait_until, ScriptedEngine};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => builder.body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request");

    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

#[tokio::test]
async fn start_then_complete_over_http() {
    let engine = Arc::new(ScriptedEngine::default());
    let service = service_with(engine.clone());
    let app = api::router(service.clone());

    engine.accept_next_submit("J1").await;
    engine.set_result("J1", Ok(Some(json!({"peaks": [3, 7]}))));

    let (status, body) = send(
        &app,
        "POST",
        "/v1/analyses",
        Some(json!({"filePath": "a.edf", "spec": {"window": 4}})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["analysisId"], "J1");

    let (status, _) = send(
        &app,
        "POST",
        "/v1/engine/events",
        Some(json!({"analysisId": "J1", "status": "completed", "progress": 100})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    wait_until(|| async { service.file_view("a.edf").await.is_completed }).await;

    let (status, body) = send(&app, "GET", "/v1/files/status?path=a.edf", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isCompleted"], true);
    assert_eq!(body["result"], json!({"peaks": [3, 7]}));

    let (_, body) = send(&app, "GET", "/v1/notifications", None).await;
    assert_eq!(body[0]["kind"], "success");
}

#[tokio::test]
async fn rejected_start_returns_conflict() {
    let engine = Arc::new(ScriptedEngine::default());
    let app = api::router(service_with(engine));

    let (status, body) = send(
        &app,
        "POST",
        "/v1/analyses",
        Some(json!({"filePath": "b.edf"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);

    let (status, _) = send(&app, "POST", "/v1/analyses", Some(json!({"filePath": " "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cache_controls_report_counts() {
    let engine = Arc::new(ScriptedEngine::default());
    let service = service_with(engine);
    let app = api::router(service.clone());

    for i in 0..3u64 {
        service
            .cache()
            .insert(
                analysis_coordinator::cache::CacheKey::chunk("a.edf", i, 1, &[], &json!({})),
                json!(i),
            )
            .await;
    }

    let (_, body) = send(&app, "GET", "/v1/cache/stats", None).await;
    assert_eq!(body["chunkEntries"], 3);

    let (_, body) = send(
        &app,
        "POST",
        "/v1/cache/invalidate",
        Some(json!({"filePath": "a.edf"})),
    )
    .await;
    assert_eq!(body["removed"], 3);

    let (_, body) = send(&app, "POST", "/v1/visibility", Some(json!({"hidden": true}))).await;
    assert_eq!(body["evicted"], 0);

    let (status, _) = send(&app, "POST", "/v1/analyses/missing/dismiss", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn page_routes_read_through_the_cache() {
    let engine = Arc::new(ScriptedEngine::default());
    let app = api::router(service_with(engine.clone()));
    let chunk = json!({
        "filePath": "a.edf",
        "startSample": 2048,
        "sampleCount": 256,
        "channels": ["Cz"],
        "preprocessing": {"highpass": 0.5}
    });

    let (status, first) = send(&app, "POST", "/v1/files/chunk", Some(chunk.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["startSample"], 2048);
    let (status, second) = send(&app, "POST", "/v1/files/chunk", Some(chunk)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, second);
    assert_eq!(engine.page_fetches.load(Ordering::SeqCst), 1);

    let (status, body) = send(
        &app,
        "POST",
        "/v1/files/overview",
        Some(json!({"filePath": "a.edf", "maxPoints": 500})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["points"], 500);

    let (_, stats) = send(&app, "GET", "/v1/cache/stats", None).await;
    assert_eq!(stats["chunkEntries"], 1);
    assert_eq!(stats["overviewEntries"], 1);

    let (status, body) = send(
        &app,
        "POST",
        "/v1/files/chunk",
        Some(json!({"filePath": "unreadable.edf", "startSample": 0, "sampleCount": 10})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["message"], "file not readable");

    let (status, _) = send(
        &app,
        "POST",
        "/v1/files/chunk",
        Some(json!({"filePath": "a.edf", "startSample": 0, "sampleCount": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
