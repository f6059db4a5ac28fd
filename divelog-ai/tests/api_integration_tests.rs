//! Integration tests for divelog-ai API endpoints

mod helpers;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use divelog_ai::extractors::StaticTextEngine;
use divelog_ai::types::{EngineOutput, IngestError};
use helpers::{base64, fast_batch_settings, png, test_state, PDF_HEADER};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

const CLEAN_SCREEN: &str = "Max Depth: 45.2m  Dive Time: 02:15  Temp: 27°C  Date: 07/15/2023";

async fn create_test_app(engine: Option<StaticTextEngine>) -> Router {
    divelog_ai::build_router(test_state(engine.map(Arc::new)).await)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

/// Poll GET /batch/{id} until the batch leaves RUNNING
async fn wait_for_batch(app: &Router, batch_id: &str) -> Value {
    for _ in 0..200 {
        let (status, json) = send(app, "GET", &format!("/batch/{}", batch_id), None).await;
        assert_eq!(status, StatusCode::OK);
        if json["state"] != "RUNNING" {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("batch {} did not finish in time", batch_id);
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app(Some(StaticTextEngine::new(""))).await;

    let (status, json) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "divelog-ai");
    assert_eq!(json["vision_engine"], "static-text");
    assert!(json["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn test_health_degraded_without_engine() {
    let app = create_test_app(None).await;

    let (status, json) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "degraded");
    assert!(json.get("vision_engine").is_none());
}

#[tokio::test]
async fn test_analyze_clean_screen() {
    let app = create_test_app(Some(StaticTextEngine::new(CLEAN_SCREEN))).await;

    let (status, json) = send(
        &app,
        "POST",
        "/analyze",
        Some(json!({ "image": base64(&png("clean")) })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["maxDepthMeters"], 45.2);
    assert_eq!(json["diveTimeSeconds"], 135);
    assert_eq!(json["diveTimeFormatted"], "2:15");
    assert_eq!(json["waterTemperatureCelsius"], 27.0);
    assert_eq!(json["diveDate"], "2023-07-15");
    assert_eq!(json["isUsable"], true);
    assert_eq!(json["validationWarnings"], json!([]));
    assert_eq!(json["fieldConfidence"]["maxDepthMeters"], "high");
    assert!(json["recordId"].is_string());
    assert_eq!(json["supersedes"], Value::Null);
    assert_eq!(json["sourceImageId"].as_str().unwrap().len(), 64);
}

#[tokio::test]
async fn test_analyze_accepts_data_url() {
    let app = create_test_app(Some(StaticTextEngine::new("328 ft"))).await;
    let image = format!("data:image/png;base64,{}", base64(&png("feet")));

    let (status, json) = send(&app, "POST", "/analyze", Some(json!({ "image": image }))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["maxDepthMeters"], 99.97);
    assert_eq!(json["diveTimeSeconds"], Value::Null);
    assert_eq!(json["isUsable"], true);
}

#[tokio::test]
async fn test_analyze_empty_text_is_unusable_not_error() {
    let app = create_test_app(Some(StaticTextEngine::new(""))).await;

    let (status, json) = send(
        &app,
        "POST",
        "/analyze",
        Some(json!({ "image": base64(&png("blank")) })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["isUsable"], false);
    assert_eq!(json["maxDepthMeters"], Value::Null);
}

#[tokio::test]
async fn test_analyze_unsupported_format() {
    let app = create_test_app(Some(StaticTextEngine::new(CLEAN_SCREEN))).await;

    let (status, json) = send(
        &app,
        "POST",
        "/analyze",
        Some(json!({ "image": base64(PDF_HEADER) })),
    )
    .await;

    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(json["error"]["code"], "UNSUPPORTED_IMAGE_FORMAT");
}

#[tokio::test]
async fn test_analyze_engine_unavailable_asks_to_retry() {
    let app = create_test_app(Some(StaticTextEngine::failing(
        IngestError::EngineUnavailable("HTTP 503".to_string()),
    )))
    .await;

    let (status, json) = send(
        &app,
        "POST",
        "/analyze",
        Some(json!({ "image": base64(&png("down")) })),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["error"]["code"], "ENGINE_UNAVAILABLE");
    assert!(json["error"]["message"].as_str().unwrap().contains("try again"));

    let (_, health) = send(&app, "GET", "/health", None).await;
    assert!(health["last_error"].as_str().unwrap().contains("HTTP 503"));
}

#[tokio::test]
async fn test_analyze_without_engine_is_unavailable() {
    let app = create_test_app(None).await;

    let (status, json) = send(
        &app,
        "POST",
        "/analyze",
        Some(json!({ "image": base64(&png("none")) })),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["error"]["code"], "ENGINE_UNAVAILABLE");
}

#[tokio::test]
async fn test_analyze_rejects_malformed_base64() {
    let app = create_test_app(Some(StaticTextEngine::new(CLEAN_SCREEN))).await;

    let (status, json) = send(&app, "POST", "/analyze", Some(json!({ "image": "not base64 !!" }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_analyze_persists_for_owner_and_corrects() {
    let app = create_test_app(Some(StaticTextEngine::new("Max Depth: 500 m  Time 2:30"))).await;

    let (status, record) = send(
        &app,
        "POST",
        "/analyze",
        Some(json!({ "image": base64(&png("owned")), "ownerId": "diver-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["maxDepthMeters"], 500.0);
    assert_eq!(record["isUsable"], true);
    assert_eq!(record["validationWarnings"].as_array().unwrap().len(), 1);
    let record_id = record["recordId"].as_str().unwrap().to_string();

    let (status, stored) = send(&app, "GET", &format!("/records/{}", record_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored["ownerId"], "diver-1");
    assert_eq!(stored["recordId"], record_id.as_str());

    let (status, corrected) = send(
        &app,
        "POST",
        &format!("/records/{}/corrections", record_id),
        Some(json!({ "maxDepthMeters": 50.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(corrected["ownerId"], "diver-1");
    assert_eq!(corrected["supersedes"], record_id.as_str());
    assert_eq!(corrected["maxDepthMeters"], 50.0);
    assert_eq!(corrected["diveTimeSeconds"], 150);
    assert_eq!(corrected["validationWarnings"], json!([]));
    assert_ne!(corrected["recordId"], record_id.as_str());

    // The original is untouched and can no longer be corrected
    let (_, original) = send(&app, "GET", &format!("/records/{}", record_id), None).await;
    assert_eq!(original["maxDepthMeters"], 500.0);
    let (status, _) = send(
        &app,
        "POST",
        &format!("/records/{}/corrections", record_id),
        Some(json!({ "maxDepthMeters": 51.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, history) = send(&app, "GET", &format!("/records/{}/history", record_id), None).await;
    assert_eq!(status, StatusCode::OK);
    let chain = history["chain"].as_array().unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[0]["recordId"], record_id.as_str());
    assert_eq!(chain[1]["recordId"], corrected["recordId"]);

    let (status, listing) = send(&app, "GET", "/owners/diver-1/records", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["ownerId"], "diver-1");
    assert_eq!(listing["records"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_concurrent_corrections_keep_chain_linear() {
    let app = create_test_app(Some(StaticTextEngine::new("Max Depth: 500 m  Time 2:30"))).await;

    let (_, record) = send(
        &app,
        "POST",
        "/analyze",
        Some(json!({ "image": base64(&png("raced")), "ownerId": "diver-1" })),
    )
    .await;
    let record_id = record["recordId"].as_str().unwrap().to_string();
    let uri = format!("/records/{}/corrections", record_id);

    let (first, second) = tokio::join!(
        send(&app, "POST", &uri, Some(json!({ "maxDepthMeters": 50.0 }))),
        send(&app, "POST", &uri, Some(json!({ "maxDepthMeters": 55.0 }))),
    );

    let mut statuses = vec![first.0, second.0];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::CREATED, StatusCode::CONFLICT]);
    let rejected = if first.0 == StatusCode::CONFLICT { &first.1 } else { &second.1 };
    assert_eq!(rejected["error"]["code"], "CONFLICT");

    let (_, history) = send(&app, "GET", &format!("/records/{}/history", record_id), None).await;
    assert_eq!(history["chain"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_analyze_without_owner_is_not_stored() {
    let app = create_test_app(Some(StaticTextEngine::new(CLEAN_SCREEN))).await;

    let (_, record) = send(
        &app,
        "POST",
        "/analyze",
        Some(json!({ "image": base64(&png("anon")) })),
    )
    .await;

    let (status, _) = send(
        &app,
        "GET",
        &format!("/records/{}", record["recordId"].as_str().unwrap()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_blank_owner_rejected() {
    let app = create_test_app(Some(StaticTextEngine::new(CLEAN_SCREEN))).await;

    let (status, _) = send(
        &app,
        "POST",
        "/analyze",
        Some(json!({ "image": base64(&png("blank-owner")), "ownerId": "  " })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_record_endpoints_not_found() {
    let app = create_test_app(None).await;
    let fake_id = "00000000-0000-0000-0000-000000000000";

    let (status, json) = send(&app, "GET", &format!("/records/{}", fake_id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "NOT_FOUND");

    let (status, _) = send(&app, "GET", &format!("/records/{}/history", fake_id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        "POST",
        &format!("/records/{}/corrections", fake_id),
        Some(json!({ "maxDepthMeters": 10.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, listing) = send(&app, "GET", "/owners/nobody/records", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["records"], json!([]));
}

#[tokio::test]
async fn test_empty_correction_rejected() {
    let app = create_test_app(None).await;

    let (status, _) = send(
        &app,
        "POST",
        "/records/00000000-0000-0000-0000-000000000000/corrections",
        Some(json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_oldest_finished_batches_are_pruned() {
    let mut settings = fast_batch_settings(1);
    settings.retained_sessions = 1;
    let state = test_state(Some(Arc::new(StaticTextEngine::new("Max 12 m"))))
        .await
        .with_batch_settings(settings);
    let app = divelog_ai::build_router(state);

    let mut batch_ids = Vec::new();
    for tag in ["a", "b", "c"] {
        let (status, started) = send(
            &app,
            "POST",
            "/batch",
            Some(json!({ "images": [{ "image": base64(&png(tag)) }] })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let batch_id = started["batchId"].as_str().unwrap().to_string();
        wait_for_batch(&app, &batch_id).await;
        batch_ids.push(batch_id);
    }

    let (status, _) = send(&app, "GET", &format!("/batch/{}", batch_ids[0]), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    for batch_id in &batch_ids[1..] {
        let (status, _) = send(&app, "GET", &format!("/batch/{}", batch_id), None).await;
        assert_eq!(status, StatusCode::OK);
    }
}

#[tokio::test]
async fn test_batch_inline_images() {
    let engine = StaticTextEngine::new("").with_script(vec![
        Ok(EngineOutput::text("Max 30 m  Dive Time 1:45  06/07/2019")),
        Ok(EngineOutput::text("Depth 25.5 m  25/12/2022")),
    ]);
    let app = create_test_app(Some(engine)).await;

    let (status, started) = send(
        &app,
        "POST",
        "/batch",
        Some(json!({
            "images": [
                { "name": "first.png", "image": base64(&png("one")) },
                { "image": base64(&png("two")) },
                { "name": "scan.pdf", "image": base64(PDF_HEADER) },
            ],
            "ownerId": "diver-7",
        })),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(started["state"], "RUNNING");
    assert_eq!(started["total"], 3);
    let batch_id = started["batchId"].as_str().unwrap().to_string();

    let finished = wait_for_batch(&app, &batch_id).await;
    assert_eq!(finished["state"], "COMPLETED");
    assert_eq!(finished["progress"]["processed"], 3);
    assert_eq!(finished["progress"]["total"], 3);

    let items = finished["items"].as_array().unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0]["name"], "first.png");
    assert_eq!(items[0]["status"], "completed");
    // The day-first date elsewhere in the batch resolves the ambiguous one
    assert_eq!(items[0]["record"]["diveDate"], "2019-07-06");
    assert_eq!(items[1]["name"], "image-1");
    assert_eq!(items[1]["record"]["maxDepthMeters"], 25.5);
    assert_eq!(items[2]["status"], "failed");
    assert_eq!(items[2]["code"], "UNSUPPORTED_IMAGE_FORMAT");
    assert_eq!(items[2]["retryable"], false);

    let (_, listing) = send(&app, "GET", "/owners/diver-7/records", None).await;
    assert_eq!(listing["records"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_batch_rejects_bad_requests() {
    let app = create_test_app(Some(StaticTextEngine::new(""))).await;

    let (status, _) = send(&app, "POST", "/batch", Some(json!({ "images": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = send(
        &app,
        "POST",
        "/batch",
        Some(json!({ "images": [{ "image": base64(&png("ok")) }, { "image": "%%%" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"]["message"].as_str().unwrap().contains("images[1]"));
}

#[tokio::test]
async fn test_batch_without_engine_is_unavailable() {
    let app = create_test_app(None).await;

    let (status, _) = send(
        &app,
        "POST",
        "/batch",
        Some(json!({ "images": [{ "image": base64(&png("x")) }] })),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_batch_folder() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.png"), png("a")).unwrap();
    std::fs::write(dir.path().join("b.png"), png("b")).unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"Max Depth 12 m").unwrap();

    let app = create_test_app(Some(StaticTextEngine::new("Max Depth 12 m"))).await;

    let (status, started) = send(
        &app,
        "POST",
        "/batch/folder",
        Some(json!({ "folder": dir.path().to_str().unwrap(), "promptHint": "logbook" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(started["total"], Value::Null);

    let finished = wait_for_batch(&app, started["batchId"].as_str().unwrap()).await;
    assert_eq!(finished["state"], "COMPLETED");
    let names: Vec<&str> = finished["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["a.png", "b.png"]);
}

#[tokio::test]
async fn test_batch_folder_invalid_paths() {
    let app = create_test_app(Some(StaticTextEngine::new(""))).await;

    let (status, _) = send(
        &app,
        "POST",
        "/batch/folder",
        Some(json!({ "folder": "/nonexistent/path/that/does/not/exist" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("dive.png");
    std::fs::write(&file_path, png("file")).unwrap();
    let (status, _) = send(
        &app,
        "POST",
        "/batch/folder",
        Some(json!({ "folder": file_path.to_str().unwrap() })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_batch_cancel() {
    let engine = StaticTextEngine::new("Max Depth 20 m").with_delay(Duration::from_millis(200));
    let app = create_test_app(Some(engine)).await;

    let images: Vec<Value> = (0..4)
        .map(|i| json!({ "image": base64(&png(&format!("slow-{}", i))) }))
        .collect();
    let (_, started) = send(&app, "POST", "/batch", Some(json!({ "images": images }))).await;
    let batch_id = started["batchId"].as_str().unwrap().to_string();

    let (status, cancelled) = send(&app, "POST", &format!("/batch/{}/cancel", batch_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["batchId"], batch_id.as_str());

    let finished = wait_for_batch(&app, &batch_id).await;
    assert_eq!(finished["state"], "CANCELLED");
    let items = finished["items"].as_array().unwrap();
    assert_eq!(items.len(), 4);
    assert!(items.iter().any(|item| item["status"] == "cancelled"));
    assert_eq!(items[3]["status"], "cancelled");

    // Cancelling a finished batch conflicts
    let (status, json) = send(&app, "POST", &format!("/batch/{}/cancel", batch_id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_batch_status_not_found() {
    let app = create_test_app(None).await;
    let fake_id = "00000000-0000-0000-0000-000000000000";

    let (status, _) = send(&app, "GET", &format!("/batch/{}", fake_id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "POST", &format!("/batch/{}/cancel", fake_id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_batch_events_stream_is_sse() {
    let app = create_test_app(None).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/batch/events")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
}
