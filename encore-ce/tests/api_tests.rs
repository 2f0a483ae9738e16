//! HTTP routing tests
//!
//! Requests go through the full router with `tower::ServiceExt::oneshot`.

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use helpers::{assert_has_columns, melody_wav, MelodyConfig, TestService};

async fn send(service: &TestService, request: Request<Body>) -> (StatusCode, Value) {
    let response = service.router().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn poll_until_terminal(service: &TestService, job_id: &str) -> Value {
    for _ in 0..600 {
        let (status, body) = send(service, get(&format!("/jobs/{}", job_id))).await;
        assert_eq!(status, StatusCode::OK);
        if body["state"] == "SUCCESS" || body["state"] == "FAILURE" {
            return body;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    panic!("job {} did not finish", job_id);
}

#[tokio::test]
async fn test_health() {
    let service = TestService::start().await;
    let (status, body) = send(&service, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "encore-ce");
}

#[tokio::test]
async fn test_schema_created_on_open() {
    let service = TestService::start().await;
    let pool = service.sqlite.pool();
    assert_has_columns(
        pool,
        "jobs",
        &["id", "kind", "state", "progress", "checkpoint", "payload", "attempts"],
    )
    .await;
    assert_has_columns(
        pool,
        "results",
        &["task_id", "result_type", "user_id", "song_id", "created_at"],
    )
    .await;
    assert_has_columns(pool, "references", &["song_id", "document", "created_at"]).await;
}

#[tokio::test]
async fn test_analysis_submit_poll_and_fetch_result() {
    let service = TestService::start().await;
    let audio = STANDARD.encode(melody_wav(&MelodyConfig::default()));

    let (status, body) = send(
        &service,
        post_json(
            "/analysis",
            json!({"audio_bytes": audio, "analysis_type": "full", "user_id": "user-9", "song_id": "song-9"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let job = poll_until_terminal(&service, &job_id).await;
    assert_eq!(job["state"], "SUCCESS", "job: {}", job);
    assert_eq!(job["job_id"], job_id.as_str());
    assert_eq!(job["result"]["type"], "analysis");
    assert!(job.get("error").is_none());

    let (status, document) = send(&service, get(&format!("/results/{}", job_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(document["task_id"], job_id.as_str());
    assert_eq!(document["result_type"], "analysis");

    let (status, listing) = send(&service, get("/results?user_id=user-9&type=analysis")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["count"], 1);

    let (_, listing) = send(&service, get("/results?song_id=song-9&type=comparison")).await;
    assert_eq!(listing["count"], 0);
}

#[tokio::test]
async fn test_result_listing_requires_a_filter() {
    let service = TestService::start().await;
    let (status, body) = send(&service, get("/results")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_comparison_without_reference_is_rejected() {
    let service = TestService::start().await;
    let audio = STANDARD.encode(melody_wav(&MelodyConfig::default()));

    let (status, body) = send(
        &service,
        post_json("/comparison", json!({"user_audio_bytes": audio})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("song_id"));
}

#[tokio::test]
async fn test_registration_then_reference_lookup() {
    let service = TestService::start().await;
    let audio = STANDARD.encode(melody_wav(&MelodyConfig::default()));

    let (status, body) = send(
        &service,
        post_json(
            "/references",
            json!({"audio_bytes": audio, "song_id": "etude-1", "description": "slow"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["job_id"].as_str().unwrap().to_string();
    let job = poll_until_terminal(&service, &job_id).await;
    assert_eq!(job["state"], "SUCCESS", "job: {}", job);

    let (status, reference) = send(&service, get("/references/etude-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reference["song_id"], "etude-1");
    assert_eq!(reference["metadata"]["has_midi"], false);
    assert_eq!(reference["metadata"]["description"], "slow");
    assert!(reference["chroma"].as_array().is_some_and(|c| !c.is_empty()));
    assert!(reference.get("midi_data").is_none());
}

#[tokio::test]
async fn test_unknown_ids_are_404() {
    let service = TestService::start().await;
    let unknown = uuid::Uuid::new_v4();

    let (status, _) = send(&service, get(&format!("/jobs/{}", unknown))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&service, get(&format!("/results/{}", unknown))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&service, get("/references/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"]["message"].as_str().unwrap().contains("nope"));

    let (status, _) = send(
        &service,
        post_json(&format!("/jobs/{}/cancel", unknown), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancelling_finished_job_conflicts() {
    let service = TestService::start().await;

    let (status, body) = send(
        &service,
        post_json("/analysis", json!({"audio_bytes": STANDARD.encode(b"not audio at all")})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let job = poll_until_terminal(&service, &job_id).await;
    assert_eq!(job["state"], "FAILURE");
    assert!(job.get("result").is_none());
    assert!(job["error"].as_str().unwrap().contains("Unsupported audio type"));

    let (status, body) = send(
        &service,
        post_json(&format!("/jobs/{}/cancel", job_id), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
}
