// tests/generative_tests.rs
mod common;
use common::*;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{extract::State, routing::post, Json, Router};
use hemoscan_core::{
    domain::{AnemiaClass, Provenance},
    ports::AnalysisService,
};
use screening_lib::adapters::GenerativeBackendAdapter;
use serde_json::{json, Value};

type Captured = Arc<Mutex<Option<Value>>>;

/// A chat-completions endpoint that always replies with `content`.
async fn serve_completion(content: &'static str) -> (String, Captured) {
    let captured: Captured = Arc::new(Mutex::new(None));
    let app = Router::new()
        .route(
            "/v1/chat/completions",
            post(
                move |State(captured): State<Captured>, Json(request): Json<Value>| async move {
                    *captured.lock().unwrap() = Some(request);
                    Json(json!({
                        "id": "chatcmpl-1",
                        "object": "chat.completion",
                        "created": 1,
                        "model": "gpt-4o-mini",
                        "choices": [{
                            "index": 0,
                            "message": {"role": "assistant", "content": content},
                            "finish_reason": "stop"
                        }]
                    }))
                },
            ),
        )
        .with_state(captured.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/v1", addr), captured)
}

fn adapter(api_key: Option<&str>, api_base: &str) -> GenerativeBackendAdapter {
    GenerativeBackendAdapter::new(
        api_key.map(str::to_string),
        Some(api_base.to_string()),
        "gpt-4o-mini".to_string(),
        Duration::from_secs(5),
    )
}

fn assert_synthetic_shape(result: &hemoscan_core::domain::AnalysisResult) {
    assert_eq!(result.provenance, Provenance::Synthetic);
    assert!((9.0..=13.0).contains(&result.hb_g_per_dl));
    assert!((0.85..=0.95).contains(&result.confidence));
    assert!((1..=5).contains(&result.skin_tone_group));
    assert!(!result.quality.glare_detected);
    assert_eq!(result.explanations.len(), 3);
}

#[tokio::test]
async fn model_reply_is_normalized_and_tagged() {
    let (base, captured) = serve_completion(
        r#"{"hb_g_per_dl": 7.46, "anemia_class": "Severe", "confidence": 0.81,
            "skin_tone_group": 2,
            "quality_flags": {"sharpness_ok": true, "brightness_ok": true, "glare_detected": false},
            "explanation": [{"feature": "Pallor", "direction": "low", "impact": "Very pale"}]}"#,
    )
    .await;

    let result = adapter(Some("sk-test"), &base).analyze(&image()).await.unwrap();
    assert_eq!(result.provenance, Provenance::Model);
    assert_eq!(result.hb_g_per_dl, 7.5);
    assert_eq!(result.anemia_class, AnemiaClass::Severe);
    assert_eq!(result.confidence, 0.81);
    assert_eq!(result.skin_tone_group, 2);
    assert_eq!(result.explanations[0].feature, "Pallor");

    let request = captured.lock().unwrap().clone().unwrap();
    assert_eq!(request["model"], "gpt-4o-mini");
    assert_eq!(request["response_format"]["type"], "json_object");
    let body = request.to_string();
    assert!(body.contains("data:image/jpeg;base64,"));
}

#[tokio::test]
async fn prose_reply_falls_back_to_synthetic() {
    let (base, _) = serve_completion("I'm sorry, I can't analyze medical images.").await;

    let result = adapter(Some("sk-test"), &base).analyze(&image()).await.unwrap();
    assert_synthetic_shape(&result);
}

#[tokio::test]
async fn unreachable_endpoint_falls_back_to_synthetic() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let closed = format!("http://{}/v1", listener.local_addr().unwrap());
    drop(listener);

    let result = adapter(Some("sk-test"), &closed).analyze(&image()).await.unwrap();
    assert_synthetic_shape(&result);
}

#[tokio::test]
async fn missing_key_never_calls_out() {
    let (base, captured) = serve_completion(r#"{"hb_g_per_dl": 12.0}"#).await;

    let result = adapter(None, &base).analyze(&image()).await.unwrap();
    assert_synthetic_shape(&result);
    assert!(captured.lock().unwrap().is_none());
}
