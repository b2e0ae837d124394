// tests/common/mod.rs
#![allow(dead_code)] // Each suite uses a different subset of these helpers

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hemoscan_core::{
    domain::{
        AnalysisResult, AnemiaClass, Explanation, FeatureDirection, Gender, ImageBlob,
        ImageFormat, Provenance, QualityFlags,
    },
    ports::{AnalysisService, PortError, PortResult},
};
use screening_lib::{
    adapters::SqliteKvAdapter,
    store::{Registration, SessionStore},
};

pub const PASSWORD: &str = "correct horse battery staple";

/// A fresh store over its own in-memory database.
pub async fn memory_store() -> (Arc<SqliteKvAdapter>, Arc<SessionStore>) {
    store_at("sqlite::memory:").await
}

pub async fn store_at(database_url: &str) -> (Arc<SqliteKvAdapter>, Arc<SessionStore>) {
    let kv = Arc::new(
        SqliteKvAdapter::connect(database_url)
            .await
            .expect("Failed to open test database"),
    );
    kv.run_migrations().await.expect("Failed to run migrations");
    let store = Arc::new(SessionStore::new(kv.clone()));
    (kv, store)
}

pub fn registration(email: &str) -> Registration {
    Registration {
        email: email.to_string(),
        password: PASSWORD.to_string(),
        age: 34,
        gender: Gender::Female,
        terms_accepted: true,
    }
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
}

pub fn sample_result(id: &str, timestamp: DateTime<Utc>, hb: f64) -> AnalysisResult {
    AnalysisResult {
        id: id.to_string(),
        timestamp,
        hb_g_per_dl: hb,
        hb_ci_95: (hb - 0.9, hb + 0.9),
        anemia_class: AnemiaClass::Mild,
        confidence: 0.8,
        skin_tone_group: 3,
        quality: QualityFlags::passing(),
        explanations: vec![Explanation {
            feature: "Nail bed color ratio (R/G)".to_string(),
            direction: FeatureDirection::Low,
            impact: "Pale nail bed".to_string(),
        }],
        image_ref: format!("{}.jpg", id),
        provenance: Provenance::Model,
        rich: None,
    }
}

pub fn image() -> ImageBlob {
    ImageBlob {
        name: "nail.jpg".to_string(),
        format: ImageFormat::Jpeg,
        bytes: vec![0xFF, 0xD8, 0xFF, 0xE0],
    }
}

// --- Scripted Analysis Service ---

/// Hands out queued outcomes in order and counts calls.
#[derive(Default)]
pub struct ScriptedAnalysis {
    outcomes: Mutex<Vec<PortResult<AnalysisResult>>>,
    calls: Mutex<usize>,
}

impl ScriptedAnalysis {
    pub fn new(outcomes: Vec<PortResult<AnalysisResult>>) -> Arc<Self> {
        let mut outcomes = outcomes;
        outcomes.reverse();
        Arc::new(Self {
            outcomes: Mutex::new(outcomes),
            calls: Mutex::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl AnalysisService for ScriptedAnalysis {
    async fn analyze(&self, _image: &ImageBlob) -> PortResult<AnalysisResult> {
        *self.calls.lock().unwrap() += 1;
        self.outcomes
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Err(PortError::Unexpected("no scripted outcome left".to_string())))
    }
}
