//! services/screening/src/adapters/structured.rs
//!
//! This module contains the adapter for the structured inference backend.
//! It implements the `AnalysisService` port from the `core` crate by uploading the
//! image as multipart form data and normalizing the rich JSON envelope it returns.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use hemoscan_core::{
    domain::{AnalysisResult, ImageBlob, Provenance, QualityFlags, RichPayload},
    normalize::{normalize, RawAnalysis, RawFeature},
    ports::{AnalysisService, PortError, PortResult},
};
use reqwest::{
    multipart::{Form, Part},
    Client, StatusCode,
};
use serde::Deserialize;
use tracing::{error, info, warn};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `AnalysisService` against the `/api/v1` scan API.
#[derive(Clone)]
pub struct StructuredBackendAdapter {
    client: Client,
    base_url: String,
}

impl StructuredBackendAdapter {
    /// Creates a new `StructuredBackendAdapter` whose every request is bounded by `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> PortResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    /// Liveness probe. Any transport failure counts as down.
    pub async fn health(&self) -> bool {
        match self.client.get(self.url("/health")).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!("Health probe failed: {}", e);
                false
            }
        }
    }

    /// Retrieves a previously analysed scan by its backend identifier.
    pub async fn fetch_scan(&self, scan_id: &str) -> PortResult<AnalysisResult> {
        let response = self
            .client
            .get(self.url(&format!("/scan/{}", scan_id)))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        if status == StatusCode::NOT_FOUND {
            return Err(PortError::NotFound(format!("Scan {} not found", scan_id)));
        }
        if !status.is_success() {
            return Err(error_from_status(status, &body));
        }

        let envelope = parse_envelope(&body)?;
        Ok(normalize(envelope.into_raw()?, scan_id, Provenance::Model))
    }

    /// Downloads the clinical PDF report for a scan.
    pub async fn download_report(&self, scan_id: &str) -> PortResult<Vec<u8>> {
        let response = self
            .client
            .get(self.url(&format!("/report/{}", scan_id)))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(PortError::NotFound(format!("Scan {} not found", scan_id)));
        }
        if !status.is_success() {
            let body = response.text().await.map_err(transport_error)?;
            return Err(error_from_status(status, &body));
        }

        let bytes = response.bytes().await.map_err(transport_error)?;
        Ok(bytes.to_vec())
    }
}

//=========================================================================================
// "Impure" Response Record Structs
//=========================================================================================

#[derive(Deserialize)]
struct ScanEnvelope {
    scan_id: Option<String>,
    timestamp: Option<String>,
    quality: Option<QualityRecord>,
    preprocessing: Option<PreprocessingRecord>,
    segmentation: Option<SegmentationRecord>,
    prediction: Option<PredictionRecord>,
    explainability: Option<ExplainabilityRecord>,
}

#[derive(Deserialize)]
struct QualityRecord {
    sharpness_ok: Option<bool>,
    brightness_ok: Option<bool>,
    glare_detected: Option<bool>,
    quality_pass: Option<bool>,
    #[serde(default)]
    fail_reasons: Vec<String>,
}

#[derive(Deserialize)]
struct PreprocessingRecord {
    tone_cluster: Option<i64>,
    original_image_base64: Option<String>,
    preprocessed_image_base64: Option<String>,
}

#[derive(Deserialize)]
struct SegmentationRecord {
    roi_image_base64: Option<String>,
}

#[derive(Deserialize)]
struct PredictionRecord {
    hb_g_per_dl: Option<f64>,
    hb_ci_95: Option<Vec<f64>>,
    uncertainty: Option<f64>,
    #[serde(alias = "anemia_stage")]
    anemia_class: Option<String>,
    confidence: Option<f64>,
    uncertainty_flag: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct ExplainabilityRecord {
    #[serde(default, alias = "top_features")]
    top_contributing_features: Vec<FeatureRecord>,
    gradcam_nail_overlay: Option<String>,
}

#[derive(Deserialize)]
struct FeatureRecord {
    #[serde(alias = "feature")]
    name: String,
    contribution: Option<f64>,
    direction: Option<String>,
    impact: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
}

impl ScanEnvelope {
    /// Extracts the backend-agnostic raw analysis, rejecting envelopes without an estimate.
    fn into_raw(self) -> PortResult<RawAnalysis> {
        let quality = self.quality;
        let passed = quality
            .as_ref()
            .and_then(|q| q.quality_pass)
            .unwrap_or(true);

        let Some(prediction) = self.prediction else {
            if !passed {
                let reasons = quality.map(|q| q.fail_reasons).unwrap_or_default();
                return Err(PortError::ValidationFailure(if reasons.is_empty() {
                    "Image quality check failed".to_string()
                } else {
                    format!("Image quality check failed: {}", reasons.join("; "))
                }));
            }
            return Err(PortError::AnalysisFailure(
                "Backend response contained no prediction".to_string(),
            ));
        };

        let Some(hb) = prediction.hb_g_per_dl else {
            let message = prediction
                .message
                .or(prediction.uncertainty_flag)
                .unwrap_or_else(|| "Backend returned no hemoglobin estimate".to_string());
            return Err(PortError::AnalysisFailure(message));
        };

        let quality = match quality {
            Some(q) => QualityFlags {
                sharpness_ok: q.sharpness_ok.unwrap_or(passed),
                brightness_ok: q.brightness_ok.unwrap_or(passed),
                glare_detected: q.glare_detected.unwrap_or(false),
            },
            None => QualityFlags::passing(),
        };

        let tone_cluster = self.preprocessing.as_ref().and_then(|p| p.tone_cluster);
        let (original_snapshot, preprocessed_snapshot) = match self.preprocessing {
            Some(p) => (p.original_image_base64, p.preprocessed_image_base64),
            None => (None, None),
        };
        let (features, explainability_overlay) = match self.explainability {
            Some(e) => (e.top_contributing_features, e.gradcam_nail_overlay),
            None => (Vec::new(), None),
        };

        Ok(RawAnalysis {
            scan_id: self.scan_id,
            timestamp: self.timestamp.as_deref().and_then(parse_timestamp),
            hb_g_per_dl: hb,
            hb_ci_95: prediction
                .hb_ci_95
                .filter(|ci| ci.len() == 2)
                .map(|ci| (ci[0], ci[1])),
            anemia_label: prediction.anemia_class,
            confidence: prediction.confidence,
            uncertainty: prediction.uncertainty,
            // Backend clusters are zero-based; tone groups start at 1.
            skin_tone_group: tone_cluster.map(|c| c.saturating_add(1)),
            quality,
            features: features
                .into_iter()
                .map(|f| RawFeature {
                    name: f.name,
                    direction: f.direction,
                    contribution: f.contribution,
                    impact: f.impact,
                })
                .collect(),
            rich: Some(RichPayload {
                explainability_overlay,
                original_snapshot,
                preprocessed_snapshot,
                segmentation_roi: self.segmentation.and_then(|s| s.roi_image_base64),
                tone_cluster,
            }),
        })
    }
}

//=========================================================================================
// Helpers
//=========================================================================================

/// Accepts RFC 3339 or the naive ISO form the backend emits, read as UTC.
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

fn parse_envelope(body: &str) -> PortResult<ScanEnvelope> {
    serde_json::from_str(body).map_err(|e| {
        error!("Malformed scan response: {}", e);
        PortError::AnalysisFailure(format!("Malformed backend response: {}", e))
    })
}

fn transport_error(e: reqwest::Error) -> PortError {
    if e.is_timeout() {
        PortError::AnalysisFailure("The analysis request timed out".to_string())
    } else {
        PortError::AnalysisFailure(e.to_string())
    }
}

fn detail_text(body: &str) -> Option<String> {
    let detail = serde_json::from_str::<ErrorBody>(body).ok()?.detail?;
    Some(match detail {
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    })
}

/// Maps a non-2xx response onto the error taxonomy.
fn error_from_status(status: StatusCode, body: &str) -> PortError {
    match detail_text(body) {
        Some(detail) if status.is_client_error() => PortError::ValidationFailure(detail),
        Some(detail) if detail.to_lowercase().contains("hand") => {
            PortError::ValidationFailure(detail)
        }
        Some(detail) => PortError::AnalysisFailure(format!("{} ({})", detail, status)),
        None => PortError::AnalysisFailure(format!("Backend responded with {}", status)),
    }
}

//=========================================================================================
// `AnalysisService` Trait Implementation
//=========================================================================================

#[async_trait]
impl AnalysisService for StructuredBackendAdapter {
    /// Uploads the image to `/api/v1/scan` and normalizes the envelope.
    async fn analyze(&self, image: &ImageBlob) -> PortResult<AnalysisResult> {
        let part = Part::bytes(image.bytes.clone())
            .file_name(image.name.clone())
            .mime_str(image.format.mime_type())
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        let form = Form::new().part("file", part);

        info!("Uploading '{}' ({} bytes) for analysis", image.name, image.bytes.len());
        let response = self
            .client
            .post(self.url("/scan"))
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            let err = error_from_status(status, &body);
            warn!("Scan rejected by backend: {}", err);
            return Err(err);
        }

        let raw = parse_envelope(&body)?.into_raw()?;
        let result = normalize(raw, &image.name, Provenance::Model);
        info!(
            "Scan {} analysed: hb={} g/dL, class={:?}",
            result.id, result.hb_g_per_dl, result.anemia_class
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hemoscan_core::domain::{AnemiaClass, FeatureDirection};

    #[test]
    fn backend_envelope_with_real_field_names_is_normalized() {
        let body = r#"{
            "scan_id": "abc",
            "timestamp": "2024-05-01T10:20:30.123456",
            "quality": {"sharpness": 80.0, "brightness": 120.0, "contrast": 30.0,
                        "motion_blur_score": 0.1, "quality_pass": true, "fail_reasons": []},
            "preprocessing": {"tone_cluster": 2, "lab_mean": [1,2,3], "scaling_factor": 1.0,
                              "glare_mask_coverage": 0.01},
            "prediction": {"hb_g_per_dl": 10.26, "hb_ci_95": [9.31, 11.22],
                           "uncertainty": 0.12, "anemia_stage": "mild"},
            "explainability": {"top_features": [
                {"name": "mean_L", "value": 60.1, "importance": 0.4, "contribution": -0.32},
                {"name": "ratio_R_G", "value": 1.2, "importance": 0.3, "contribution": 0.05}
            ]}
        }"#;
        let raw = parse_envelope(body).unwrap().into_raw().unwrap();
        let result = normalize(raw, "nail.jpg", Provenance::Model);

        assert_eq!(result.id, "abc");
        assert_eq!(result.hb_g_per_dl, 10.3);
        assert_eq!(result.hb_ci_95, (9.3, 11.2));
        assert_eq!(result.anemia_class, AnemiaClass::Mild);
        assert_eq!(result.confidence, 0.88);
        assert_eq!(result.skin_tone_group, 3);
        assert_eq!(result.quality, QualityFlags::passing());
        assert_eq!(result.explanations.len(), 3);
        assert_eq!(result.explanations[0].direction, FeatureDirection::Low);
        assert_eq!(result.explanations[1].direction, FeatureDirection::Normal);
        assert_eq!(result.timestamp.to_rfc3339(), "2024-05-01T10:20:30.123456+00:00");
        assert_eq!(result.rich.unwrap().tone_cluster, Some(2));
    }

    #[test]
    fn failed_quality_without_prediction_is_a_validation_failure() {
        let body = r#"{"scan_id": "q", "quality": {"quality_pass": false,
                       "fail_reasons": ["Image too blurry", "Too dark"]}}"#;
        let err = parse_envelope(body).unwrap().into_raw().unwrap_err();
        assert_eq!(
            err,
            PortError::ValidationFailure(
                "Image quality check failed: Image too blurry; Too dark".to_string()
            )
        );
    }

    #[test]
    fn high_uncertainty_is_an_analysis_failure_with_backend_message() {
        let body = r#"{"scan_id": "u", "quality": {"quality_pass": true},
                       "prediction": {"hb_g_per_dl": null, "uncertainty": 0.9,
                                      "uncertainty_flag": "RETAKE_OR_LAB_CONFIRM",
                                      "message": "Please retake the image"}}"#;
        let err = parse_envelope(body).unwrap().into_raw().unwrap_err();
        assert_eq!(err, PortError::AnalysisFailure("Please retake the image".to_string()));
    }

    #[test]
    fn extreme_tone_cluster_is_clamped_not_overflowed() {
        let body = r#"{"scan_id": "a", "prediction": {"hb_g_per_dl": 11.0},
                       "preprocessing": {"tone_cluster": 9223372036854775807}}"#;
        let raw = parse_envelope(body).unwrap().into_raw().unwrap();
        assert_eq!(raw.skin_tone_group, Some(i64::MAX));
        let result = normalize(raw, "nail.jpg", Provenance::Model);
        assert_eq!(result.skin_tone_group, u8::MAX);
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            error_from_status(StatusCode::BAD_REQUEST, r#"{"detail":"no hand detected"}"#),
            PortError::ValidationFailure("no hand detected".to_string())
        );
        assert!(matches!(
            error_from_status(StatusCode::BAD_REQUEST, "not json"),
            PortError::AnalysisFailure(_)
        ));
        assert!(matches!(
            error_from_status(StatusCode::INTERNAL_SERVER_ERROR, r#"{"detail":"boom"}"#),
            PortError::AnalysisFailure(_)
        ));
        assert!(matches!(
            error_from_status(StatusCode::BAD_GATEWAY, r#"{"detail":"Hand not visible"}"#),
            PortError::ValidationFailure(_)
        ));
    }
}
