//! services/screening/src/adapters/generative.rs
//!
//! This module contains the adapter for the generative-AI fallback backend.
//! It implements the `AnalysisService` port from the `core` crate using an
//! OpenAI-compatible chat completion that returns a flat JSON object.
//!
//! This path never fails: when no credential is configured, or the call or the
//! parse goes wrong, it hands back a synthetic result tagged as such.

use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContentPart,
        CreateChatCompletionRequestArgs, ImageDetail, ImageUrlArgs, ResponseFormat,
    },
    Client,
};
use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use hemoscan_core::{
    domain::{AnalysisResult, ImageBlob, Provenance, QualityFlags},
    normalize::{normalize, RawAnalysis, RawFeature},
    ports::{AnalysisService, PortError, PortResult},
    synthetic::synthesize,
};
use serde::Deserialize;
use tracing::{info, warn};

const SYSTEM_INSTRUCTIONS: &str = r#"You are a clinical screening assistant estimating blood hemoglobin from a photograph of a fingernail bed.

Respond with ONE flat JSON object and nothing else: no prose, no markdown, no code fences.

The object must have exactly these fields:
- "hb_g_per_dl": number, estimated hemoglobin in g/dL
- "anemia_class": one of "Normal", "Mild", "Moderate", "Severe"
- "confidence": number between 0 and 1
- "skin_tone_group": integer from 1 (lightest) to 5 (darkest)
- "quality_flags": {"sharpness_ok": boolean, "brightness_ok": boolean, "glare_detected": boolean}
- "explanation": array of up to 3 objects {"feature": string, "direction": "low" | "high" | "normal", "impact": string}"#;

const USER_INSTRUCTION: &str =
    "Analyze this nail-bed image and return the JSON object described in your instructions.";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `AnalysisService` using an OpenAI-compatible vision model.
#[derive(Clone)]
pub struct GenerativeBackendAdapter {
    client: Option<Client<OpenAIConfig>>,
    model: String,
    timeout: Duration,
}

impl GenerativeBackendAdapter {
    /// Creates a new `GenerativeBackendAdapter`.
    ///
    /// Without an API key the adapter only ever produces synthetic results.
    pub fn new(
        api_key: Option<String>,
        api_base: Option<String>,
        model: String,
        timeout: Duration,
    ) -> Self {
        let client = api_key.map(|key| {
            let mut config = OpenAIConfig::new().with_api_key(key);
            if let Some(base) = api_base {
                config = config.with_api_base(base);
            }
            Client::with_config(config)
        });
        Self {
            client,
            model,
            timeout,
        }
    }

    pub fn has_credential(&self) -> bool {
        self.client.is_some()
    }

    async fn request_analysis(
        &self,
        client: &Client<OpenAIConfig>,
        image: &ImageBlob,
    ) -> PortResult<AnalysisResult> {
        let data_url = format!(
            "data:{};base64,{}",
            image.format.mime_type(),
            Base64::encode_string(&image.bytes)
        );

        let parts: Vec<ChatCompletionRequestUserMessageContentPart> = vec![
            ChatCompletionRequestMessageContentPartTextArgs::default()
                .text(USER_INSTRUCTION)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestMessageContentPartImageArgs::default()
                .image_url(
                    ImageUrlArgs::default()
                        .url(data_url)
                        .detail(ImageDetail::High)
                        .build()
                        .map_err(|e| PortError::Unexpected(e.to_string()))?,
                )
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_INSTRUCTIONS)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(parts)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .response_format(ResponseFormat::JsonObject)
            .n(1)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, client.chat().create(request))
            .await
            .map_err(|_| PortError::AnalysisFailure("Generative request timed out".to_string()))?
            .map_err(|e: OpenAIError| PortError::AnalysisFailure(e.to_string()))?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                PortError::AnalysisFailure("Generative response contained no text".to_string())
            })?;

        let raw = parse_payload(&content)?;
        Ok(normalize(raw, &image.name, Provenance::Model))
    }
}

//=========================================================================================
// "Impure" Payload Record Structs
//=========================================================================================

#[derive(Deserialize)]
struct GenerativePayload {
    #[serde(alias = "hb_estimate")]
    hb_g_per_dl: f64,
    hb_ci_95: Option<Vec<f64>>,
    anemia_class: Option<String>,
    confidence: Option<f64>,
    #[serde(alias = "tone_group")]
    skin_tone_group: Option<i64>,
    quality_flags: Option<QualityFlagsRecord>,
    #[serde(default)]
    explanation: Vec<ExplanationRecord>,
}

#[derive(Deserialize)]
struct QualityFlagsRecord {
    #[serde(default = "yes")]
    sharpness_ok: bool,
    #[serde(default = "yes")]
    brightness_ok: bool,
    #[serde(default)]
    glare_detected: bool,
}

fn yes() -> bool {
    true
}

#[derive(Deserialize)]
struct ExplanationRecord {
    #[serde(alias = "name")]
    feature: String,
    direction: Option<String>,
    impact: Option<String>,
}

/// Parses the model's reply, tolerating a stray code fence around the object.
fn parse_payload(content: &str) -> PortResult<RawAnalysis> {
    let trimmed = content.trim();
    let json = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let payload: GenerativePayload = serde_json::from_str(json)
        .map_err(|e| PortError::AnalysisFailure(format!("Unparseable model output: {}", e)))?;

    if !payload.hb_g_per_dl.is_finite() || !(0.0..=25.0).contains(&payload.hb_g_per_dl) {
        return Err(PortError::AnalysisFailure(format!(
            "Implausible hemoglobin estimate {}",
            payload.hb_g_per_dl
        )));
    }

    Ok(RawAnalysis {
        scan_id: None,
        timestamp: None,
        hb_g_per_dl: payload.hb_g_per_dl,
        hb_ci_95: payload
            .hb_ci_95
            .filter(|ci| ci.len() == 2)
            .map(|ci| (ci[0], ci[1])),
        anemia_label: payload.anemia_class,
        confidence: payload.confidence,
        uncertainty: None,
        skin_tone_group: payload.skin_tone_group,
        quality: payload
            .quality_flags
            .map(|q| QualityFlags {
                sharpness_ok: q.sharpness_ok,
                brightness_ok: q.brightness_ok,
                glare_detected: q.glare_detected,
            })
            .unwrap_or_else(QualityFlags::passing),
        features: payload
            .explanation
            .into_iter()
            .map(|e| RawFeature {
                name: e.feature,
                direction: e.direction,
                contribution: None,
                impact: e.impact,
            })
            .collect(),
        rich: None,
    })
}

//=========================================================================================
// `AnalysisService` Trait Implementation
//=========================================================================================

#[async_trait]
impl AnalysisService for GenerativeBackendAdapter {
    async fn analyze(&self, image: &ImageBlob) -> PortResult<AnalysisResult> {
        let Some(client) = &self.client else {
            warn!("No generative API key configured; returning a synthetic result");
            return Ok(synthesize(&image.name));
        };

        match self.request_analysis(client, image).await {
            Ok(result) => {
                info!("Generative analysis complete: hb={} g/dL", result.hb_g_per_dl);
                Ok(result)
            }
            Err(e) => {
                warn!("Generative analysis failed ({}); returning a synthetic result", e);
                Ok(synthesize(&image.name))
            }
        }
    }
}
