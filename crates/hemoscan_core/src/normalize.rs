//! crates/hemoscan_core/src/normalize.rs
//!
//! The normalization rules every backend adapter funnels its numbers through,
//! so a result looks the same no matter where it came from.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    AnalysisResult, AnemiaClass, Explanation, FeatureDirection, Provenance, QualityFlags,
    RichPayload,
};

pub const COLOR_RATIO_FEATURE: &str = "Nail bed color ratio (R/G)";
pub const VASCULAR_DENSITY_FEATURE: &str = "Capillary vascular density";
pub const TEXTURE_FEATURE: &str = "Nail plate texture";

pub const EXPLANATION_COUNT: usize = 3;
const CI_HALF_WIDTH: f64 = 0.9;
const CONTRIBUTION_DEADBAND: f64 = 0.1;

//=========================================================================================
// Backend-agnostic intermediate shape
//=========================================================================================

/// One explanatory feature as a backend reported it.
#[derive(Debug, Clone, Default)]
pub struct RawFeature {
    pub name: String,
    pub direction: Option<String>,
    pub contribution: Option<f64>,
    pub impact: Option<String>,
}

/// What an adapter extracted from a backend response, before normalization.
#[derive(Debug, Clone)]
pub struct RawAnalysis {
    pub scan_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub hb_g_per_dl: f64,
    pub hb_ci_95: Option<(f64, f64)>,
    pub anemia_label: Option<String>,
    pub confidence: Option<f64>,
    pub uncertainty: Option<f64>,
    pub skin_tone_group: Option<i64>,
    pub quality: QualityFlags,
    pub features: Vec<RawFeature>,
    pub rich: Option<RichPayload>,
}

//=========================================================================================
// Rules
//=========================================================================================

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Classifies a hemoglobin estimate with the fixed client thresholds.
pub fn classify_hb(hb_g_per_dl: f64) -> AnemiaClass {
    if hb_g_per_dl < 8.0 {
        AnemiaClass::Severe
    } else if hb_g_per_dl < 9.5 {
        AnemiaClass::Moderate
    } else if hb_g_per_dl < 11.0 {
        AnemiaClass::Mild
    } else {
        AnemiaClass::Normal
    }
}

/// Maps a free-form backend label by substring, severe > moderate > mild > normal.
pub fn map_anemia_label(label: &str) -> AnemiaClass {
    let label = label.to_lowercase();
    if label.contains("severe") {
        AnemiaClass::Severe
    } else if label.contains("moderate") {
        AnemiaClass::Moderate
    } else if label.contains("mild") {
        AnemiaClass::Mild
    } else {
        AnemiaClass::Normal
    }
}

pub fn confidence_from_uncertainty(uncertainty: f64) -> f64 {
    round_to((1.0 - uncertainty).clamp(0.5, 0.99), 2)
}

pub fn direction_from_contribution(contribution: f64) -> FeatureDirection {
    if contribution < -CONTRIBUTION_DEADBAND {
        FeatureDirection::Low
    } else if contribution > CONTRIBUTION_DEADBAND {
        FeatureDirection::High
    } else {
        FeatureDirection::Normal
    }
}

fn parse_direction(label: &str) -> Option<FeatureDirection> {
    match label.trim().to_ascii_lowercase().as_str() {
        "low" => Some(FeatureDirection::Low),
        "high" => Some(FeatureDirection::High),
        "normal" => Some(FeatureDirection::Normal),
        _ => None,
    }
}

/// The ordered, rounded interval, synthesized as hb ± 0.9 when absent.
pub fn confidence_interval(hb_g_per_dl: f64, supplied: Option<(f64, f64)>) -> (f64, f64) {
    match supplied {
        Some((a, b)) => {
            let (a, b) = (round_to(a, 1), round_to(b, 1));
            if a <= b {
                (a, b)
            } else {
                (b, a)
            }
        }
        None => (
            round_to(hb_g_per_dl - CI_HALF_WIDTH, 1),
            round_to(hb_g_per_dl + CI_HALF_WIDTH, 1),
        ),
    }
}

pub fn placeholder_explanations() -> [Explanation; EXPLANATION_COUNT] {
    [
        Explanation {
            feature: COLOR_RATIO_FEATURE.to_string(),
            direction: FeatureDirection::Normal,
            impact: "Nail bed coloration within the expected range".to_string(),
        },
        Explanation {
            feature: VASCULAR_DENSITY_FEATURE.to_string(),
            direction: FeatureDirection::Normal,
            impact: "Capillary pattern within the expected range".to_string(),
        },
        Explanation {
            feature: TEXTURE_FEATURE.to_string(),
            direction: FeatureDirection::Normal,
            impact: "Surface texture did not affect the estimate".to_string(),
        },
    ]
}

fn to_explanation(raw: RawFeature) -> Explanation {
    let direction = raw
        .direction
        .as_deref()
        .and_then(parse_direction)
        .or_else(|| raw.contribution.map(direction_from_contribution))
        .unwrap_or(FeatureDirection::Normal);

    let impact = match (raw.impact, raw.contribution) {
        (Some(impact), _) if !impact.trim().is_empty() => impact,
        (_, Some(c)) => format!("{:+.2} contribution to the estimate", c),
        _ => "No notable effect on the estimate".to_string(),
    };

    Explanation {
        feature: raw.name,
        direction,
        impact,
    }
}

/// Keeps the top three features; pads from the generic placeholders when short.
pub fn normalize_explanations(features: Vec<RawFeature>) -> Vec<Explanation> {
    let mut explanations: Vec<Explanation> = features
        .into_iter()
        .take(EXPLANATION_COUNT)
        .map(to_explanation)
        .collect();

    let missing = EXPLANATION_COUNT - explanations.len();
    explanations.extend(placeholder_explanations().into_iter().take(missing));
    explanations
}

/// Produces the canonical record from an adapter's raw extraction.
pub fn normalize(raw: RawAnalysis, image_ref: &str, provenance: Provenance) -> AnalysisResult {
    let hb = round_to(raw.hb_g_per_dl, 1);
    let hb_ci_95 = confidence_interval(hb, raw.hb_ci_95);

    let anemia_class = match raw.anemia_label.as_deref() {
        Some(label) if !label.trim().is_empty() => map_anemia_label(label),
        _ => classify_hb(hb),
    };

    let confidence = match (raw.confidence, raw.uncertainty) {
        (Some(c), _) if c.is_finite() => c.clamp(0.0, 1.0),
        (_, Some(u)) if u.is_finite() => confidence_from_uncertainty(u),
        _ => 0.5,
    };

    let skin_tone_group = raw
        .skin_tone_group
        .map(|g| g.clamp(1, u8::MAX as i64) as u8)
        .unwrap_or(1);

    AnalysisResult {
        id: raw
            .scan_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        timestamp: raw.timestamp.unwrap_or_else(Utc::now),
        hb_g_per_dl: hb,
        hb_ci_95,
        anemia_class,
        confidence,
        skin_tone_group,
        quality: raw.quality,
        explanations: normalize_explanations(raw.features),
        image_ref: image_ref.to_string(),
        provenance,
        rich: raw.rich,
    }
}
