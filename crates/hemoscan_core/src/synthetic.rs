//! crates/hemoscan_core/src/synthetic.rs
//!
//! Fabricates a plausible, clearly tagged result when no live model answered.
//! Values are random; only the schema and the ranges are stable.

use chrono::Utc;
use rand::Rng;
use uuid::Uuid;

use crate::domain::{AnalysisResult, Explanation, FeatureDirection, Provenance, QualityFlags};
use crate::normalize::{
    classify_hb, confidence_interval, round_to, COLOR_RATIO_FEATURE, TEXTURE_FEATURE,
    VASCULAR_DENSITY_FEATURE,
};

/// Builds a synthetic result with the thread-local generator.
pub fn synthesize(image_ref: &str) -> AnalysisResult {
    synthesize_with(&mut rand::thread_rng(), image_ref)
}

pub fn synthesize_with<R: Rng + ?Sized>(rng: &mut R, image_ref: &str) -> AnalysisResult {
    let hb = round_to(rng.gen_range(9.0..=13.0), 1);
    let confidence = round_to(rng.gen_range(0.85..=0.95), 2);

    let color_direction = if hb < 12.0 {
        FeatureDirection::Low
    } else {
        FeatureDirection::Normal
    };
    let vascular_direction = if hb < 11.0 {
        FeatureDirection::Low
    } else {
        FeatureDirection::Normal
    };

    let explanations = vec![
        Explanation {
            feature: COLOR_RATIO_FEATURE.to_string(),
            direction: color_direction,
            impact: match color_direction {
                FeatureDirection::Low => "Paler nail bed suggests reduced hemoglobin".to_string(),
                _ => "Nail bed coloration within the expected range".to_string(),
            },
        },
        Explanation {
            feature: VASCULAR_DENSITY_FEATURE.to_string(),
            direction: vascular_direction,
            impact: match vascular_direction {
                FeatureDirection::Low => "Sparse capillary pattern lowers the estimate".to_string(),
                _ => "Capillary pattern within the expected range".to_string(),
            },
        },
        Explanation {
            feature: TEXTURE_FEATURE.to_string(),
            direction: FeatureDirection::Normal,
            impact: "Surface texture did not affect the estimate".to_string(),
        },
    ];

    AnalysisResult {
        id: Uuid::new_v4().to_string(),
        timestamp: Utc::now(),
        hb_g_per_dl: hb,
        hb_ci_95: confidence_interval(hb, None),
        anemia_class: classify_hb(hb),
        confidence,
        skin_tone_group: rng.gen_range(1..=5),
        quality: QualityFlags::passing(),
        explanations,
        image_ref: image_ref.to_string(),
        provenance: Provenance::Synthetic,
        rich: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn synthetic_results_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let result = synthesize_with(&mut rng, "capture.png");
            assert!((9.0..=13.0).contains(&result.hb_g_per_dl));
            assert!((0.85..=0.95).contains(&result.confidence));
            assert!((1..=5).contains(&result.skin_tone_group));
            assert!(result.hb_ci_95.0 <= result.hb_ci_95.1);
            assert_eq!(result.anemia_class, classify_hb(result.hb_g_per_dl));
            assert_eq!(result.quality, QualityFlags::passing());
            assert_eq!(result.explanations.len(), 3);
            assert_eq!(result.provenance, Provenance::Synthetic);
            assert_eq!(result.image_ref, "capture.png");
        }
    }

    #[test]
    fn color_feature_direction_tracks_estimate() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let result = synthesize_with(&mut rng, "x");
            let color = &result.explanations[0];
            assert_eq!(color.feature, COLOR_RATIO_FEATURE);
            if result.hb_g_per_dl < 12.0 {
                assert_eq!(color.direction, FeatureDirection::Low);
            } else {
                assert_eq!(color.direction, FeatureDirection::Normal);
            }
        }
    }
}
