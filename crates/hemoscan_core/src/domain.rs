//! crates/hemoscan_core/src/domain.rs
//!
//! Defines the pure, core data structures for the screening client.
//! They carry serde derives because the local store keeps them as JSON text,
//! but nothing here knows about a particular backend or storage medium.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

//=========================================================================================
// Users & Sessions
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl std::str::FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" | "m" => Ok(Gender::Male),
            "female" | "f" => Ok(Gender::Female),
            "other" | "o" => Ok(Gender::Other),
            other => Err(format!("unknown gender '{}'", other)),
        }
    }
}

/// Represents a registered user - used throughout the app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub age: u8,
    pub gender: Gender,
    pub terms_accepted: bool,
    /// Epoch milliseconds.
    pub created_at: i64,
    #[serde(default)]
    pub share_data: bool,
}

// Only used internally for login/signup - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: User,
    pub hashed_password: String,
}

/// The authenticated context threaded through controller calls.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthContext {
    pub user: User,
}

impl AuthContext {
    pub fn user_id(&self) -> Uuid {
        self.user.id
    }
}

//=========================================================================================
// Captured images
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
        }
    }
}

/// A captured image: a self-describing blob (format + bytes).
#[derive(Debug, Clone)]
pub struct ImageBlob {
    pub name: String,
    pub format: ImageFormat,
    pub bytes: Vec<u8>,
}

//=========================================================================================
// Analysis results
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnemiaClass {
    Normal,
    Mild,
    Moderate,
    Severe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureDirection {
    Low,
    High,
    Normal,
}

/// Where the numbers in a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Model,
    Synthetic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityFlags {
    pub sharpness_ok: bool,
    pub brightness_ok: bool,
    pub glare_detected: bool,
}

impl QualityFlags {
    pub fn passing() -> Self {
        Self {
            sharpness_ok: true,
            brightness_ok: true,
            glare_detected: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub feature: String,
    pub direction: FeatureDirection,
    pub impact: String,
}

/// Extra images only the structured backend returns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RichPayload {
    pub explainability_overlay: Option<String>,
    pub original_snapshot: Option<String>,
    pub preprocessed_snapshot: Option<String>,
    pub segmentation_roi: Option<String>,
    pub tone_cluster: Option<i64>,
}

/// The canonical screening record, regardless of which backend produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub hb_g_per_dl: f64,
    pub hb_ci_95: (f64, f64),
    pub anemia_class: AnemiaClass,
    pub confidence: f64,
    pub skin_tone_group: u8,
    pub quality: QualityFlags,
    pub explanations: Vec<Explanation>,
    pub image_ref: String,
    pub provenance: Provenance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rich: Option<RichPayload>,
}

impl AnalysisResult {
    pub fn is_synthetic(&self) -> bool {
        self.provenance == Provenance::Synthetic
    }
}
