//! crates/hemoscan_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the client's core logic.
//! These traits form the boundary of the hexagonal architecture, so the core
//! stays independent of the HTTP backends and of the persistence medium.

use async_trait::async_trait;

use crate::domain::{AnalysisResult, ImageBlob};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// The error taxonomy shared by every port.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PortError {
    #[error("An account with this email already exists")]
    DuplicateEmail,
    #[error("Invalid email or password")]
    InvalidCredentials,
    /// The image or the input was rejected, e.g. no hand detected.
    #[error("{0}")]
    ValidationFailure(String),
    #[error("Analysis failed: {0}")]
    AnalysisFailure(String),
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// A durable key-value medium holding JSON text.
///
/// Single values and lists live side by side; `append_to_list` and `read_list`
/// operate on keys whose value is a JSON array.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Writes a new key. Fails with `Unexpected` if the key already exists.
    async fn insert(&self, key: &str, value: &str) -> PortResult<()>;

    async fn find_by_key(&self, key: &str) -> PortResult<Option<String>>;

    /// Writes a key, creating it when absent.
    async fn update(&self, key: &str, value: &str) -> PortResult<()>;

    async fn remove(&self, key: &str) -> PortResult<()>;

    /// Appends one JSON item to the array stored under `key`, creating it if absent.
    async fn append_to_list(&self, key: &str, item: &str) -> PortResult<()>;

    /// Reads every item of the array stored under `key`, in insertion order.
    async fn read_list(&self, key: &str) -> PortResult<Vec<String>>;
}

/// Turns a captured image into a canonical result.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    async fn analyze(&self, image: &ImageBlob) -> PortResult<AnalysisResult>;
}
