//! services/screening/src/gateway.rs
//!
//! The analysis gateway: one adapter per backend shape, chosen by configuration.

use async_trait::async_trait;
use hemoscan_core::{
    domain::{AnalysisResult, ImageBlob},
    ports::{AnalysisService, PortResult},
};

use crate::adapters::{GenerativeBackendAdapter, StructuredBackendAdapter};
use crate::config::{BackendKind, Config};

pub enum AnalysisGateway {
    Structured(StructuredBackendAdapter),
    Generative(GenerativeBackendAdapter),
}

impl AnalysisGateway {
    pub fn from_config(config: &Config) -> PortResult<Self> {
        Ok(match config.backend {
            BackendKind::Structured => AnalysisGateway::Structured(StructuredBackendAdapter::new(
                &config.backend_url,
                config.request_timeout,
            )?),
            BackendKind::Generative => AnalysisGateway::Generative(GenerativeBackendAdapter::new(
                config.generative_api_key.clone(),
                config.generative_api_base.clone(),
                config.generative_model.clone(),
                config.request_timeout,
            )),
        })
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            AnalysisGateway::Structured(_) => BackendKind::Structured,
            AnalysisGateway::Generative(_) => BackendKind::Generative,
        }
    }

    /// The structured adapter, for its scan lookup and report operations.
    pub fn structured(&self) -> Option<&StructuredBackendAdapter> {
        match self {
            AnalysisGateway::Structured(adapter) => Some(adapter),
            AnalysisGateway::Generative(_) => None,
        }
    }

    /// Whether the configured backend can currently produce model results.
    pub async fn health(&self) -> bool {
        match self {
            AnalysisGateway::Structured(adapter) => adapter.health().await,
            AnalysisGateway::Generative(adapter) => adapter.has_credential(),
        }
    }
}

#[async_trait]
impl AnalysisService for AnalysisGateway {
    async fn analyze(&self, image: &ImageBlob) -> PortResult<AnalysisResult> {
        match self {
            AnalysisGateway::Structured(adapter) => adapter.analyze(image).await,
            AnalysisGateway::Generative(adapter) => adapter.analyze(image).await,
        }
    }
}
