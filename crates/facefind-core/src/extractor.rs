//! Embedding extractor seam and model-readiness gate.
//!
//! The extractor is an opaque capability: given a frame it yields a
//! descriptor, an explicit "no face" answer, or an error. Nothing here
//! assumes how the model works or where it runs.

use crate::types::{Descriptor, Frame};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("model load failed: {0}")]
    ModelLoad(String),
    #[error("model not loaded")]
    NotLoaded,
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),
    #[error("extractor unreachable: {0}")]
    Unreachable(String),
}

/// Result of a successful extractor call.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Face(Descriptor),
    NoFace,
}

#[async_trait]
pub trait FaceExtractor: Send + Sync {
    /// One-time model load. Must complete before `extract` is useful.
    async fn load(&self) -> Result<(), ExtractorError>;

    /// Detect a single face in the frame and describe it.
    async fn extract(&self, frame: &Frame) -> Result<Extraction, ExtractorError>;
}

/// Load state of the extractor's model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ModelStatus {
    Loading,
    Ready,
    Unavailable(String),
}

/// Read side of the model-load result, shared with capture sessions.
#[derive(Debug, Clone)]
pub struct ModelGate {
    rx: watch::Receiver<ModelStatus>,
}

impl ModelGate {
    /// Spawn the one-time load on the current tokio runtime.
    pub fn spawn_load(extractor: Arc<dyn FaceExtractor>) -> Self {
        let (tx, rx) = watch::channel(ModelStatus::Loading);
        tokio::spawn(async move {
            let status = match extractor.load().await {
                Ok(()) => {
                    tracing::info!("face model loaded");
                    ModelStatus::Ready
                }
                Err(e) => {
                    tracing::warn!(error = %e, "face model unavailable; search disabled");
                    ModelStatus::Unavailable(e.to_string())
                }
            };
            let _ = tx.send(status);
        });
        Self { rx }
    }

    /// A gate pinned to a fixed status.
    pub fn fixed(status: ModelStatus) -> Self {
        let (_tx, rx) = watch::channel(status);
        Self { rx }
    }

    pub fn status(&self) -> ModelStatus {
        self.rx.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        *self.rx.borrow() == ModelStatus::Ready
    }

    /// Wait until loading has finished either way.
    pub async fn settled(&mut self) -> ModelStatus {
        let _ = self.rx.wait_for(|s| *s != ModelStatus::Loading).await;
        self.status()
    }
}
