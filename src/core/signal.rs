//! Face Signal Adapter: wraps the external face-analysis capability and turns
//! one frame into a [`FaceSignal`].

use async_trait::async_trait;
use std::collections::HashMap;
use crate::camera::Frame;
use crate::core::detector::FaceBox;
use crate::core::quality::QualityMetrics;
use crate::error::{EnrollError, Result};

/// What the analysis capability found for the most prominent face.
#[derive(Debug, Clone)]
pub struct FaceObservation {
    pub face: FaceBox,
    pub expressions: HashMap<String, f32>,
}

/// The external face-analysis capability.
///
/// `load` runs once before the first `detect`. `detect` returns `Ok(None)`
/// when the frame has no face.
#[async_trait(?Send)]
pub trait FaceAnalysis {
    async fn load(&mut self) -> Result<()>;

    async fn detect(&self, frame: &Frame) -> Result<Option<FaceObservation>>;
}

/// Per-frame result. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceSignal {
    pub face_detected: bool,
    pub expression_scores: HashMap<String, f32>,
    pub face: Option<FaceBox>,
    /// Overall capture quality of the face region, 0..=1.
    pub quality: Option<f32>,
}

impl FaceSignal {
    pub fn no_face() -> Self {
        Self {
            face_detected: false,
            expression_scores: HashMap::new(),
            face: None,
            quality: None,
        }
    }

    /// Score for an expression label, 0.0 when absent.
    pub fn expression(&self, label: &str) -> f32 {
        self.expression_scores.get(label).copied().unwrap_or(0.0)
    }
}

pub struct FaceSignalAdapter<A> {
    analysis: A,
}

impl<A: FaceAnalysis> FaceSignalAdapter<A> {
    /// Load the capability's assets. A failure here is fatal for the
    /// session and always surfaces as [`EnrollError::Model`].
    pub async fn initialize(mut analysis: A) -> Result<Self> {
        if let Err(e) = analysis.load().await {
            tracing::error!("Face analysis failed to load: {}", e);
            return Err(match e {
                EnrollError::Model(_) => e,
                other => EnrollError::Model(other.to_string()),
            });
        }
        tracing::info!("Face analysis loaded");
        Ok(Self { analysis })
    }

    pub async fn analyze(&self, frame: &Frame) -> Result<FaceSignal> {
        let observation = match self.analysis.detect(frame).await? {
            Some(obs) => obs,
            None => return Ok(FaceSignal::no_face()),
        };

        let quality = QualityMetrics::calculate(&frame.image, &observation.face);
        Ok(FaceSignal {
            face_detected: true,
            expression_scores: observation.expressions,
            face: Some(observation.face),
            quality: Some(quality.overall_score),
        })
    }

    pub fn analysis(&self) -> &A {
        &self.analysis
    }
}
