use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use crate::camera::Frame;
use crate::common::{Config, EnrollError, Result};
use crate::core::detector::FaceDetector;
use crate::core::expression::ExpressionClassifier;
use crate::core::signal::{FaceAnalysis, FaceObservation};

/// ONNX Runtime backed face analysis: detector plus optional expression
/// classifier. Models are loaded in [`FaceAnalysis::load`], not in `new`.
pub struct OrtFaceAnalysis {
    config: Config,
    models_base: PathBuf,
    detector: Option<FaceDetector>,
    expressions: Option<ExpressionClassifier>,
}

impl OrtFaceAnalysis {
    pub fn new(config: &Config, models_base: PathBuf) -> Self {
        Self {
            config: config.clone(),
            models_base,
            detector: None,
            expressions: None,
        }
    }

    pub fn has_expressions(&self) -> bool {
        self.expressions.is_some()
    }
}

#[async_trait(?Send)]
impl FaceAnalysis for OrtFaceAnalysis {
    async fn load(&mut self) -> Result<()> {
        let detector = FaceDetector::new_with_model_path(&self.config, &self.models_base)?;

        let expressions = match &self.config.models.expression_path {
            Some(path) => {
                let path = Config::resolve_model_path(path, &self.models_base);
                Some(ExpressionClassifier::new_with_model_path(&self.config, &path)?)
            }
            None => {
                tracing::warn!("No expression model configured; smile scores will be empty");
                None
            }
        };

        self.detector = Some(detector);
        self.expressions = expressions;
        Ok(())
    }

    async fn detect(&self, frame: &Frame) -> Result<Option<FaceObservation>> {
        let detector = self
            .detector
            .as_ref()
            .ok_or_else(|| EnrollError::Model("Face analysis used before load".into()))?;

        let Some(face) = detector.detect(&frame.image)?.into_iter().next() else {
            return Ok(None);
        };

        let expressions = match &self.expressions {
            Some(classifier) => classifier.classify(&frame.image, &face)?,
            None => HashMap::new(),
        };

        Ok(Some(FaceObservation { face, expressions }))
    }
}
