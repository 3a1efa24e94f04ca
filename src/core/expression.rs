use crate::common::{Config, EnrollError, Result};
use crate::core::detector::{load_session, FaceBox};
use ort::{Environment, Session, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use image::{imageops::FilterType, DynamicImage};
use ndarray::{Array4, CowArray};

/// Output order of the expression classifier.
pub const EXPRESSION_LABELS: [&str; 7] = [
    "neutral", "happy", "sad", "angry", "fearful", "disgusted", "surprised",
];

/// Seven-class facial expression classifier over a grayscale face crop.
pub struct ExpressionClassifier {
    session: Session,
    _environment: Arc<Environment>,
    input_size: u32,
}

impl ExpressionClassifier {
    pub fn new_with_model_path(config: &Config, model_path: &Path) -> Result<Self> {
        let (session, environment) =
            load_session("face_expression", model_path, config.performance.optimization_level)?;

        Ok(Self {
            session,
            _environment: environment,
            input_size: config.detector.expression_input_size,
        })
    }

    pub fn classify(&self, image: &DynamicImage, face: &FaceBox) -> Result<HashMap<String, f32>> {
        let crop = crop_face(image, face);
        let resized = crop.resize_exact(self.input_size, self.input_size, FilterType::Triangle);
        let input_array = self.preprocess(&resized);

        let cow_array = CowArray::from(input_array.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;
        let outputs = self.session.run(vec![input_tensor])?;

        let first = outputs
            .first()
            .ok_or_else(|| EnrollError::Model("Expression model returned no outputs".into()))?;
        let logits = first.try_extract::<f32>()?.view().iter().copied().collect::<Vec<_>>();
        if logits.len() < EXPRESSION_LABELS.len() {
            return Err(EnrollError::Model(format!(
                "Expression model returned {} scores, expected {}", logits.len(), EXPRESSION_LABELS.len()
            )));
        }

        Ok(label_scores(&softmax(&logits[..EXPRESSION_LABELS.len()])))
    }

    fn preprocess(&self, img: &DynamicImage) -> Array4<f32> {
        let gray = img.to_luma8();
        let size = self.input_size as usize;
        let mut array = Array4::<f32>::zeros((1, 1, size, size));

        for (x, y, pixel) in gray.enumerate_pixels() {
            array[[0, 0, y as usize, x as usize]] = pixel[0] as f32 / 255.0;
        }

        array
    }
}

pub(crate) fn crop_face(image: &DynamicImage, face: &FaceBox) -> DynamicImage {
    let x = face.x1.max(0.0) as u32;
    let y = face.y1.max(0.0) as u32;
    let width = face.width().max(1.0) as u32;
    let height = face.height().max(1.0) as u32;

    image.crop_imm(x, y, width, height)
}

pub(crate) fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum == 0.0 || !sum.is_finite() {
        return vec![0.0; logits.len()];
    }
    exps.into_iter().map(|e| e / sum).collect()
}

fn label_scores(probabilities: &[f32]) -> HashMap<String, f32> {
    EXPRESSION_LABELS
        .iter()
        .zip(probabilities)
        .map(|(label, p)| (label.to_string(), *p))
        .collect()
}
