use crate::core::detector::FaceBox;
use image::DynamicImage;

#[derive(Debug, Clone)]
pub struct QualityMetrics {
    pub detection_confidence: f32,
    pub face_size_ratio: f32,
    pub face_centering_score: f32,
    pub brightness_score: f32,
    pub contrast_score: f32,
    pub overall_score: f32,
}

impl QualityMetrics {
    /// Quality of a detected face within its frame.
    pub fn calculate(image: &DynamicImage, face: &FaceBox) -> Self {
        let detection_confidence = face.confidence.clamp(0.0, 1.0);

        let img_width = image.width().max(1) as f32;
        let img_height = image.height().max(1) as f32;
        let face_area = face.width() * face.height();
        let face_size_ratio = (face_area / (img_width * img_height)).clamp(0.0, 1.0);

        let (face_center_x, face_center_y) = face.center();
        let img_center_x = img_width / 2.0;
        let img_center_y = img_height / 2.0;
        let x_offset = ((face_center_x - img_center_x).abs() / img_center_x).min(1.0);
        let y_offset = ((face_center_y - img_center_y).abs() / img_center_y).min(1.0);
        let face_centering_score = 1.0 - (x_offset + y_offset) / 2.0;

        let (brightness_score, contrast_score) = region_brightness_contrast(image, face);

        let overall_score = detection_confidence * 0.3
            + face_size_ratio * 0.2
            + face_centering_score * 0.2
            + brightness_score * 0.15
            + contrast_score * 0.15;

        QualityMetrics {
            detection_confidence,
            face_size_ratio,
            face_centering_score,
            brightness_score,
            contrast_score,
            overall_score,
        }
    }

    pub fn meets_minimum_requirements(&self, min_quality: f32) -> bool {
        self.overall_score >= min_quality
    }

    /// Short hint for the subject, most pressing problem first.
    pub fn primary_suggestion(&self) -> Option<&'static str> {
        if self.face_size_ratio < 0.05 {
            Some("Move closer to the camera")
        } else if self.face_size_ratio > 0.5 {
            Some("Move back from the camera")
        } else if self.face_centering_score < 0.7 {
            Some("Center your face in the camera view")
        } else if self.brightness_score < 0.5 {
            Some("Increase lighting - the image is too dark")
        } else if self.contrast_score < 0.3 {
            Some("Improve lighting for better contrast")
        } else {
            None
        }
    }
}

fn region_brightness_contrast(image: &DynamicImage, face: &FaceBox) -> (f32, f32) {
    let gray = image.to_luma8();

    let x1 = face.x1.max(0.0) as u32;
    let y1 = face.y1.max(0.0) as u32;
    let x2 = face.x2.min(gray.width() as f32) as u32;
    let y2 = face.y2.min(gray.height() as f32) as u32;

    if x2 <= x1 || y2 <= y1 {
        return (0.5, 0.5);
    }

    let mut sum = 0u64;
    let mut sum_sq = 0u64;
    let mut count = 0u32;

    for y in y1..y2 {
        for x in x1..x2 {
            let pixel = gray.get_pixel(x, y)[0] as u64;
            sum += pixel;
            sum_sq += pixel * pixel;
            count += 1;
        }
    }

    if count == 0 {
        return (0.5, 0.5);
    }

    let mean = sum as f32 / count as f32;
    let variance = ((sum_sq as f32 / count as f32) - (mean * mean)).max(0.0);
    let std_dev = variance.sqrt();

    // Ideal mean sits mid-range for 8-bit images.
    let brightness_score = 1.0 - ((mean - 127.5).abs() / 127.5).min(1.0);
    let contrast_score = (std_dev / 64.0).min(1.0);

    (brightness_score, contrast_score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn face(x1: f32, y1: f32, x2: f32, y2: f32) -> FaceBox {
        FaceBox { x1, y1, x2, y2, confidence: 0.9 }
    }

    #[test]
    fn centered_face_scores_higher_than_corner_face() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_fn(100, 100, |x, y| Luma([((x + y) % 256) as u8])));
        let centered = QualityMetrics::calculate(&img, &face(30.0, 30.0, 70.0, 70.0));
        let corner = QualityMetrics::calculate(&img, &face(0.0, 0.0, 20.0, 20.0));
        assert!(centered.face_centering_score > corner.face_centering_score);
        assert!(centered.overall_score > corner.overall_score);
    }

    #[test]
    fn flat_dark_region_has_no_contrast() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(50, 50, Luma([0])));
        let q = QualityMetrics::calculate(&img, &face(10.0, 10.0, 40.0, 40.0));
        assert_eq!(q.contrast_score, 0.0);
        assert_eq!(q.brightness_score, 0.0);
        assert!(q.primary_suggestion().is_some());
    }

    #[test]
    fn degenerate_box_uses_neutral_defaults() {
        let img = DynamicImage::ImageLuma8(GrayImage::new(10, 10));
        let q = QualityMetrics::calculate(&img, &face(5.0, 5.0, 5.0, 5.0));
        assert_eq!(q.brightness_score, 0.5);
        assert_eq!(q.contrast_score, 0.5);
    }
}
