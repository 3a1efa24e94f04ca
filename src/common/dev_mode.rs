use std::path::PathBuf;
use std::fs;
use image::{DynamicImage, Rgb};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use crate::core::challenge::Challenge;
use crate::core::detector::FaceBox;
use crate::core::store::CaptureStore;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct DevMode {
    enabled: bool,
    base_dir: PathBuf,
}

impl DevMode {
    pub fn new(enabled: bool) -> Result<Self> {
        Self::with_base_dir(enabled, PathBuf::from("./dev_data"))
    }

    pub fn with_base_dir(enabled: bool, base_dir: PathBuf) -> Result<Self> {
        if enabled {
            fs::create_dir_all(base_dir.join("captures"))?;
            fs::create_dir_all(base_dir.join("sessions"))?;

            tracing::info!("Development mode enabled - data will be saved to: {}",
                     base_dir.display());
        }

        Ok(Self { enabled, base_dir })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn captures_dir(&self) -> PathBuf {
        self.base_dir.join("captures")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.base_dir.join("sessions")
    }

    pub fn get_capture_path(&self, prefix: &str) -> PathBuf {
        if self.enabled {
            let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            self.captures_dir().join(format!("{}_{}.png", prefix, timestamp))
        } else {
            PathBuf::from(format!("{}.png", prefix))
        }
    }

    /// Write every committed image to the captures directory. No-op outside
    /// dev mode.
    pub fn dump_evidence(&self, subject: &str, store: &CaptureStore) -> Result<Vec<PathBuf>> {
        if !self.enabled {
            return Ok(Vec::new());
        }

        let mut written = Vec::new();
        for challenge in Challenge::ORDER {
            if let Some(evidence) = store.get(challenge) {
                let path = self.get_capture_path(&format!("{}_{}", subject, challenge.wire_name()));
                fs::write(&path, &evidence.image.bytes)?;
                written.push(path);
            }
        }
        tracing::debug!("Saved {} evidence images for subject {}", written.len(), subject);
        Ok(written)
    }
}

/// Copy of `image` with the detected face outlined, for debug captures.
pub fn annotate_face(image: &DynamicImage, face: &FaceBox) -> DynamicImage {
    let mut img = image.to_rgb8();
    let (w, h) = img.dimensions();

    let x1 = (face.x1.max(0.0) as u32).min(w.saturating_sub(1));
    let y1 = (face.y1.max(0.0) as u32).min(h.saturating_sub(1));
    let x2 = (face.x2.max(0.0) as u32).min(w);
    let y2 = (face.y2.max(0.0) as u32).min(h);
    let rect_width = x2.saturating_sub(x1).max(1);
    let rect_height = y2.saturating_sub(y1).max(1);

    let color = if face.confidence > 0.5 { Rgb([0, 255, 0]) } else { Rgb([255, 165, 0]) };
    draw_hollow_rect_mut(&mut img, Rect::at(x1 as i32, y1 as i32).of_size(rect_width, rect_height), color);
    if rect_width > 2 && rect_height > 2 {
        let inner = Rect::at(x1 as i32 + 1, y1 as i32 + 1).of_size(rect_width - 2, rect_height - 2);
        draw_hollow_rect_mut(&mut img, inner, color);
    }

    DynamicImage::ImageRgb8(img)
}
