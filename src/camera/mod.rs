pub mod lease;
pub mod v4l2;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::{DynamicImage, ImageOutputFormat};
use std::io::Cursor;
use crate::core::store::EncodedImage;
use crate::error::Result;

pub use lease::CameraLease;
pub use v4l2::{V4l2Camera, V4l2CameraSource};

/// One still frame pulled from the capture device.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: DynamicImage,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: DynamicImage) -> Self {
        Self { image, captured_at: Utc::now() }
    }

    pub fn encode_png(&self) -> Result<EncodedImage> {
        let mut bytes = Vec::new();
        self.image.write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)?;
        Ok(EncodedImage::png(bytes))
    }
}

/// An acquired capture device.
#[async_trait(?Send)]
pub trait CaptureDevice {
    /// Next frame, or `Ok(None)` while the source is transiently unreadable.
    async fn get_frame(&mut self) -> Result<Option<Frame>>;

    /// Give the device back. Must be idempotent.
    fn release(&mut self);
}

/// Where capture devices come from. Permission denied or a missing device is
/// reported as [`crate::EnrollError::Camera`].
#[async_trait(?Send)]
pub trait CameraSource {
    type Device: CaptureDevice;

    async fn acquire(&mut self) -> Result<Self::Device>;
}
