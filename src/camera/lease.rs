use std::ops::{Deref, DerefMut};
use crate::camera::CaptureDevice;

/// Exclusive hold on a capture device for the liveness stage.
///
/// The device is released exactly once: explicitly through
/// [`CameraLease::release`] or when the lease is dropped.
pub struct CameraLease<D: CaptureDevice> {
    device: D,
    released: bool,
}

impl<D: CaptureDevice> CameraLease<D> {
    pub fn new(device: D) -> Self {
        tracing::debug!("Camera acquired");
        Self { device, released: false }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn release(&mut self) {
        if !self.released {
            self.device.release();
            self.released = true;
            tracing::info!("Camera released");
        }
    }
}

impl<D: CaptureDevice> Deref for CameraLease<D> {
    type Target = D;

    fn deref(&self) -> &D {
        &self.device
    }
}

impl<D: CaptureDevice> DerefMut for CameraLease<D> {
    fn deref_mut(&mut self) -> &mut D {
        &mut self.device
    }
}

impl<D: CaptureDevice> Drop for CameraLease<D> {
    fn drop(&mut self) {
        self.release();
    }
}
