use crate::camera::{CameraSource, CaptureDevice, Frame};
use crate::common::config::CameraConfig;
use crate::common::{EnrollError, Result};
use async_trait::async_trait;
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};
use image::{DynamicImage, GrayImage, ImageFormat};
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::watch;

/// Opens V4L2 devices per the camera config.
pub struct V4l2CameraSource {
    config: CameraConfig,
}

impl V4l2CameraSource {
    pub fn new(config: &CameraConfig) -> Self {
        Self { config: config.clone() }
    }
}

#[async_trait(?Send)]
impl CameraSource for V4l2CameraSource {
    type Device = V4l2Camera;

    async fn acquire(&mut self) -> Result<V4l2Camera> {
        let index = if self.config.device_index == 999 {
            V4l2Camera::auto_detect()?
        } else {
            self.config.device_index
        };
        V4l2Camera::open(index, &self.config)
    }
}

/// A V4L2 camera streaming on its own capture thread.
///
/// The thread keeps the most recent decoded frame in a watch channel;
/// `get_frame` hands out that frame and never blocks the event loop.
pub struct V4l2Camera {
    index: u32,
    latest: watch::Receiver<Option<Frame>>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl V4l2Camera {
    pub fn open(index: u32, config: &CameraConfig) -> Result<Self> {
        tracing::info!("Opening camera device {}...", index);

        let device = Device::new(index as usize)
            .map_err(|e| EnrollError::Camera(format!("Failed to open camera {}: {}", index, e)))?;

        let caps = device.query_caps()
            .map_err(|e| EnrollError::Camera(format!("Failed to query capabilities: {}", e)))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            // Some IR devices only report metadata capture but still stream.
            tracing::warn!("Device {} may not support standard video capture ({:?})", index, caps.capabilities);
        }

        let mut fmt = device.format()
            .map_err(|e| EnrollError::Camera(format!("Failed to get format: {}", e)))?;
        fmt.width = config.width;
        fmt.height = config.height;
        if fmt.fourcc.repr != *b"GREY" {
            fmt.fourcc = FourCC::new(b"MJPG");
        }
        if let Err(e) = device.set_format(&fmt) {
            tracing::warn!("Could not set exact format: {}. Using device defaults.", e);
        }

        let format = device.format()
            .map_err(|e| EnrollError::Camera(format!("Failed to get final format: {}", e)))?;
        if format.width != config.width || format.height != config.height {
            tracing::warn!("Camera resolution {}x{} differs from requested {}x{}",
                format.width, format.height, config.width, config.height);
        }

        let (tx, latest) = watch::channel(None);
        let stop = Arc::new(AtomicBool::new(false));
        let worker = {
            let stop = stop.clone();
            let warmup_frames = config.warmup_frames;
            let warmup_delay = Duration::from_millis(config.warmup_delay_ms);
            std::thread::Builder::new()
                .name(format!("camera-{}", index))
                .spawn(move || capture_loop(device, format, warmup_frames, warmup_delay, tx, stop))?
        };

        Ok(Self { index, latest, stop, worker: Some(worker) })
    }

    /// List all video devices: (index, card name, features, likely IR).
    pub fn list_all_cameras() -> Result<Vec<(u32, String, Vec<String>, bool)>> {
        let mut cameras = Vec::new();

        for index in video_device_indices()? {
            let Ok(device) = Device::new(index as usize) else { continue };
            let Ok(caps) = device.query_caps() else { continue };

            let mut features = Vec::new();
            let mut likely_ir = false;

            if caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                features.push("VIDEO_CAPTURE".to_string());
            }

            for fmt in device.enum_formats().unwrap_or_default() {
                let fourcc = fmt.fourcc.str().unwrap_or("UNKNOWN");
                match fourcc {
                    "GREY" | "Y8" | "Y16" => {
                        features.push(format!("Grayscale ({})", fourcc));
                        likely_ir = true;
                    }
                    "MJPG" | "YUYV" => features.push(format!("Color ({})", fourcc)),
                    _ => {}
                }
            }

            if caps.card.contains("IR") || caps.card.contains("Infrared") {
                likely_ir = true;
            }

            cameras.push((index, caps.card.clone(), features, likely_ir));
        }

        cameras.sort_by_key(|c| c.0);
        Ok(cameras)
    }

    /// Pick a color capture device for evidence images; fall back to the
    /// first device, then to device 0.
    pub fn auto_detect() -> Result<u32> {
        let cameras = Self::list_all_cameras()?;
        let pick = cameras
            .iter()
            .find(|(_, _, features, ir)| !ir && features.iter().any(|f| f == "VIDEO_CAPTURE"))
            .or_else(|| cameras.first());

        match pick {
            Some((index, name, _, _)) => {
                tracing::info!("Selected camera: /dev/video{} ({})", index, name);
                Ok(*index)
            }
            None => {
                tracing::warn!("No camera detected, falling back to /dev/video0");
                Ok(0)
            }
        }
    }
}

#[async_trait(?Send)]
impl CaptureDevice for V4l2Camera {
    async fn get_frame(&mut self) -> Result<Option<Frame>> {
        if self.worker.is_none() {
            return Err(EnrollError::Camera(format!("Camera {} has been released", self.index)));
        }
        if self.worker.as_ref().is_some_and(|w| w.is_finished()) {
            return Err(EnrollError::Camera(format!("Camera {} stopped streaming", self.index)));
        }
        Ok(self.latest.borrow_and_update().clone())
    }

    fn release(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Camera {} capture thread panicked", self.index);
            }
        }
    }
}

impl Drop for V4l2Camera {
    fn drop(&mut self) {
        self.release();
    }
}

fn video_device_indices() -> Result<Vec<u32>> {
    let mut indices = Vec::new();
    for entry in fs::read_dir("/dev")? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(index) = name.to_str().and_then(|n| n.strip_prefix("video")).and_then(|i| i.parse().ok()) {
            indices.push(index);
        }
    }
    Ok(indices)
}

fn capture_loop(
    mut device: Device,
    format: v4l::Format,
    warmup_frames: u32,
    warmup_delay: Duration,
    tx: watch::Sender<Option<Frame>>,
    stop: Arc<AtomicBool>,
) {
    let mut stream = match v4l::io::mmap::Stream::with_buffers(&mut device, Type::VideoCapture, 4) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to create capture stream: {}", e);
            return;
        }
    };

    for i in 0..warmup_frames {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = stream.next() {
            tracing::warn!("Failed to capture warmup frame {}: {}", i, e);
        }
        std::thread::sleep(warmup_delay);
    }
    tracing::info!("Camera ready");

    while !stop.load(Ordering::SeqCst) {
        let (buf, _meta) = match stream.next() {
            Ok(next) => next,
            Err(e) => {
                tracing::error!("Capture failed: {}", e);
                return;
            }
        };

        match decode_frame(buf, &format) {
            Ok(image) => {
                tx.send_replace(Some(Frame::new(image)));
            }
            Err(e) => tracing::debug!("Dropping undecodable frame: {}", e),
        }
    }
}

fn decode_frame(data: &[u8], format: &v4l::Format) -> Result<DynamicImage> {
    match &format.fourcc.repr {
        b"GREY" => {
            let len = (format.width * format.height) as usize;
            let pixels = data.get(..len)
                .ok_or_else(|| EnrollError::Camera("Short grayscale frame".into()))?;
            let img = GrayImage::from_raw(format.width, format.height, pixels.to_vec())
                .ok_or_else(|| EnrollError::Camera("Failed to create grayscale image buffer".into()))?;
            Ok(DynamicImage::ImageLuma8(img))
        }
        b"MJPG" => Ok(image::load_from_memory_with_format(data, ImageFormat::Jpeg)?),
        b"YUYV" => {
            // Luma only: every other byte is a Y sample.
            let luma: Vec<u8> = data.iter().step_by(2).copied().collect();
            let len = (format.width * format.height) as usize;
            let pixels = luma.get(..len)
                .ok_or_else(|| EnrollError::Camera("Short YUYV frame".into()))?;
            let img = GrayImage::from_raw(format.width, format.height, pixels.to_vec())
                .ok_or_else(|| EnrollError::Camera("Failed to create YUYV image buffer".into()))?;
            Ok(DynamicImage::ImageLuma8(img))
        }
        other => Err(EnrollError::Camera(format!(
            "Unsupported pixel format {}", String::from_utf8_lossy(other)
        ))),
    }
}
