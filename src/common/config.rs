use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::core::challenge::{AcceptancePolicy, Challenge};
use crate::error::{EnrollError, Result};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub models: ModelConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CameraConfig {
    /// 999 selects the camera automatically.
    #[serde(default)]
    pub device_index: u32,
    #[serde(default = "default_camera_width")]
    pub width: u32,
    #[serde(default = "default_camera_height")]
    pub height: u32,
    #[serde(default = "default_warmup_frames")]
    pub warmup_frames: u32,
    #[serde(default = "default_warmup_delay")]
    pub warmup_delay_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: default_camera_width(),
            height: default_camera_height(),
            warmup_frames: default_warmup_frames(),
            warmup_delay_ms: default_warmup_delay(),
        }
    }
}

fn default_camera_width() -> u32 { 640 }
fn default_camera_height() -> u32 { 480 }
fn default_warmup_frames() -> u32 { 3 }
fn default_warmup_delay() -> u64 { 50 }

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelConfig {
    pub detector_path: PathBuf,
    /// Facial expression classifier; without it every signal has empty
    /// expression scores.
    #[serde(default)]
    pub expression_path: Option<PathBuf>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            detector_path: PathBuf::from("models/face_detector.onnx"),
            expression_path: Some(PathBuf::from("models/face_expression.onnx")),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DetectorConfig {
    #[serde(default = "default_detector_input")]
    pub input_width: u32,
    #[serde(default = "default_detector_input")]
    pub input_height: u32,
    #[serde(default = "default_detection_confidence")]
    pub confidence: f32,
    #[serde(default = "default_nms_iou")]
    pub nms_iou: f32,
    #[serde(default = "default_expression_input")]
    pub expression_input_size: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_width: default_detector_input(),
            input_height: default_detector_input(),
            confidence: default_detection_confidence(),
            nms_iou: default_nms_iou(),
            expression_input_size: default_expression_input(),
        }
    }
}

fn default_detector_input() -> u32 { 640 }
fn default_detection_confidence() -> f32 { 0.5 }
fn default_nms_iou() -> f32 { 0.45 }
fn default_expression_input() -> u32 { 48 }

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LivenessConfig {
    #[serde(default = "default_window_size")]
    pub window_size: u32,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// A window gets `window_size * tick_interval * factor` to gather its
    /// ticks before it counts as a failed attempt.
    #[serde(default = "default_deadline_factor")]
    pub window_deadline_factor: u32,
    #[serde(default = "default_max_windows")]
    pub max_windows_per_challenge: u32,
    #[serde(default = "default_smile_threshold")]
    pub smile_threshold: f32,
    #[serde(default)]
    pub acceptance: AcceptanceConfig,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            tick_interval_ms: default_tick_interval(),
            window_deadline_factor: default_deadline_factor(),
            max_windows_per_challenge: default_max_windows(),
            smile_threshold: default_smile_threshold(),
            acceptance: AcceptanceConfig::default(),
        }
    }
}

impl LivenessConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Range checks shared by file loading and the liveness constructors.
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 || self.window_size > 100 {
            return Err(EnrollError::Config(format!(
                "Sampling window must be between 1 and 100 ticks, got {}", self.window_size
            )));
        }
        if self.tick_interval_ms < 10 || self.tick_interval_ms > 10_000 {
            return Err(EnrollError::Config(format!(
                "Tick interval must be between 10 and 10000 ms, got {}", self.tick_interval_ms
            )));
        }
        if self.window_deadline_factor == 0 {
            return Err(EnrollError::Config(
                "Window deadline factor must be at least 1".to_string()
            ));
        }
        if self.max_windows_per_challenge == 0 {
            return Err(EnrollError::Config(
                "At least one sampling window per challenge is required".to_string()
            ));
        }
        if self.smile_threshold < 0.0 || self.smile_threshold > 1.0 {
            return Err(EnrollError::Config(format!(
                "Smile threshold must be between 0.0 and 1.0, got {}", self.smile_threshold
            )));
        }

        Ok(())
    }
}

fn default_window_size() -> u32 { 10 }
fn default_tick_interval() -> u64 { 300 }
fn default_deadline_factor() -> u32 { 5 }
fn default_max_windows() -> u32 { 3 }
fn default_smile_threshold() -> f32 { 0.6 }

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AcceptanceConfig {
    #[serde(default)]
    pub neutral: AcceptancePolicy,
    #[serde(default)]
    pub blink: AcceptancePolicy,
    #[serde(default)]
    pub smile: AcceptancePolicy,
    #[serde(default)]
    pub turn_left: AcceptancePolicy,
    #[serde(default)]
    pub turn_right: AcceptancePolicy,
}

impl AcceptanceConfig {
    pub fn policy_for(&self, challenge: Challenge) -> AcceptancePolicy {
        match challenge {
            Challenge::Neutral => self.neutral,
            Challenge::Blink => self.blink,
            Challenge::Smile => self.smile,
            Challenge::TurnLeft => self.turn_left,
            Challenge::TurnRight => self.turn_right,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub csrf_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_seconds: default_api_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
            auth_token: None,
            csrf_token: None,
        }
    }
}

fn default_base_url() -> String { "http://localhost:8000/api".to_string() }
fn default_api_timeout() -> u64 { 30 }
fn default_connect_timeout() -> u64 { 5 }

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PerformanceConfig {
    #[serde(default = "default_optimization_level")]
    pub optimization_level: u32,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self { optimization_level: default_optimization_level() }
    }
}

fn default_optimization_level() -> u32 { 3 }

impl Config {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(EnrollError::Config(format!(
                "Config file not found: {}. Please create it from the example.", path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| EnrollError::Config(format!("Config parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Resolve a relative model path against `models_base`.
    pub fn resolve_model_path(path: &Path, models_base: &Path) -> PathBuf {
        if path.is_relative() {
            models_base.join(path)
        } else {
            path.to_path_buf()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.width > 4096 {
            return Err(EnrollError::Config(format!(
                "Camera width must be between 1 and 4096, got {}", self.camera.width
            )));
        }
        if self.camera.height == 0 || self.camera.height > 4096 {
            return Err(EnrollError::Config(format!(
                "Camera height must be between 1 and 4096, got {}", self.camera.height
            )));
        }

        if self.detector.confidence < 0.0 || self.detector.confidence > 1.0 {
            return Err(EnrollError::Config(format!(
                "Detection confidence must be between 0.0 and 1.0, got {}",
                self.detector.confidence
            )));
        }
        if self.detector.input_width == 0 || self.detector.input_width > 4096
            || self.detector.input_height == 0 || self.detector.input_height > 4096
        {
            return Err(EnrollError::Config(format!(
                "Detector input must be between 1 and 4096 pixels, got {}x{}",
                self.detector.input_width, self.detector.input_height
            )));
        }
        if self.detector.expression_input_size == 0 || self.detector.expression_input_size > 512 {
            return Err(EnrollError::Config(format!(
                "Expression input size must be between 1 and 512, got {}",
                self.detector.expression_input_size
            )));
        }

        self.liveness.validate()?;

        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            return Err(EnrollError::Config(format!(
                "API base URL must be http(s), got {}", self.api.base_url
            )));
        }
        if self.api.timeout_seconds < 1 || self.api.timeout_seconds > 300 {
            return Err(EnrollError::Config(format!(
                "API timeout must be between 1 and 300 seconds, got {}", self.api.timeout_seconds
            )));
        }

        Ok(())
    }
}
