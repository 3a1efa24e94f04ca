//! Nullable collaborators for deterministic tests.
//!
//! Each stands in for one external dependency (camera, face analysis,
//! backend) without touching hardware or the network. Behaviour is
//! scripted up front; probes let a test observe what happened after the
//! double has been moved into the code under test.

use async_trait::async_trait;
use image::{DynamicImage, GrayImage, Luma};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use crate::camera::{CameraSource, CaptureDevice, Frame};
use crate::core::detector::FaceBox;
use crate::core::signal::{FaceAnalysis, FaceObservation};
use crate::error::{EnrollError, Result, SubmitError};
use crate::service::protocol::{StudentRegistration, SubjectId, VerificationPayload, VerificationResponse};
use crate::service::{RegistrationEndpoint, VerificationEndpoint};

pub const TEST_FRAME_WIDTH: u32 = 64;
pub const TEST_FRAME_HEIGHT: u32 = 48;

/// A small grayscale gradient frame.
pub fn test_frame() -> Frame {
    let image = GrayImage::from_fn(TEST_FRAME_WIDTH, TEST_FRAME_HEIGHT, |x, y| {
        Luma([((x * 3 + y * 2) % 256) as u8])
    });
    Frame::new(DynamicImage::ImageLuma8(image))
}

/// Face box centered in a [`test_frame`].
pub fn test_face() -> FaceBox {
    FaceBox { x1: 16.0, y1: 8.0, x2: 48.0, y2: 40.0, confidence: 0.9 }
}

#[derive(Default)]
struct CameraState {
    frames: Cell<usize>,
    releases: Cell<usize>,
    released: Cell<bool>,
}

/// Observes a [`NullCamera`] after it has been handed away.
#[derive(Clone)]
pub struct CameraProbe(Rc<CameraState>);

impl CameraProbe {
    /// Frames actually delivered (skipped ticks not included).
    pub fn frames(&self) -> usize {
        self.0.frames.get()
    }

    pub fn releases(&self) -> usize {
        self.0.releases.get()
    }

    pub fn is_released(&self) -> bool {
        self.0.released.get()
    }
}

/// A camera that always has [`test_frame`] ready, optionally after a number
/// of unreadable reads.
pub struct NullCamera {
    unready_ticks: u32,
    state: Rc<CameraState>,
}

impl NullCamera {
    pub fn new() -> Self {
        Self { unready_ticks: 0, state: Rc::new(CameraState::default()) }
    }

    /// The first `ticks` reads return "not readable".
    pub fn with_unready_ticks(mut self, ticks: u32) -> Self {
        self.unready_ticks = ticks;
        self
    }

    pub fn probe(&self) -> CameraProbe {
        CameraProbe(self.state.clone())
    }
}

impl Default for NullCamera {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl CaptureDevice for NullCamera {
    async fn get_frame(&mut self) -> Result<Option<Frame>> {
        if self.state.released.get() {
            return Err(EnrollError::Camera("null camera released".into()));
        }
        if self.unready_ticks > 0 {
            self.unready_ticks -= 1;
            return Ok(None);
        }
        self.state.frames.set(self.state.frames.get() + 1);
        Ok(Some(test_frame()))
    }

    fn release(&mut self) {
        self.state.releases.set(self.state.releases.get() + 1);
        self.state.released.set(true);
    }
}

/// Hands out [`NullCamera`]s, or refuses like a denied permission prompt.
pub struct NullCameraSource {
    denied: Option<String>,
    unready_ticks: u32,
    acquisitions: Rc<Cell<usize>>,
    last: Rc<RefCell<Option<CameraProbe>>>,
}

impl NullCameraSource {
    pub fn new() -> Self {
        Self {
            denied: None,
            unready_ticks: 0,
            acquisitions: Rc::new(Cell::new(0)),
            last: Rc::new(RefCell::new(None)),
        }
    }

    pub fn denied(reason: &str) -> Self {
        Self { denied: Some(reason.to_string()), ..Self::new() }
    }

    pub fn with_unready_ticks(mut self, ticks: u32) -> Self {
        self.unready_ticks = ticks;
        self
    }

    pub fn probe(&self) -> SourceProbe {
        SourceProbe { acquisitions: self.acquisitions.clone(), last: self.last.clone() }
    }
}

impl Default for NullCameraSource {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct SourceProbe {
    acquisitions: Rc<Cell<usize>>,
    last: Rc<RefCell<Option<CameraProbe>>>,
}

impl SourceProbe {
    /// Acquisition attempts, including refused ones.
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.get()
    }

    /// Probe of the most recently handed out camera.
    pub fn camera(&self) -> Option<CameraProbe> {
        self.last.borrow().clone()
    }
}

#[async_trait(?Send)]
impl CameraSource for NullCameraSource {
    type Device = NullCamera;

    async fn acquire(&mut self) -> Result<NullCamera> {
        self.acquisitions.set(self.acquisitions.get() + 1);
        if let Some(reason) = &self.denied {
            return Err(EnrollError::Camera(reason.clone()));
        }
        let camera = NullCamera::new().with_unready_ticks(self.unready_ticks);
        *self.last.borrow_mut() = Some(camera.probe());
        Ok(camera)
    }
}

/// What the scripted analysis reports for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScriptedSignal {
    NoFace,
    Face { happy: f32 },
    /// `detect` fails for this frame.
    Error,
}

impl ScriptedSignal {
    pub fn face() -> Self {
        ScriptedSignal::Face { happy: 0.0 }
    }

    pub fn happy(score: f32) -> Self {
        ScriptedSignal::Face { happy: score }
    }
}

#[derive(Default)]
struct AnalysisState {
    loads: Cell<usize>,
    calls: Cell<usize>,
}

#[derive(Clone)]
pub struct AnalysisProbe(Rc<AnalysisState>);

impl AnalysisProbe {
    pub fn loads(&self) -> usize {
        self.0.loads.get()
    }

    pub fn calls(&self) -> usize {
        self.0.calls.get()
    }
}

/// Face analysis that plays back a script, one entry per `detect` call.
/// The last entry repeats once the script runs out.
pub struct NullFaceAnalysis {
    script: Vec<ScriptedSignal>,
    load_error: Option<String>,
    state: Rc<AnalysisState>,
}

impl NullFaceAnalysis {
    pub fn new(script: Vec<ScriptedSignal>) -> Self {
        Self { script, load_error: None, state: Rc::new(AnalysisState::default()) }
    }

    pub fn failing_load(message: &str) -> Self {
        Self { load_error: Some(message.to_string()), ..Self::new(Vec::new()) }
    }

    pub fn probe(&self) -> AnalysisProbe {
        AnalysisProbe(self.state.clone())
    }

    pub fn calls(&self) -> usize {
        self.state.calls.get()
    }
}

#[async_trait(?Send)]
impl FaceAnalysis for NullFaceAnalysis {
    async fn load(&mut self) -> Result<()> {
        self.state.loads.set(self.state.loads.get() + 1);
        match &self.load_error {
            Some(message) => Err(EnrollError::Model(message.clone())),
            None => Ok(()),
        }
    }

    async fn detect(&self, _frame: &Frame) -> Result<Option<FaceObservation>> {
        let call = self.state.calls.get();
        self.state.calls.set(call + 1);

        let step = self.script.get(call).or_else(|| self.script.last()).copied();
        match step {
            None | Some(ScriptedSignal::NoFace) => Ok(None),
            Some(ScriptedSignal::Error) => Err(EnrollError::Model("scripted analysis failure".into())),
            Some(ScriptedSignal::Face { happy }) => {
                let mut expressions = HashMap::new();
                expressions.insert("happy".to_string(), happy);
                expressions.insert("neutral".to_string(), 1.0 - happy);
                Ok(Some(FaceObservation { face: test_face(), expressions }))
            }
        }
    }
}

#[derive(Default)]
struct EndpointState {
    registrations: RefCell<Vec<StudentRegistration>>,
    verifications: RefCell<Vec<VerificationPayload>>,
    register_error: RefCell<Option<SubmitError>>,
    verify_results: RefCell<VecDeque<std::result::Result<VerificationResponse, SubmitError>>>,
}

#[derive(Clone)]
pub struct EndpointProbe(Rc<EndpointState>);

impl EndpointProbe {
    pub fn registrations(&self) -> usize {
        self.0.registrations.borrow().len()
    }

    pub fn verifications(&self) -> usize {
        self.0.verifications.borrow().len()
    }

    pub fn last_verification(&self) -> Option<VerificationPayload> {
        self.0.verifications.borrow().last().cloned()
    }
}

/// Backend double. Registration assigns [`NullEndpoints::SUBJECT`];
/// verification plays back queued results, then answers `verified: true`.
pub struct NullEndpoints {
    state: Rc<EndpointState>,
}

impl NullEndpoints {
    pub const SUBJECT: &'static str = "1001";

    pub fn new() -> Self {
        Self { state: Rc::new(EndpointState::default()) }
    }

    pub fn failing_registration(self, error: SubmitError) -> Self {
        *self.state.register_error.borrow_mut() = Some(error);
        self
    }

    pub fn then_verify(self, result: std::result::Result<VerificationResponse, SubmitError>) -> Self {
        self.state.verify_results.borrow_mut().push_back(result);
        self
    }

    pub fn probe(&self) -> EndpointProbe {
        EndpointProbe(self.state.clone())
    }
}

impl Default for NullEndpoints {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl RegistrationEndpoint for NullEndpoints {
    async fn register(&self, registration: &StudentRegistration) -> std::result::Result<SubjectId, SubmitError> {
        self.state.registrations.borrow_mut().push(registration.clone());
        match self.state.register_error.borrow().clone() {
            Some(error) => Err(error),
            None => Ok(SubjectId(Self::SUBJECT.to_string())),
        }
    }
}

#[async_trait(?Send)]
impl VerificationEndpoint for NullEndpoints {
    async fn verify(&self, payload: &VerificationPayload) -> std::result::Result<VerificationResponse, SubmitError> {
        self.state.verifications.borrow_mut().push(payload.clone());
        self.state
            .verify_results
            .borrow_mut()
            .pop_front()
            .unwrap_or(Ok(VerificationResponse { verified: true, status: Some("verified".to_string()) }))
    }
}
