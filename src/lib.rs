pub mod camera;
pub mod cli;
pub mod common;
pub mod core;
pub mod service;
pub mod testing;
pub mod wizard;

pub use common::{Config, DevMode, EnrollError, EvidenceError, Result, SubmitError};
pub use crate::core::{
    CaptureStore, Challenge, ChallengeSequencer, FaceSignal, FaceSignalAdapter, FrameSampler, LivenessEvent,
    LivenessSession, OrtFaceAnalysis, SamplingProgress,
};
pub use camera::{CameraLease, Frame, V4l2Camera, V4l2CameraSource};
pub use service::{HttpEnrollmentClient, RegistrationEndpoint, VerificationEndpoint};
pub use wizard::{EnrollmentOutcome, EnrollmentWizard, WizardStage};

// Short paths used across the crate.
pub mod config {
    pub use crate::common::config::*;
}
pub mod error {
    pub use crate::common::error::*;
}
pub mod paths {
    pub use crate::common::paths::*;
}
