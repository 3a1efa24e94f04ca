use crate::core::challenge::Challenge;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid form: {0}")]
    InvalidForm(String),

    #[error("Wizard is at the {actual} stage, expected {expected}")]
    WrongStage {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Camera is not ready")]
    CameraNotReady,

    #[error("Could not complete the '{challenge}' challenge after {windows} sampling windows")]
    ChallengeExhausted { challenge: Challenge, windows: u32 },

    #[error("Liveness session cancelled")]
    Cancelled,

    #[error(transparent)]
    Evidence(#[from] EvidenceError),

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ORT error: {0}")]
    Ort(#[from] ort::OrtError),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl EnrollError {
    /// Errors that end the liveness stage for good: the camera or the face
    /// model never became usable, or a challenge ran out of windows.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            EnrollError::Camera(_)
                | EnrollError::Model(_)
                | EnrollError::ChallengeExhausted { .. }
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvidenceError {
    #[error("Evidence for '{0}' has already been captured")]
    AlreadyCaptured(Challenge),

    #[error("Challenge '{got}' is not active (active: {active:?})")]
    NotActive {
        got: Challenge,
        active: Option<Challenge>,
    },
}

/// Failures of `complete_registration` and of the registration call.
///
/// `NotReady` never touches the network; the other variants leave captured
/// evidence in place so the caller can retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Liveness evidence incomplete, missing: {missing:?}")]
    NotReady { missing: Vec<Challenge> },

    #[error("No subject id; the registration step has not completed")]
    NoSubject,

    #[error("Enrollment has already been verified")]
    AlreadyCompleted,

    #[error("Verification rejected: {status}")]
    Rejected { status: String },

    #[error("Request failed: {0}")]
    Http(String),

    #[error("Server returned HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl SubmitError {
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            SubmitError::NotReady { .. } | SubmitError::NoSubject | SubmitError::AlreadyCompleted
        )
    }
}

pub type Result<T> = std::result::Result<T, EnrollError>;
