pub mod client;
pub mod protocol;

use async_trait::async_trait;
use crate::error::SubmitError;
use protocol::{StudentRegistration, SubjectId, VerificationPayload, VerificationResponse};

pub use client::HttpEnrollmentClient;

/// Creates the student record and hands back its id.
#[async_trait(?Send)]
pub trait RegistrationEndpoint {
    async fn register(&self, registration: &StudentRegistration) -> Result<SubjectId, SubmitError>;
}

/// Accepts the liveness captures of a registered student.
#[async_trait(?Send)]
pub trait VerificationEndpoint {
    async fn verify(&self, payload: &VerificationPayload) -> Result<VerificationResponse, SubmitError>;
}
