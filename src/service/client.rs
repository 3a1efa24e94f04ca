//! HTTP client for the student registration and liveness verification API.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::Duration;
use crate::common::config::ApiConfig;
use crate::error::{EnrollError, Result, SubmitError};
use crate::service::protocol::{
    parse_registration, parse_verification, StudentRegistration, SubjectId, VerificationPayload,
    VerificationResponse,
};
use crate::service::{RegistrationEndpoint, VerificationEndpoint};

/// Error bodies are cut to this many bytes before they reach an error message.
const MAX_ERROR_BODY: usize = 512;

/// Talks to the enrollment backend.
///
/// `POST {base}/students/` registers a student and returns `student_id`;
/// `POST {base}/students/students/{id}/verify_liveness/` submits the
/// liveness captures.
pub struct HttpEnrollmentClient {
    http_client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
    csrf_token: Option<String>,
}

impl HttpEnrollmentClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .build()
            .map_err(|e| EnrollError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
            csrf_token: config.csrf_token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn registration_url(&self) -> String {
        format!("{}/students/", self.base_url)
    }

    pub fn verification_url(&self, subject: &SubjectId) -> String {
        format!("{}/students/students/{}/verify_liveness/", self.base_url, subject)
    }

    fn with_headers(&self, request: RequestBuilder) -> RequestBuilder {
        let request = match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        match &self.csrf_token {
            Some(token) => request.header("X-CSRFToken", token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> std::result::Result<String, SubmitError> {
        let response = self.with_headers(request).send().await.map_err(transport_error)?;
        read_body(response).await
    }
}

#[async_trait(?Send)]
impl RegistrationEndpoint for HttpEnrollmentClient {
    async fn register(&self, registration: &StudentRegistration) -> std::result::Result<SubjectId, SubmitError> {
        let form = registration
            .form_fields()
            .into_iter()
            .fold(Form::new(), |form, (name, value)| form.text(name, value));

        tracing::info!("Registering {} {}", registration.personal.first_name, registration.personal.last_name);
        let body = self.send(self.http_client.post(self.registration_url()).multipart(form)).await?;
        let subject = parse_registration(&body)?;
        tracing::info!("Registered student {}", subject);
        Ok(subject)
    }
}

#[async_trait(?Send)]
impl VerificationEndpoint for HttpEnrollmentClient {
    async fn verify(&self, payload: &VerificationPayload) -> std::result::Result<VerificationResponse, SubmitError> {
        let mut form = Form::new();
        for part in &payload.parts {
            let file = Part::bytes(part.image.bytes.clone())
                .file_name(part.file_name.clone())
                .mime_str(&part.image.mime)
                .map_err(|e| SubmitError::Http(format!("invalid image type {}: {}", part.image.mime, e)))?;
            form = form.part(part.field.clone(), file);
        }

        tracing::info!("Submitting {} liveness images for student {}", payload.parts.len(), payload.subject_id);
        let url = self.verification_url(&payload.subject_id);
        let body = self.send(self.http_client.post(url).multipart(form)).await?;
        parse_verification(&body)
    }
}

fn transport_error(e: reqwest::Error) -> SubmitError {
    if e.is_timeout() {
        SubmitError::Http(format!("request timed out: {}", e))
    } else if e.is_connect() {
        SubmitError::Http(format!("connection failed: {}", e))
    } else {
        SubmitError::Http(e.to_string())
    }
}

async fn read_body(response: Response) -> std::result::Result<String, SubmitError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| SubmitError::Http(format!("failed to read response body: {}", e)))?;
    check_status(status, body)
}

fn check_status(status: StatusCode, body: String) -> std::result::Result<String, SubmitError> {
    if status.is_success() {
        return Ok(body);
    }
    let mut body = body;
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    tracing::warn!("Server returned HTTP {}", status);
    Err(SubmitError::Status { code: status.as_u16(), body })
}
