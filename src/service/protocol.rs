use serde::{Deserialize, Serialize};
use std::fmt;
use crate::core::challenge::Challenge;
use crate::core::store::{CaptureStore, EncodedImage};
use crate::error::SubmitError;
use crate::wizard::form::{AccountSetup, PersonalDetails};

/// Server-assigned id of a registered student.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(pub String);

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentRegistration {
    pub personal: PersonalDetails,
    pub account: AccountSetup,
}

impl StudentRegistration {
    /// Text fields of the registration form, in submission order.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("first_name", self.personal.first_name.trim().to_string()),
            ("last_name", self.personal.last_name.trim().to_string()),
            ("gender", self.personal.gender.code().to_string()),
            ("date_of_birth", self.personal.date_of_birth.format("%Y-%m-%d").to_string()),
            ("year_of_study", self.personal.year_of_study.to_string()),
            ("email", self.account.email.trim().to_string()),
            ("password", self.account.password.clone()),
        ]
    }
}

/// One evidence image as it goes over the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePart {
    pub field: String,
    pub file_name: String,
    pub image: EncodedImage,
}

/// Everything the verification endpoint needs.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationPayload {
    pub subject_id: SubjectId,
    pub parts: Vec<ImagePart>,
}

impl VerificationPayload {
    pub const SELFIE_FIELD: &'static str = "selfie";

    pub fn field_name(challenge: Challenge) -> String {
        format!("liveness_{}", challenge.wire_name())
    }

    /// Build from a complete store: one part per challenge in order, plus
    /// the selfie, which is the neutral capture.
    pub fn from_store(subject_id: SubjectId, store: &CaptureStore) -> Result<Self, SubmitError> {
        if !store.is_complete() {
            return Err(SubmitError::NotReady { missing: store.missing() });
        }

        let mut parts: Vec<ImagePart> = store
            .iter()
            .map(|(challenge, evidence)| ImagePart {
                field: Self::field_name(challenge),
                file_name: format!("{}.png", challenge.wire_name()),
                image: evidence.image.clone(),
            })
            .collect();

        if let Some(neutral) = store.get(Challenge::Neutral) {
            parts.push(ImagePart {
                field: Self::SELFIE_FIELD.to_string(),
                file_name: "selfie.png".to_string(),
                image: neutral.image.clone(),
            });
        }

        Ok(Self { subject_id, parts })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResponse {
    pub verified: bool,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    student_id: serde_json::Value,
}

/// Pull the student id out of a registration response body. The server
/// sends it either as a number or as a string.
pub fn parse_registration(body: &str) -> Result<SubjectId, SubmitError> {
    let response: RegistrationResponse = serde_json::from_str(body)
        .map_err(|e| SubmitError::InvalidResponse(format!("failed to parse registration response: {}", e)))?;

    match response.student_id {
        serde_json::Value::String(s) if !s.trim().is_empty() => Ok(SubjectId(s)),
        serde_json::Value::Number(n) => Ok(SubjectId(n.to_string())),
        other => Err(SubmitError::InvalidResponse(format!("unusable student_id: {}", other))),
    }
}

pub fn parse_verification(body: &str) -> Result<VerificationResponse, SubmitError> {
    serde_json::from_str(body)
        .map_err(|e| SubmitError::InvalidResponse(format!("failed to parse verification response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn complete_store() -> CaptureStore {
        let mut store = CaptureStore::new();
        for (i, c) in Challenge::ORDER.iter().enumerate() {
            store.commit(*c, EncodedImage::png(vec![i as u8; 4]), Utc::now()).unwrap();
        }
        store
    }

    #[test]
    fn payload_has_a_part_per_challenge_plus_selfie() {
        let payload = VerificationPayload::from_store(SubjectId("42".into()), &complete_store()).unwrap();
        let fields: Vec<&str> = payload.parts.iter().map(|p| p.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "liveness_neutral",
                "liveness_blink",
                "liveness_smile",
                "liveness_turnLeft",
                "liveness_turnRight",
                "selfie",
            ]
        );
        assert_eq!(payload.parts[3].file_name, "turnLeft.png");
        assert_eq!(payload.parts[5].image, payload.parts[0].image);
    }

    #[test]
    fn incomplete_store_is_not_ready() {
        let mut store = CaptureStore::new();
        store.commit(Challenge::Neutral, EncodedImage::png(vec![1]), Utc::now()).unwrap();
        let err = VerificationPayload::from_store(SubjectId("1".into()), &store).unwrap_err();
        match err {
            SubmitError::NotReady { missing } => assert_eq!(missing, Challenge::ORDER[1..].to_vec()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn registration_id_as_number_or_string() {
        assert_eq!(parse_registration(r#"{"student_id": 17}"#).unwrap(), SubjectId("17".into()));
        assert_eq!(
            parse_registration(r#"{"student_id": "UGR/1234/15", "message": "ok"}"#).unwrap(),
            SubjectId("UGR/1234/15".into())
        );
        assert!(matches!(parse_registration(r#"{"student_id": null}"#), Err(SubmitError::InvalidResponse(_))));
        assert!(matches!(parse_registration("<html>"), Err(SubmitError::InvalidResponse(_))));
    }

    #[test]
    fn verification_status_is_optional() {
        let r = parse_verification(r#"{"verified": false}"#).unwrap();
        assert_eq!(r, VerificationResponse { verified: false, status: None });
        let r = parse_verification(r#"{"verified": true, "status": "Liveness confirmed"}"#).unwrap();
        assert!(r.verified);
        assert_eq!(r.status.as_deref(), Some("Liveness confirmed"));
    }
}
