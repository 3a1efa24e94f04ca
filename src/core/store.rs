use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::core::challenge::Challenge;
use crate::error::EvidenceError;

/// An encoded still image, opaque to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub mime: String,
}

impl EncodedImage {
    pub fn png(bytes: Vec<u8>) -> Self {
        Self { bytes, mime: "image/png".to_string() }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// The single committed image for a completed challenge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub image: EncodedImage,
    pub captured_at: DateTime<Utc>,
}

/// At most one piece of evidence per challenge, write-once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureStore {
    slots: [Option<Evidence>; Challenge::COUNT],
}

impl CaptureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `captured_at` is when the source frame was read, not when it is committed.
    pub fn commit(
        &mut self,
        challenge: Challenge,
        image: EncodedImage,
        captured_at: DateTime<Utc>,
    ) -> Result<(), EvidenceError> {
        let slot = &mut self.slots[challenge.index()];
        if slot.is_some() {
            return Err(EvidenceError::AlreadyCaptured(challenge));
        }
        *slot = Some(Evidence { image, captured_at });
        Ok(())
    }

    pub fn get(&self, challenge: Challenge) -> Option<&Evidence> {
        self.slots[challenge.index()].as_ref()
    }

    pub fn has(&self, challenge: Challenge) -> bool {
        self.get(challenge).is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// First challenge in order without evidence.
    pub fn first_missing(&self) -> Option<Challenge> {
        Challenge::ORDER.into_iter().find(|c| !self.has(*c))
    }

    pub fn missing(&self) -> Vec<Challenge> {
        Challenge::ORDER.into_iter().filter(|c| !self.has(*c)).collect()
    }

    pub fn captured_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Committed evidence in challenge order.
    pub fn iter(&self) -> impl Iterator<Item = (Challenge, &Evidence)> {
        Challenge::ORDER
            .into_iter()
            .filter_map(move |c| self.get(c).map(|e| (c, e)))
    }

    /// Drops all evidence. Only called on an explicit session restart.
    pub fn reset(&mut self) {
        self.slots = Default::default();
    }
}
