//! Serializable state of one liveness traversal.
//!
//! The session only moves through the transition functions below. The active
//! challenge is never stored: it is always the first challenge in order
//! whose evidence is absent, so it cannot drift from the evidence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::core::challenge::Challenge;
use crate::core::store::{CaptureStore, EncodedImage};
use crate::error::EvidenceError;

/// Sampling progress of the active challenge, 0..=100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SamplingProgress {
    pub challenge: Option<Challenge>,
    pub percent: u8,
}

impl SamplingProgress {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn at(challenge: Challenge, ticks: u32, window_size: u32) -> Self {
        let percent = (ticks.min(window_size) * 100 / window_size.max(1)) as u8;
        Self { challenge: Some(challenge), percent }
    }
}

/// Result of recording a completed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Advanced { from: Challenge, to: Challenge },
    Completed { last: Challenge },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LivenessSession {
    evidence: CaptureStore,
    camera_ready: bool,
    #[serde(default)]
    rejected_windows: u32,
}

impl LivenessSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn camera_ready(&self) -> bool {
        self.camera_ready
    }

    pub fn mark_camera_ready(&mut self) {
        self.camera_ready = true;
    }

    pub fn mark_camera_released(&mut self) {
        self.camera_ready = false;
    }

    /// `None` before the camera is ready and once every challenge has evidence.
    pub fn active_challenge(&self) -> Option<Challenge> {
        if !self.camera_ready {
            return None;
        }
        self.evidence.first_missing()
    }

    pub fn is_complete(&self) -> bool {
        self.evidence.is_complete()
    }

    pub fn evidence(&self) -> &CaptureStore {
        &self.evidence
    }

    /// Failed or timed out windows for the active challenge.
    pub fn rejected_windows(&self) -> u32 {
        self.rejected_windows
    }

    /// Whether `challenge` may record right now.
    pub fn ensure_active(&self, challenge: Challenge) -> Result<(), EvidenceError> {
        let active = self.active_challenge();
        if active == Some(challenge) {
            return Ok(());
        }
        if self.evidence.has(challenge) {
            return Err(EvidenceError::AlreadyCaptured(challenge));
        }
        Err(EvidenceError::NotActive { got: challenge, active })
    }

    /// Commit the window's image for `challenge` and advance.
    ///
    /// Only the active challenge may record; anything else is refused
    /// without touching the evidence.
    pub fn record_window(
        &mut self,
        challenge: Challenge,
        image: EncodedImage,
        captured_at: DateTime<Utc>,
    ) -> Result<Transition, EvidenceError> {
        self.ensure_active(challenge)?;
        self.evidence.commit(challenge, image, captured_at)?;
        self.rejected_windows = 0;

        Ok(match challenge.next() {
            Some(to) => Transition::Advanced { from: challenge, to },
            None => Transition::Completed { last: challenge },
        })
    }

    /// Count a window that ended without a commit; returns the new count.
    pub fn record_rejected_window(&mut self) -> u32 {
        self.rejected_windows += 1;
        self.rejected_windows
    }

    /// Manual restart: clear all evidence and re-enter at the first challenge.
    pub fn restart(&mut self) {
        self.evidence.reset();
        self.rejected_windows = 0;
    }
}
