//! The fixed liveness challenges and their per-challenge acceptance rules.

use serde::{Deserialize, Serialize};
use std::fmt;
use crate::core::signal::FaceSignal;

/// One facial action the subject performs during enrollment.
///
/// Declaration order is the execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Challenge {
    #[serde(rename = "neutral")]
    Neutral,
    #[serde(rename = "blink")]
    Blink,
    #[serde(rename = "smile")]
    Smile,
    #[serde(rename = "turnLeft")]
    TurnLeft,
    #[serde(rename = "turnRight")]
    TurnRight,
}

impl Challenge {
    pub const ORDER: [Challenge; 5] = [
        Challenge::Neutral,
        Challenge::Blink,
        Challenge::Smile,
        Challenge::TurnLeft,
        Challenge::TurnRight,
    ];

    pub const COUNT: usize = Self::ORDER.len();

    pub fn first() -> Challenge {
        Self::ORDER[0]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// The challenge after this one, or `None` for the last.
    pub fn next(self) -> Option<Challenge> {
        Self::ORDER.get(self.index() + 1).copied()
    }

    pub fn instruction(self) -> &'static str {
        match self {
            Challenge::Neutral => "Look straight at the camera",
            Challenge::Blink => "Blink your eyes naturally",
            Challenge::Smile => "Smile naturally",
            Challenge::TurnLeft => "Slowly turn your head to the left",
            Challenge::TurnRight => "Slowly turn your head to the right",
        }
    }

    /// Name used in multipart field names and file names.
    pub fn wire_name(self) -> &'static str {
        match self {
            Challenge::Neutral => "neutral",
            Challenge::Blink => "blink",
            Challenge::Smile => "smile",
            Challenge::TurnLeft => "turnLeft",
            Challenge::TurnRight => "turnRight",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Challenge::Neutral => "Neutral",
            Challenge::Blink => "Blink",
            Challenge::Smile => "Smile",
            Challenge::TurnLeft => "Turn left",
            Challenge::TurnRight => "Turn right",
        }
    }
}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// What happens when a sampling window ends without a frame that satisfies
/// the challenge's predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcceptancePolicy {
    /// Commit the last frame of the window anyway.
    #[default]
    Advisory,
    /// Discard the window and sample again.
    Enforced,
}

/// Per-frame test a challenge applies to its face signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AcceptancePredicate {
    /// Every frame satisfies it.
    Always,
    FaceDetected,
    /// Face present with `expression_scores["happy"]` strictly above the threshold.
    Happy { threshold: f32 },
}

impl AcceptancePredicate {
    pub fn for_challenge(challenge: Challenge, smile_threshold: f32) -> Self {
        match challenge {
            // No eye-closure signal is available, so any frame counts.
            Challenge::Blink => AcceptancePredicate::Always,
            Challenge::Smile => AcceptancePredicate::Happy { threshold: smile_threshold },
            Challenge::Neutral | Challenge::TurnLeft | Challenge::TurnRight => {
                AcceptancePredicate::FaceDetected
            }
        }
    }

    pub fn accepts(&self, signal: &FaceSignal) -> bool {
        match *self {
            AcceptancePredicate::Always => true,
            AcceptancePredicate::FaceDetected => signal.face_detected,
            AcceptancePredicate::Happy { threshold } => {
                signal.face_detected && signal.expression("happy") > threshold
            }
        }
    }
}

/// Predicate plus policy for one challenge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Acceptance {
    pub predicate: AcceptancePredicate,
    pub policy: AcceptancePolicy,
}

impl Acceptance {
    pub fn advisory(predicate: AcceptancePredicate) -> Self {
        Self { predicate, policy: AcceptancePolicy::Advisory }
    }

    pub fn enforced(predicate: AcceptancePredicate) -> Self {
        Self { predicate, policy: AcceptancePolicy::Enforced }
    }
}
