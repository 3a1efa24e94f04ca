pub mod analysis;
pub mod challenge;
pub mod detector;
pub mod events;
pub mod expression;
pub mod quality;
pub mod sampler;
pub mod sequencer;
pub mod session;
pub mod signal;
pub mod store;

pub use analysis::OrtFaceAnalysis;
pub use challenge::{Acceptance, AcceptancePolicy, AcceptancePredicate, Challenge};
pub use detector::{FaceBox, FaceDetector};
pub use events::{event_channel, EventSink, EventStream, LivenessEvent};
pub use expression::ExpressionClassifier;
pub use quality::QualityMetrics;
pub use sampler::{FrameSampler, SamplerConfig, StopHandle, WindowOutcome};
pub use sequencer::ChallengeSequencer;
pub use session::{LivenessSession, SamplingProgress, Transition};
pub use signal::{FaceAnalysis, FaceObservation, FaceSignal, FaceSignalAdapter};
pub use store::{CaptureStore, EncodedImage, Evidence};
