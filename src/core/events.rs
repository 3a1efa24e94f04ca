use tokio::sync::mpsc;
use crate::camera::Frame;
use crate::core::challenge::Challenge;
use crate::core::session::SamplingProgress;
use crate::core::signal::FaceSignal;

/// Observable steps of a liveness session, for previews and logs.
#[derive(Debug, Clone)]
pub enum LivenessEvent {
    CameraReady,
    ChallengeStarted { challenge: Challenge, attempt: u32 },
    /// A frame was read and analyzed during a tick.
    FrameAnalyzed { challenge: Challenge, frame: Frame, signal: FaceSignal },
    /// The frame source was not readable; the tick did not count.
    TickSkipped { challenge: Challenge },
    Progress(SamplingProgress),
    EvidenceCommitted { challenge: Challenge, satisfied: bool },
    WindowRejected { challenge: Challenge, attempt: u32, timed_out: bool },
    SessionCompleted,
    Cancelled,
}

pub type EventSink = mpsc::UnboundedSender<LivenessEvent>;
pub type EventStream = mpsc::UnboundedReceiver<LivenessEvent>;

pub fn event_channel() -> (EventSink, EventStream) {
    mpsc::unbounded_channel()
}

/// Sends to an optional sink; a closed receiver is not an error.
pub(crate) fn emit(sink: &Option<EventSink>, event: LivenessEvent) {
    if let Some(tx) = sink {
        let _ = tx.send(event);
    }
}
