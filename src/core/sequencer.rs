//! Challenge Sequencer: walks the session through the challenges in order,
//! one sampling window at a time.

use tokio::sync::watch;
use crate::camera::CaptureDevice;
use crate::common::config::LivenessConfig;
use crate::core::challenge::{Acceptance, AcceptancePredicate, Challenge};
use crate::core::events::{emit, EventSink, LivenessEvent};
use crate::core::sampler::{FrameSampler, SamplerConfig, StopHandle, WindowOutcome};
use crate::core::session::{LivenessSession, SamplingProgress, Transition};
use crate::core::signal::{FaceAnalysis, FaceSignalAdapter};
use crate::error::{EnrollError, Result};

pub struct ChallengeSequencer {
    sampler: FrameSampler,
    acceptance: [Acceptance; Challenge::COUNT],
    max_windows: u32,
}

impl ChallengeSequencer {
    pub fn new(config: &LivenessConfig) -> Result<Self> {
        config.validate()?;
        let acceptance = Challenge::ORDER.map(|challenge| Acceptance {
            predicate: AcceptancePredicate::for_challenge(challenge, config.smile_threshold),
            policy: config.acceptance.policy_for(challenge),
        });

        Ok(Self {
            sampler: FrameSampler::new(SamplerConfig::from_liveness(config))?,
            acceptance,
            max_windows: config.max_windows_per_challenge,
        })
    }

    pub fn with_events(mut self, sink: EventSink) -> Self {
        self.set_events(sink);
        self
    }

    pub(crate) fn set_events(&mut self, sink: EventSink) {
        self.sampler.set_events(sink);
    }

    pub fn acceptance_for(&self, challenge: Challenge) -> Acceptance {
        self.acceptance[challenge.index()]
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.sampler.stop_handle()
    }

    pub fn progress(&self) -> watch::Receiver<SamplingProgress> {
        self.sampler.progress()
    }

    pub(crate) fn rearm(&self) {
        self.sampler.rearm();
    }

    pub(crate) fn emit(&self, event: LivenessEvent) {
        emit(self.sampler.events(), event);
    }

    /// Sample every challenge that still lacks evidence.
    ///
    /// Returns once the session is complete. A challenge whose windows keep
    /// failing is given up after `max_windows_per_challenge` attempts with
    /// [`EnrollError::ChallengeExhausted`]; a stop yields
    /// [`EnrollError::Cancelled`].
    pub async fn run<D, A>(
        &self,
        session: &mut LivenessSession,
        camera: &mut D,
        adapter: &FaceSignalAdapter<A>,
    ) -> Result<()>
    where
        D: CaptureDevice + ?Sized,
        A: FaceAnalysis,
    {
        if !session.camera_ready() {
            return Err(EnrollError::CameraNotReady);
        }

        while let Some(challenge) = session.active_challenge() {
            let attempt = session.rejected_windows() + 1;
            tracing::info!("Challenge {}: {} (attempt {})", challenge, challenge.instruction(), attempt);
            self.emit(LivenessEvent::ChallengeStarted { challenge, attempt });

            let outcome = self
                .sampler
                .run_window(challenge, self.acceptance_for(challenge), camera, adapter, session)
                .await?;

            match outcome {
                WindowOutcome::Committed { transition, satisfied } => {
                    self.emit(LivenessEvent::EvidenceCommitted { challenge, satisfied });
                    if let Transition::Completed { .. } = transition {
                        self.emit(LivenessEvent::SessionCompleted);
                    }
                }
                WindowOutcome::Rejected { .. } | WindowOutcome::TimedOut { .. } => {
                    let timed_out = matches!(outcome, WindowOutcome::TimedOut { .. });
                    let windows = session.record_rejected_window();
                    self.emit(LivenessEvent::WindowRejected { challenge, attempt: windows, timed_out });

                    if windows >= self.max_windows {
                        tracing::error!("Giving up on {} after {} windows", challenge, windows);
                        return Err(EnrollError::ChallengeExhausted { challenge, windows });
                    }
                    tracing::warn!("Resampling {} ({}/{})", challenge, windows, self.max_windows);
                }
                WindowOutcome::Cancelled => {
                    self.emit(LivenessEvent::Cancelled);
                    return Err(EnrollError::Cancelled);
                }
            }
        }

        Ok(())
    }
}
