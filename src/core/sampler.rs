//! Frame Sampler: a fixed-length sampling window per challenge, driven by a
//! periodic tick.
//!
//! Every tick reads one frame, asks the adapter for a signal and bumps the
//! progress. A tick whose frame source is not readable is skipped and does
//! not count toward the window. When the window is exhausted the candidate
//! frame is committed for the challenge, unless an enforced predicate was
//! never met.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use crate::camera::{CaptureDevice, Frame};
use crate::common::config::LivenessConfig;
use crate::core::challenge::{Acceptance, AcceptancePolicy, Challenge};
use crate::core::events::{emit, EventSink, LivenessEvent};
use crate::core::session::{LivenessSession, SamplingProgress, Transition};
use crate::core::signal::{FaceAnalysis, FaceSignal, FaceSignalAdapter};
use crate::error::{EnrollError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerConfig {
    pub window_size: u32,
    pub tick_interval: Duration,
    pub window_deadline_factor: u32,
}

impl SamplerConfig {
    pub fn from_liveness(config: &LivenessConfig) -> Self {
        Self {
            window_size: config.window_size,
            tick_interval: config.tick_interval(),
            window_deadline_factor: config.window_deadline_factor,
        }
    }

    /// A zero tick, window or deadline factor would never fill a window.
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 || self.tick_interval.is_zero() || self.window_deadline_factor == 0 {
            return Err(EnrollError::Config(format!(
                "Sampling needs a non-empty window and a non-zero tick, got {:?}", self
            )));
        }
        Ok(())
    }

    /// Wall-clock limit for one window, counting skipped ticks.
    pub fn window_deadline(&self) -> Duration {
        self.tick_interval * self.window_size * self.window_deadline_factor
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self::from_liveness(&LivenessConfig::default())
    }
}

/// How a sampling window ended.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowOutcome {
    /// Evidence committed for the challenge.
    Committed { transition: Transition, satisfied: bool },
    /// Enforced predicate never held; nothing committed.
    Rejected { ticks: u32 },
    /// Deadline passed before the window filled.
    TimedOut { ticks: u32 },
    Cancelled,
}

/// Stops any running or future window of the sampler it came from.
///
/// Stopping is idempotent and sticky: once stopped, no further tick fires.
#[derive(Debug, Clone)]
pub struct StopHandle {
    flag: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        if !self.flag.send_replace(true) {
            tracing::debug!("Sampling stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.flag.borrow()
    }
}

pub struct FrameSampler {
    config: SamplerConfig,
    stop: Arc<watch::Sender<bool>>,
    progress: watch::Sender<SamplingProgress>,
    events: Option<EventSink>,
}

impl FrameSampler {
    pub fn new(config: SamplerConfig) -> Result<Self> {
        config.validate()?;
        let (stop, _) = watch::channel(false);
        let (progress, _) = watch::channel(SamplingProgress::idle());
        Ok(Self {
            config,
            stop: Arc::new(stop),
            progress,
            events: None,
        })
    }

    pub fn with_events(mut self, sink: EventSink) -> Self {
        self.set_events(sink);
        self
    }

    pub(crate) fn set_events(&mut self, sink: EventSink) {
        self.events = Some(sink);
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle { flag: self.stop.clone() }
    }

    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    /// Clear a previous stop so a re-entered stage can sample again.
    pub(crate) fn rearm(&self) {
        self.stop.send_replace(false);
    }

    pub fn progress(&self) -> watch::Receiver<SamplingProgress> {
        self.progress.subscribe()
    }

    pub(crate) fn events(&self) -> &Option<EventSink> {
        &self.events
    }

    fn publish_progress(&self, progress: SamplingProgress) {
        self.progress.send_replace(progress);
        emit(&self.events, LivenessEvent::Progress(progress));
    }

    /// Run one window for `challenge` and commit its candidate into `session`.
    ///
    /// Camera and analysis failures on a single tick do not end the window:
    /// an unreadable frame skips the tick, an analysis error counts as
    /// "no face". A camera error (device gone) is returned. `challenge` must
    /// be the session's active challenge; otherwise nothing is sampled.
    ///
    /// Progress is back to idle whenever this returns.
    pub async fn run_window<D, A>(
        &self,
        challenge: Challenge,
        acceptance: Acceptance,
        camera: &mut D,
        adapter: &FaceSignalAdapter<A>,
        session: &mut LivenessSession,
    ) -> Result<WindowOutcome>
    where
        D: CaptureDevice + ?Sized,
        A: FaceAnalysis,
    {
        session.ensure_active(challenge)?;
        let outcome = self.sample_window(challenge, acceptance, camera, adapter, session).await;
        self.publish_progress(SamplingProgress::idle());
        outcome
    }

    async fn sample_window<D, A>(
        &self,
        challenge: Challenge,
        acceptance: Acceptance,
        camera: &mut D,
        adapter: &FaceSignalAdapter<A>,
        session: &mut LivenessSession,
    ) -> Result<WindowOutcome>
    where
        D: CaptureDevice + ?Sized,
        A: FaceAnalysis,
    {
        let mut stop = self.stop.subscribe();
        if *stop.borrow_and_update() {
            return Ok(WindowOutcome::Cancelled);
        }

        let window_size = self.config.window_size;
        self.publish_progress(SamplingProgress::at(challenge, 0, window_size));

        let period = self.config.tick_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = time::sleep(self.config.window_deadline());
        tokio::pin!(deadline);

        let mut ticks = 0u32;
        let mut candidate: Option<Frame> = None;
        let mut satisfied = false;

        loop {
            tokio::select! {
                biased;
                _ = stop.wait_for(|stopped| *stopped) => {
                    tracing::info!("Sampling for {} cancelled after {} ticks", challenge, ticks);
                    return Ok(WindowOutcome::Cancelled);
                }
                _ = &mut deadline => {
                    tracing::warn!("Window for {} timed out after {} of {} ticks", challenge, ticks, window_size);
                    return Ok(WindowOutcome::TimedOut { ticks });
                }
                _ = ticker.tick() => {}
            }

            let Some(frame) = camera.get_frame().await? else {
                tracing::debug!("Frame source not readable, skipping tick");
                emit(&self.events, LivenessEvent::TickSkipped { challenge });
                continue;
            };
            ticks += 1;

            let signal = match adapter.analyze(&frame).await {
                Ok(signal) => signal,
                Err(e) => {
                    tracing::warn!("Face analysis failed on tick {}: {}", ticks, e);
                    FaceSignal::no_face()
                }
            };

            if *stop.borrow() {
                return Ok(WindowOutcome::Cancelled);
            }

            if !satisfied {
                satisfied = acceptance.predicate.accepts(&signal);
                candidate = Some(frame.clone());
            }
            emit(&self.events, LivenessEvent::FrameAnalyzed { challenge, frame, signal });
            self.publish_progress(SamplingProgress::at(challenge, ticks, window_size));

            if ticks >= window_size {
                break;
            }
        }

        if !satisfied && acceptance.policy == AcceptancePolicy::Enforced {
            tracing::info!("No frame satisfied {} in {} ticks, rejecting window", challenge, ticks);
            return Ok(WindowOutcome::Rejected { ticks });
        }

        // The loop only exits after at least one counted tick.
        let Some(frame) = candidate else {
            return Ok(WindowOutcome::Rejected { ticks });
        };
        if !satisfied {
            tracing::debug!("Committing last frame for {} without a satisfied predicate", challenge);
        }

        let image = frame.encode_png()?;
        let transition = session.record_window(challenge, image, frame.captured_at)?;
        tracing::info!("Captured {} ({} ticks)", challenge, ticks);

        Ok(WindowOutcome::Committed { transition, satisfied })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::core::challenge::AcceptancePredicate;
    use crate::core::events::event_channel;
    use crate::core::store::EncodedImage;
    use crate::error::EvidenceError;
    use crate::testing::{NullCamera, NullFaceAnalysis, ScriptedSignal};

    fn sampler() -> FrameSampler {
        FrameSampler::new(SamplerConfig {
            window_size: 10,
            tick_interval: Duration::from_millis(300),
            window_deadline_factor: 5,
        })
        .unwrap()
    }

    async fn adapter(script: Vec<ScriptedSignal>) -> FaceSignalAdapter<NullFaceAnalysis> {
        FaceSignalAdapter::initialize(NullFaceAnalysis::new(script)).await.unwrap()
    }

    fn assert_elapsed(start: Instant, expected: Duration) {
        let elapsed = start.elapsed();
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(5),
            "elapsed {:?}, expected {:?}", elapsed, expected
        );
    }

    fn ready_session() -> LivenessSession {
        let mut session = LivenessSession::new();
        session.mark_camera_ready();
        session
    }

    #[tokio::test(start_paused = true)]
    async fn full_window_steps_progress_by_ten() {
        let (tx, mut rx) = event_channel();
        let sampler = sampler().with_events(tx);
        let adapter = adapter(vec![ScriptedSignal::face()]).await;
        let mut camera = NullCamera::new();
        let probe = camera.probe();
        let mut session = ready_session();

        let start = Instant::now();
        let outcome = sampler
            .run_window(
                Challenge::Neutral,
                Acceptance::advisory(AcceptancePredicate::FaceDetected),
                &mut camera,
                &adapter,
                &mut session,
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            WindowOutcome::Committed {
                transition: Transition::Advanced { from: Challenge::Neutral, to: Challenge::Blink },
                satisfied: true,
            }
        );
        assert_elapsed(start, Duration::from_millis(3000));
        assert_eq!(probe.frames(), 10);
        assert!(session.evidence().has(Challenge::Neutral));

        let mut percents = Vec::new();
        let mut first_frame_at = None;
        while let Ok(event) = rx.try_recv() {
            match event {
                LivenessEvent::Progress(p) => percents.push(p.percent),
                LivenessEvent::FrameAnalyzed { frame, .. } => {
                    first_frame_at.get_or_insert(frame.captured_at);
                }
                _ => {}
            }
        }
        assert_eq!(percents, vec![0, 10, 20, 30, 40, 50, 60, 70, 80, 90, 100, 0]);
        assert_eq!(*sampler.progress().borrow(), SamplingProgress::idle());

        // The first frame already satisfied the predicate, so it is the one kept.
        let evidence = session.evidence().get(Challenge::Neutral).unwrap();
        assert_eq!(Some(evidence.captured_at), first_frame_at);
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_ticks_do_not_count() {
        let sampler = sampler();
        let adapter = adapter(vec![ScriptedSignal::face()]).await;
        let mut camera = NullCamera::new().with_unready_ticks(3);
        let probe = camera.probe();
        let mut session = ready_session();

        let start = Instant::now();
        let outcome = sampler
            .run_window(
                Challenge::Neutral,
                Acceptance::advisory(AcceptancePredicate::FaceDetected),
                &mut camera,
                &adapter,
                &mut session,
            )
            .await
            .unwrap();

        assert!(matches!(outcome, WindowOutcome::Committed { .. }));
        assert_eq!(probe.frames(), 10);
        assert_elapsed(start, Duration::from_millis(13 * 300));
    }

    #[tokio::test(start_paused = true)]
    async fn analysis_errors_count_as_no_face() {
        let sampler = sampler();
        let adapter = adapter(vec![ScriptedSignal::Error]).await;
        let mut camera = NullCamera::new();
        let mut session = ready_session();

        let outcome = sampler
            .run_window(
                Challenge::Neutral,
                Acceptance::advisory(AcceptancePredicate::FaceDetected),
                &mut camera,
                &adapter,
                &mut session,
            )
            .await
            .unwrap();

        // Advisory: committed anyway, with the predicate unmet.
        assert!(matches!(outcome, WindowOutcome::Committed { satisfied: false, .. }));
        assert_eq!(adapter.analysis().calls(), 10);
        assert!(session.evidence().has(Challenge::Neutral));
    }

    #[tokio::test(start_paused = true)]
    async fn inactive_challenge_is_refused_before_sampling() {
        let sampler = sampler();
        let adapter = adapter(vec![ScriptedSignal::face()]).await;
        let mut camera = NullCamera::new();
        let probe = camera.probe();
        let mut session = ready_session();

        let start = Instant::now();
        let err = sampler
            .run_window(
                Challenge::TurnLeft,
                Acceptance::advisory(AcceptancePredicate::FaceDetected),
                &mut camera,
                &adapter,
                &mut session,
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EnrollError::Evidence(EvidenceError::NotActive { got: Challenge::TurnLeft, active: Some(Challenge::Neutral) })
        ));
        assert_eq!(probe.frames(), 0);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(session.evidence().captured_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn one_smiling_frame_satisfies_the_window() {
        let sampler = sampler();
        let mut script = vec![ScriptedSignal::happy(0.1); 3];
        script.push(ScriptedSignal::happy(0.9));
        script.push(ScriptedSignal::happy(0.2));
        let adapter = adapter(script).await;
        let mut camera = NullCamera::new();
        let mut session = ready_session();
        session.record_window(Challenge::Neutral, EncodedImage::png(vec![1]), Utc::now()).unwrap();
        session.record_window(Challenge::Blink, EncodedImage::png(vec![1]), Utc::now()).unwrap();

        let outcome = sampler
            .run_window(
                Challenge::Smile,
                Acceptance::advisory(AcceptancePredicate::Happy { threshold: 0.6 }),
                &mut camera,
                &adapter,
                &mut session,
            )
            .await
            .unwrap();

        assert!(matches!(outcome, WindowOutcome::Committed { satisfied: true, .. }));
        assert_eq!(adapter.analysis().calls(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn enforced_window_without_match_is_rejected() {
        let sampler = sampler();
        let adapter = adapter(vec![ScriptedSignal::NoFace]).await;
        let mut camera = NullCamera::new();
        let mut session = ready_session();

        let outcome = sampler
            .run_window(
                Challenge::Neutral,
                Acceptance::enforced(AcceptancePredicate::FaceDetected),
                &mut camera,
                &adapter,
                &mut session,
            )
            .await
            .unwrap();

        assert_eq!(outcome, WindowOutcome::Rejected { ticks: 10 });
        assert!(!session.evidence().has(Challenge::Neutral));
        assert_eq!(session.active_challenge(), Some(Challenge::Neutral));
        assert_eq!(*sampler.progress().borrow(), SamplingProgress::idle());
    }

    #[tokio::test(start_paused = true)]
    async fn never_readable_camera_times_out() {
        let sampler = sampler();
        let adapter = adapter(vec![ScriptedSignal::face()]).await;
        let mut camera = NullCamera::new().with_unready_ticks(u32::MAX);
        let mut session = ready_session();

        let start = Instant::now();
        let outcome = sampler
            .run_window(
                Challenge::Neutral,
                Acceptance::advisory(AcceptancePredicate::FaceDetected),
                &mut camera,
                &adapter,
                &mut session,
            )
            .await
            .unwrap();

        assert_eq!(outcome, WindowOutcome::TimedOut { ticks: 0 });
        assert_elapsed(start, sampler.config().window_deadline());
        assert_eq!(session.evidence().captured_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_mid_window_commits_nothing_and_stops_ticking() {
        let (tx, mut rx) = event_channel();
        let sampler = sampler().with_events(tx);
        let stop = sampler.stop_handle();
        let adapter = adapter(vec![ScriptedSignal::face()]).await;
        let mut camera = NullCamera::new();
        let probe = camera.probe();
        let mut session = ready_session();

        let run = sampler.run_window(
            Challenge::Neutral,
            Acceptance::advisory(AcceptancePredicate::FaceDetected),
            &mut camera,
            &adapter,
            &mut session,
        );
        let canceller = async {
            while let Some(event) = rx.recv().await {
                if let LivenessEvent::Progress(p) = event {
                    if p.percent == 40 {
                        stop.stop();
                        break;
                    }
                }
            }
        };

        let (outcome, ()) = tokio::join!(run, canceller);
        assert_eq!(outcome.unwrap(), WindowOutcome::Cancelled);
        assert_eq!(probe.frames(), 4);

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(probe.frames(), 4);
        assert_eq!(session.evidence().captured_count(), 0);
        assert_eq!(sampler.progress().borrow().percent, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_sampler_never_ticks() {
        let sampler = sampler();
        let stop = sampler.stop_handle();
        stop.stop();
        stop.stop();
        assert!(stop.is_stopped());

        let adapter = adapter(vec![ScriptedSignal::face()]).await;
        let mut camera = NullCamera::new();
        let probe = camera.probe();
        let mut session = ready_session();

        let outcome = sampler
            .run_window(
                Challenge::Neutral,
                Acceptance::advisory(AcceptancePredicate::FaceDetected),
                &mut camera,
                &adapter,
                &mut session,
            )
            .await
            .unwrap();
        assert_eq!(outcome, WindowOutcome::Cancelled);
        assert_eq!(probe.frames(), 0);

        sampler.rearm();
        assert!(!stop.is_stopped());
    }

    #[test]
    fn deadline_scales_with_window() {
        let config = SamplerConfig::default();
        assert_eq!(config.window_deadline(), Duration::from_millis(10 * 300 * 5));
    }

    #[test]
    fn zero_tick_interval_is_refused() {
        let config = SamplerConfig { tick_interval: Duration::ZERO, ..SamplerConfig::default() };
        assert!(matches!(FrameSampler::new(config), Err(EnrollError::Config(_))));
        let config = SamplerConfig { window_size: 0, ..SamplerConfig::default() };
        assert!(FrameSampler::new(config).is_err());
    }
}
