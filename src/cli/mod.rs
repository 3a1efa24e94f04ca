pub mod ascii_preview;

use std::time::Duration;
use crate::camera::CameraSource;
use crate::core::challenge::Challenge;
use crate::core::events::{EventStream, LivenessEvent};
use crate::core::quality::QualityMetrics;
use crate::core::signal::FaceAnalysis;
use crate::error::Result;
use crate::service::{RegistrationEndpoint, VerificationEndpoint};
use crate::wizard::EnrollmentWizard;

pub use ascii_preview::{check_for_escape, clear_screen, progress_bar, AsciiRenderer, Overlay, PreviewArea};

const ESCAPE_POLL: Duration = Duration::from_millis(50);

/// Turns liveness events into terminal output.
pub struct LivenessPreview {
    renderer: AsciiRenderer,
    area: PreviewArea,
    challenge: Option<Challenge>,
    percent: u8,
    captured: usize,
}

impl LivenessPreview {
    pub fn new() -> Self {
        Self {
            renderer: AsciiRenderer::new(None, None),
            area: PreviewArea::new(),
            challenge: None,
            percent: 0,
            captured: 0,
        }
    }

    pub fn handle(&mut self, event: LivenessEvent) {
        match event {
            LivenessEvent::CameraReady => println!("\n📷 Camera ready - follow the instructions:"),
            LivenessEvent::ChallengeStarted { challenge, attempt } => {
                self.challenge = Some(challenge);
                self.percent = 0;
                if attempt > 1 {
                    tracing::debug!("Retrying {} (attempt {})", challenge, attempt);
                }
            }
            LivenessEvent::FrameAnalyzed { frame, signal, .. } => {
                // Framing hints only make sense while the subject faces forward.
                let hint = match (self.challenge, signal.face.as_ref()) {
                    (Some(Challenge::Neutral), Some(face)) => {
                        QualityMetrics::calculate(&frame.image, face).primary_suggestion()
                    }
                    _ => None,
                };
                let instruction = match self.challenge {
                    _ if !signal.face_detected => "No face detected",
                    Some(challenge) => hint.unwrap_or(challenge.instruction()),
                    None => "",
                };
                let overlay = Overlay {
                    face: signal.face.as_ref(),
                    instruction,
                    percent: self.percent,
                    captured: self.captured,
                    total: Challenge::COUNT,
                };
                let block = self.renderer.render(&frame.image, &overlay);
                if let Err(e) = self.area.draw(&block) {
                    tracing::debug!("Preview redraw failed: {}", e);
                }
            }
            LivenessEvent::Progress(progress) => self.percent = progress.percent,
            LivenessEvent::TickSkipped { .. } => {}
            LivenessEvent::EvidenceCommitted { challenge, satisfied } => {
                self.captured += 1;
                tracing::info!("✅ {} captured{}", challenge.label(), if satisfied { "" } else { " (unconfirmed)" });
            }
            LivenessEvent::WindowRejected { challenge, attempt, timed_out } => {
                let why = if timed_out { "camera stalled" } else { "not detected" };
                tracing::warn!("{} {}, retrying (attempt {})", challenge.label(), why, attempt + 1);
            }
            LivenessEvent::SessionCompleted => println!("\r\n\n✅ All challenges captured"),
            LivenessEvent::Cancelled => println!("\r\n\n❌ Cancelled"),
        }
    }
}

impl Default for LivenessPreview {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the liveness stage with a live preview. Esc cancels.
pub async fn run_liveness_with_preview<S, A, E>(
    wizard: &mut EnrollmentWizard<S, A, E>,
    events: &mut EventStream,
) -> Result<()>
where
    S: CameraSource,
    A: FaceAnalysis,
    E: RegistrationEndpoint + VerificationEndpoint,
{
    let stop = wizard.stop_handle();
    let mut preview = LivenessPreview::new();
    let mut escape_poll = tokio::time::interval(ESCAPE_POLL);

    let raw_mode = crossterm::terminal::enable_raw_mode().is_ok();
    let result = {
        let run = wizard.run_liveness();
        tokio::pin!(run);
        loop {
            tokio::select! {
                result = &mut run => break result,
                Some(event) = events.recv() => preview.handle(event),
                _ = escape_poll.tick() => {
                    if matches!(check_for_escape(), Ok(true)) {
                        stop.stop();
                    }
                }
            }
        }
    };
    if raw_mode {
        crossterm::terminal::disable_raw_mode().ok();
    }

    while let Ok(event) = events.try_recv() {
        preview.handle(event);
    }
    println!();
    result
}
