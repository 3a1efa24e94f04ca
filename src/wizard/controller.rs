//! Enrollment Wizard Controller.
//!
//! Stages run `PersonalDetails -> AccountSetup -> Liveness -> Done`. The
//! controller owns the liveness session, the camera lease for the liveness
//! stage and the face signal adapter, and decides when the final
//! submission may go out.

use std::fmt;
use tokio::sync::watch;
use crate::camera::{CameraLease, CameraSource};
use crate::common::config::LivenessConfig;
use crate::core::events::{EventSink, LivenessEvent};
use crate::core::sampler::StopHandle;
use crate::core::sequencer::ChallengeSequencer;
use crate::core::session::{LivenessSession, SamplingProgress};
use crate::core::signal::{FaceAnalysis, FaceSignalAdapter};
use crate::error::{EnrollError, Result, SubmitError};
use crate::service::protocol::{StudentRegistration, SubjectId, VerificationPayload};
use crate::service::{RegistrationEndpoint, VerificationEndpoint};
use crate::wizard::form::{AccountSetup, PersonalDetails};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardStage {
    PersonalDetails,
    AccountSetup,
    Liveness,
    Done,
}

impl WizardStage {
    pub fn name(self) -> &'static str {
        match self {
            WizardStage::PersonalDetails => "personal details",
            WizardStage::AccountSetup => "account setup",
            WizardStage::Liveness => "liveness verification",
            WizardStage::Done => "done",
        }
    }
}

impl fmt::Display for WizardStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A successfully verified enrollment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentOutcome {
    pub subject_id: SubjectId,
    pub status: Option<String>,
}

/// The face adapter is built at most once; a load failure sticks.
enum AnalysisSlot<A> {
    Pending(A),
    Loading,
    Ready(FaceSignalAdapter<A>),
    Failed(String),
}

pub struct EnrollmentWizard<S, A, E>
where
    S: CameraSource,
    A: FaceAnalysis,
    E: RegistrationEndpoint + VerificationEndpoint,
{
    stage: WizardStage,
    personal: Option<PersonalDetails>,
    subject: Option<SubjectId>,
    session: LivenessSession,
    sequencer: ChallengeSequencer,
    camera_source: S,
    camera: Option<CameraLease<S::Device>>,
    analysis: AnalysisSlot<A>,
    endpoints: E,
}

impl<S, A, E> EnrollmentWizard<S, A, E>
where
    S: CameraSource,
    A: FaceAnalysis,
    E: RegistrationEndpoint + VerificationEndpoint,
{
    pub fn new(config: &LivenessConfig, camera_source: S, analysis: A, endpoints: E) -> Result<Self> {
        Ok(Self {
            stage: WizardStage::PersonalDetails,
            personal: None,
            subject: None,
            session: LivenessSession::new(),
            sequencer: ChallengeSequencer::new(config)?,
            camera_source,
            camera: None,
            analysis: AnalysisSlot::Pending(analysis),
            endpoints,
        })
    }

    pub fn with_events(mut self, sink: EventSink) -> Self {
        self.sequencer.set_events(sink);
        self
    }

    pub fn stage(&self) -> WizardStage {
        self.stage
    }

    pub fn session(&self) -> &LivenessSession {
        &self.session
    }

    pub fn subject_id(&self) -> Option<&SubjectId> {
        self.subject.as_ref()
    }

    /// Stops the running liveness window from outside the `run_liveness` future.
    pub fn stop_handle(&self) -> StopHandle {
        self.sequencer.stop_handle()
    }

    pub fn progress(&self) -> watch::Receiver<SamplingProgress> {
        self.sequencer.progress()
    }

    pub fn camera_held(&self) -> bool {
        self.camera.as_ref().is_some_and(|lease| !lease.is_released())
    }

    /// The final submission is only offered once every challenge has evidence.
    pub fn can_complete_registration(&self) -> bool {
        self.stage == WizardStage::Liveness && self.session.is_complete()
    }

    fn expect_stage(&self, expected: WizardStage) -> Result<()> {
        if self.stage != expected {
            return Err(EnrollError::WrongStage { expected: expected.name(), actual: self.stage.name() });
        }
        Ok(())
    }

    pub fn submit_personal_details(&mut self, details: PersonalDetails) -> Result<()> {
        self.expect_stage(WizardStage::PersonalDetails)?;
        details.validate()?;
        self.personal = Some(details);
        self.stage = WizardStage::AccountSetup;
        Ok(())
    }

    /// Only the account stage can step back; once registered the record exists
    /// server-side.
    pub fn back(&mut self) -> Result<()> {
        self.expect_stage(WizardStage::AccountSetup)?;
        self.stage = WizardStage::PersonalDetails;
        Ok(())
    }

    /// Create the student record and move on to liveness.
    pub async fn register(&mut self, account: AccountSetup) -> Result<SubjectId> {
        self.expect_stage(WizardStage::AccountSetup)?;
        account.validate()?;
        let personal = self
            .personal
            .clone()
            .ok_or_else(|| EnrollError::InvalidForm("Personal details have not been submitted".into()))?;

        let registration = StudentRegistration { personal, account };
        let subject = self.endpoints.register(&registration).await?;

        self.subject = Some(subject.clone());
        self.stage = WizardStage::Liveness;
        Ok(subject)
    }

    async fn ensure_adapter(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.analysis, AnalysisSlot::Loading) {
            AnalysisSlot::Pending(analysis) => match FaceSignalAdapter::initialize(analysis).await {
                Ok(adapter) => {
                    self.analysis = AnalysisSlot::Ready(adapter);
                    Ok(())
                }
                Err(e) => {
                    self.analysis = AnalysisSlot::Failed(e.to_string());
                    Err(e)
                }
            },
            AnalysisSlot::Failed(message) => {
                let err = EnrollError::Model(message.clone());
                self.analysis = AnalysisSlot::Failed(message);
                Err(err)
            }
            ready @ AnalysisSlot::Ready(_) => {
                self.analysis = ready;
                Ok(())
            }
            AnalysisSlot::Loading => Err(EnrollError::Model("Face analysis is still loading".into())),
        }
    }

    /// Load the face models and acquire the camera. Sampling may start only
    /// after this succeeds.
    pub async fn enter_liveness_stage(&mut self) -> Result<()> {
        self.expect_stage(WizardStage::Liveness)?;
        if self.camera_held() && self.session.camera_ready() {
            return Ok(());
        }

        self.ensure_adapter().await?;

        let device = self.camera_source.acquire().await.map_err(|e| {
            tracing::error!("Camera unavailable: {}", e);
            match e {
                EnrollError::Camera(_) => e,
                other => EnrollError::Camera(other.to_string()),
            }
        })?;

        self.camera = Some(CameraLease::new(device));
        self.sequencer.rearm();
        self.session.mark_camera_ready();
        self.sequencer.emit(LivenessEvent::CameraReady);
        tracing::info!("Liveness stage ready, first challenge: {:?}", self.session.active_challenge());
        Ok(())
    }

    /// Drive the challenges until every one has evidence.
    ///
    /// The camera is released whenever this returns: once the evidence is
    /// complete it is no longer needed, and a fatal error or a cancellation
    /// tears the stage down. Evidence already captured is kept.
    pub async fn run_liveness(&mut self) -> Result<()> {
        self.expect_stage(WizardStage::Liveness)?;

        let (Some(lease), AnalysisSlot::Ready(adapter)) = (self.camera.as_mut(), &self.analysis) else {
            return Err(EnrollError::CameraNotReady);
        };
        if lease.is_released() {
            return Err(EnrollError::CameraNotReady);
        }

        let result = self.sequencer.run(&mut self.session, &mut **lease, adapter).await;
        match &result {
            Ok(()) => {
                tracing::info!("All liveness challenges captured");
                self.release_camera();
            }
            Err(EnrollError::Cancelled) => {
                tracing::info!("Liveness cancelled");
                self.release_camera();
            }
            Err(e) => {
                tracing::error!("Liveness stage aborted: {}", e);
                self.release_camera();
            }
        }
        result
    }

    /// Clear all evidence and start over at the first challenge. Sampling
    /// resumes after the next `enter_liveness_stage`.
    pub fn restart_liveness(&mut self) -> Result<()> {
        self.expect_stage(WizardStage::Liveness)?;
        self.session.restart();
        tracing::info!("Liveness restarted");
        Ok(())
    }

    /// Submit the captured evidence for verification.
    ///
    /// Nothing is sent while evidence is incomplete. On any failure the
    /// evidence stays in place, so a retry resubmits without recapturing.
    pub async fn complete_registration(&mut self) -> std::result::Result<EnrollmentOutcome, SubmitError> {
        match self.stage {
            WizardStage::Liveness => {}
            WizardStage::Done => return Err(SubmitError::AlreadyCompleted),
            WizardStage::PersonalDetails | WizardStage::AccountSetup => return Err(SubmitError::NoSubject),
        }
        if !self.session.is_complete() {
            return Err(SubmitError::NotReady { missing: self.session.evidence().missing() });
        }
        let subject = self.subject.clone().ok_or(SubmitError::NoSubject)?;
        let payload = VerificationPayload::from_store(subject.clone(), self.session.evidence())?;

        let response = self.endpoints.verify(&payload).await?;
        if !response.verified {
            let status = response.status.unwrap_or_else(|| "verification failed".to_string());
            tracing::warn!("Verification rejected for {}: {}", subject, status);
            return Err(SubmitError::Rejected { status });
        }

        tracing::info!("Student {} verified", subject);
        self.stage = WizardStage::Done;
        Ok(EnrollmentOutcome { subject_id: subject, status: response.status })
    }

    /// Stop any in-flight window and give the camera back.
    pub fn cancel(&mut self) {
        self.sequencer.stop_handle().stop();
        self.release_camera();
    }

    fn release_camera(&mut self) {
        if let Some(mut lease) = self.camera.take() {
            lease.release();
        }
        self.session.mark_camera_released();
    }
}

impl<S, A, E> Drop for EnrollmentWizard<S, A, E>
where
    S: CameraSource,
    A: FaceAnalysis,
    E: RegistrationEndpoint + VerificationEndpoint,
{
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::challenge::Challenge;
    use crate::core::events::event_channel;
    use crate::testing::{NullCameraSource, NullEndpoints, NullFaceAnalysis, ScriptedSignal};
    use crate::wizard::form::Gender;
    use chrono::NaiveDate;

    type TestWizard = EnrollmentWizard<NullCameraSource, NullFaceAnalysis, NullEndpoints>;

    fn details() -> PersonalDetails {
        PersonalDetails {
            first_name: "Hana".into(),
            last_name: "Tesfaye".into(),
            gender: Gender::Female,
            date_of_birth: NaiveDate::from_ymd_opt(2003, 1, 9).unwrap(),
            year_of_study: 3,
        }
    }

    fn account() -> AccountSetup {
        AccountSetup { email: "hana@uni.edu".into(), password: "pa55word!".into() }
    }

    fn wizard(source: NullCameraSource, analysis: NullFaceAnalysis) -> TestWizard {
        EnrollmentWizard::new(&LivenessConfig::default(), source, analysis, NullEndpoints::new()).unwrap()
    }

    #[tokio::test]
    async fn stages_advance_in_order() {
        let mut wizard = wizard(NullCameraSource::new(), NullFaceAnalysis::new(vec![ScriptedSignal::face()]));
        assert_eq!(wizard.stage(), WizardStage::PersonalDetails);

        let err = wizard.register(account()).await.unwrap_err();
        assert!(matches!(err, EnrollError::WrongStage { .. }));

        wizard.submit_personal_details(details()).unwrap();
        assert_eq!(wizard.stage(), WizardStage::AccountSetup);
        wizard.back().unwrap();
        assert_eq!(wizard.stage(), WizardStage::PersonalDetails);
        wizard.submit_personal_details(details()).unwrap();

        let subject = wizard.register(account()).await.unwrap();
        assert_eq!(subject.0, NullEndpoints::SUBJECT);
        assert_eq!(wizard.stage(), WizardStage::Liveness);
        assert!(wizard.back().is_err());
    }

    #[tokio::test]
    async fn invalid_details_keep_the_stage() {
        let mut wizard = wizard(NullCameraSource::new(), NullFaceAnalysis::new(vec![]));
        let bad = PersonalDetails { year_of_study: 9, ..details() };
        assert!(matches!(wizard.submit_personal_details(bad), Err(EnrollError::InvalidForm(_))));
        assert_eq!(wizard.stage(), WizardStage::PersonalDetails);
    }

    #[tokio::test]
    async fn no_sampling_before_camera_ready() {
        let source = NullCameraSource::denied("Permission denied");
        let source_probe = source.probe();
        let mut wizard = wizard(source, NullFaceAnalysis::new(vec![ScriptedSignal::face()]));
        wizard.submit_personal_details(details()).unwrap();
        wizard.register(account()).await.unwrap();

        let err = wizard.enter_liveness_stage().await.unwrap_err();
        assert!(matches!(err, EnrollError::Camera(ref m) if m.contains("Permission denied")));
        assert!(err.is_fatal_to_session());
        assert_eq!(source_probe.acquisitions(), 1);
        assert_eq!(wizard.session().active_challenge(), None);

        assert!(matches!(wizard.run_liveness().await, Err(EnrollError::CameraNotReady)));
    }

    #[tokio::test]
    async fn model_load_failure_is_remembered() {
        let analysis = NullFaceAnalysis::failing_load("model file missing");
        let analysis_probe = analysis.probe();
        let source = NullCameraSource::new();
        let source_probe = source.probe();
        let mut wizard = wizard(source, analysis);
        wizard.submit_personal_details(details()).unwrap();
        wizard.register(account()).await.unwrap();

        for _ in 0..2 {
            let err = wizard.enter_liveness_stage().await.unwrap_err();
            assert!(matches!(err, EnrollError::Model(ref m) if m.contains("model file missing")));
        }
        assert_eq!(analysis_probe.loads(), 1);
        assert_eq!(source_probe.acquisitions(), 0);
    }

    #[tokio::test]
    async fn incomplete_evidence_is_not_submitted() {
        let endpoints = NullEndpoints::new();
        let endpoint_probe = endpoints.probe();
        let mut wizard: TestWizard = EnrollmentWizard::new(
            &LivenessConfig::default(),
            NullCameraSource::new(),
            NullFaceAnalysis::new(vec![ScriptedSignal::face()]),
            endpoints,
        )
        .unwrap();
        wizard.submit_personal_details(details()).unwrap();
        wizard.register(account()).await.unwrap();

        assert!(!wizard.can_complete_registration());
        let err = wizard.complete_registration().await.unwrap_err();
        assert_eq!(err, SubmitError::NotReady { missing: Challenge::ORDER.to_vec() });
        assert!(!err.is_retryable());
        assert_eq!(endpoint_probe.verifications(), 0);
    }

    #[tokio::test]
    async fn cancel_releases_the_camera() {
        let source = NullCameraSource::new();
        let source_probe = source.probe();
        let mut wizard = wizard(source, NullFaceAnalysis::new(vec![ScriptedSignal::face()]));
        wizard.submit_personal_details(details()).unwrap();
        wizard.register(account()).await.unwrap();
        wizard.enter_liveness_stage().await.unwrap();
        assert!(wizard.camera_held());
        assert_eq!(wizard.session().active_challenge(), Some(Challenge::Neutral));

        wizard.cancel();
        wizard.cancel();
        let camera = source_probe.camera().unwrap();
        assert_eq!(camera.releases(), 1);
        assert!(!wizard.camera_held());
        assert!(wizard.stop_handle().is_stopped());
        assert_eq!(wizard.session().active_challenge(), None);
    }

    #[tokio::test]
    async fn events_attached_after_construction_are_delivered() {
        let (tx, mut rx) = event_channel();
        let mut wizard = wizard(NullCameraSource::new(), NullFaceAnalysis::new(vec![ScriptedSignal::face()]))
            .with_events(tx);
        wizard.submit_personal_details(details()).unwrap();
        wizard.register(account()).await.unwrap();
        wizard.enter_liveness_stage().await.unwrap();

        assert!(matches!(rx.try_recv(), Ok(LivenessEvent::CameraReady)));
    }

    #[tokio::test(start_paused = true)]
    async fn completed_run_releases_camera_before_submission() {
        let source = NullCameraSource::new();
        let source_probe = source.probe();
        let mut wizard = wizard(source, NullFaceAnalysis::new(vec![ScriptedSignal::face()]));
        wizard.submit_personal_details(details()).unwrap();
        wizard.register(account()).await.unwrap();
        wizard.enter_liveness_stage().await.unwrap();

        wizard.run_liveness().await.unwrap();
        assert!(wizard.can_complete_registration());
        assert!(!wizard.camera_held());
        assert_eq!(source_probe.camera().unwrap().releases(), 1);
        assert_eq!(*wizard.progress().borrow(), SamplingProgress::idle());
    }

    #[tokio::test(start_paused = true)]
    async fn verified_enrollment_is_not_resubmitted() {
        let endpoints = NullEndpoints::new();
        let endpoint_probe = endpoints.probe();
        let mut wizard: TestWizard = EnrollmentWizard::new(
            &LivenessConfig::default(),
            NullCameraSource::new(),
            NullFaceAnalysis::new(vec![ScriptedSignal::face()]),
            endpoints,
        )
        .unwrap();
        wizard.submit_personal_details(details()).unwrap();
        wizard.register(account()).await.unwrap();
        wizard.enter_liveness_stage().await.unwrap();
        wizard.run_liveness().await.unwrap();

        wizard.complete_registration().await.unwrap();
        assert_eq!(wizard.stage(), WizardStage::Done);

        let err = wizard.complete_registration().await.unwrap_err();
        assert_eq!(err, SubmitError::AlreadyCompleted);
        assert!(!err.is_retryable());
        assert_eq!(endpoint_probe.verifications(), 1);
    }

    #[test]
    fn invalid_liveness_config_is_refused() {
        let config = LivenessConfig { tick_interval_ms: 0, ..LivenessConfig::default() };
        let result: Result<TestWizard> =
            EnrollmentWizard::new(&config, NullCameraSource::new(), NullFaceAnalysis::new(vec![]), NullEndpoints::new());
        assert!(matches!(result, Err(EnrollError::Config(_))));
    }

    #[tokio::test]
    async fn dropping_the_wizard_releases_the_camera() {
        let source = NullCameraSource::new();
        let source_probe = source.probe();
        let mut wizard = wizard(source, NullFaceAnalysis::new(vec![ScriptedSignal::face()]));
        wizard.submit_personal_details(details()).unwrap();
        wizard.register(account()).await.unwrap();
        wizard.enter_liveness_stage().await.unwrap();

        drop(wizard);
        assert_eq!(source_probe.camera().unwrap().releases(), 1);
    }
}
