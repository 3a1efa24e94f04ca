use chrono::NaiveDate;
use face_enroll::config::LivenessConfig;
use face_enroll::core::{event_channel, LivenessEvent};
use face_enroll::service::protocol::VerificationResponse;
use face_enroll::testing::{NullCameraSource, NullEndpoints, NullFaceAnalysis, ScriptedSignal};
use face_enroll::wizard::{AccountSetup, Gender, PersonalDetails};
use face_enroll::{Challenge, EnrollError, EnrollmentWizard, SubmitError, WizardStage};

type Wizard = EnrollmentWizard<NullCameraSource, NullFaceAnalysis, NullEndpoints>;

fn details() -> PersonalDetails {
    PersonalDetails {
        first_name: "Selam".into(),
        last_name: "Girma".into(),
        gender: Gender::Female,
        date_of_birth: NaiveDate::from_ymd_opt(2001, 11, 30).unwrap(),
        year_of_study: 4,
    }
}

fn account() -> AccountSetup {
    AccountSetup { email: "selam.girma@uni.edu".into(), password: "liveness#2024".into() }
}

async fn wizard_at_liveness(source: NullCameraSource, analysis: NullFaceAnalysis, endpoints: NullEndpoints) -> Wizard {
    let mut wizard = EnrollmentWizard::new(&LivenessConfig::default(), source, analysis, endpoints).unwrap();
    wizard.submit_personal_details(details()).unwrap();
    wizard.register(account()).await.unwrap();
    wizard
}

#[tokio::test(start_paused = true)]
async fn full_enrollment_submits_all_evidence_and_releases_camera() {
    let source = NullCameraSource::new();
    let source_probe = source.probe();
    let endpoints = NullEndpoints::new();
    let endpoint_probe = endpoints.probe();
    let (tx, mut rx) = event_channel();

    let mut wizard = wizard_at_liveness(source, NullFaceAnalysis::new(vec![ScriptedSignal::happy(0.8)]), endpoints)
        .await
        .with_events(tx);
    assert_eq!(endpoint_probe.registrations(), 1);

    wizard.enter_liveness_stage().await.unwrap();
    wizard.run_liveness().await.unwrap();
    assert!(wizard.can_complete_registration());
    assert!(!wizard.camera_held());
    assert_eq!(source_probe.camera().unwrap().releases(), 1);

    let outcome = wizard.complete_registration().await.unwrap();
    assert_eq!(outcome.subject_id.0, NullEndpoints::SUBJECT);
    assert_eq!(wizard.stage(), WizardStage::Done);

    let camera = source_probe.camera().unwrap();
    assert_eq!(camera.frames(), 50);
    assert_eq!(camera.releases(), 1);

    let payload = endpoint_probe.last_verification().unwrap();
    assert_eq!(payload.subject_id.0, NullEndpoints::SUBJECT);
    assert_eq!(payload.parts.len(), Challenge::COUNT + 1);
    assert!(payload.parts.iter().all(|p| p.image.mime == "image/png" && !p.image.is_empty()));

    let mut committed = Vec::new();
    let mut saw_ready = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            LivenessEvent::CameraReady => saw_ready = true,
            LivenessEvent::EvidenceCommitted { challenge, satisfied } => {
                assert!(satisfied, "{} should be satisfied", challenge);
                committed.push(challenge);
            }
            _ => {}
        }
    }
    assert!(saw_ready);
    assert_eq!(committed, Challenge::ORDER.to_vec());
}

#[tokio::test(start_paused = true)]
async fn rejected_verification_keeps_evidence_for_resubmission() {
    let source = NullCameraSource::new();
    let source_probe = source.probe();
    let endpoints = NullEndpoints::new().then_verify(Ok(VerificationResponse {
        verified: false,
        status: Some("Liveness check failed".into()),
    }));
    let endpoint_probe = endpoints.probe();
    let analysis = NullFaceAnalysis::new(vec![ScriptedSignal::face()]);
    let analysis_probe = analysis.probe();
    let mut wizard = wizard_at_liveness(source, analysis, endpoints).await;

    wizard.enter_liveness_stage().await.unwrap();
    wizard.run_liveness().await.unwrap();
    let sampled = analysis_probe.calls();

    let err = wizard.complete_registration().await.unwrap_err();
    assert_eq!(err, SubmitError::Rejected { status: "Liveness check failed".into() });
    assert_eq!(wizard.stage(), WizardStage::Liveness);
    assert!(wizard.session().is_complete());
    assert!(!wizard.camera_held());
    assert_eq!(source_probe.camera().unwrap().releases(), 1);

    let first = endpoint_probe.last_verification().unwrap();
    let outcome = wizard.complete_registration().await.unwrap();
    assert_eq!(outcome.subject_id.0, NullEndpoints::SUBJECT);
    assert_eq!(endpoint_probe.verifications(), 2);
    assert_eq!(endpoint_probe.last_verification().unwrap(), first);
    assert_eq!(analysis_probe.calls(), sampled);
}

#[tokio::test(start_paused = true)]
async fn transport_failure_is_retryable_without_recapture() {
    let endpoints = NullEndpoints::new().then_verify(Err(SubmitError::Http("connection failed".into())));
    let endpoint_probe = endpoints.probe();
    let mut wizard =
        wizard_at_liveness(NullCameraSource::new(), NullFaceAnalysis::new(vec![ScriptedSignal::face()]), endpoints)
            .await;

    wizard.enter_liveness_stage().await.unwrap();
    wizard.run_liveness().await.unwrap();

    let err = wizard.complete_registration().await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(wizard.session().evidence().captured_count(), Challenge::COUNT);

    wizard.complete_registration().await.unwrap();
    assert_eq!(endpoint_probe.verifications(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancelling_mid_run_releases_camera_and_keeps_earlier_evidence() {
    let source = NullCameraSource::new();
    let source_probe = source.probe();
    let (tx, mut rx) = event_channel();
    let mut wizard =
        wizard_at_liveness(source, NullFaceAnalysis::new(vec![ScriptedSignal::face()]), NullEndpoints::new())
            .await
            .with_events(tx);
    wizard.enter_liveness_stage().await.unwrap();

    let stop = wizard.stop_handle();
    let canceller = async {
        while let Some(event) = rx.recv().await {
            if let LivenessEvent::ChallengeStarted { challenge: Challenge::Smile, .. } = event {
                stop.stop();
                break;
            }
        }
    };
    let (result, ()) = tokio::join!(wizard.run_liveness(), canceller);

    assert!(matches!(result, Err(EnrollError::Cancelled)));
    let camera = source_probe.camera().unwrap();
    assert_eq!(camera.releases(), 1);
    assert_eq!(camera.frames(), 20);
    assert!(!wizard.camera_held());
    assert!(wizard.session().evidence().has(Challenge::Blink));
    assert!(!wizard.session().evidence().has(Challenge::Smile));
    assert_eq!(wizard.session().active_challenge(), None);

    let err = wizard.complete_registration().await.unwrap_err();
    assert!(matches!(err, SubmitError::NotReady { .. }));
}

#[tokio::test(start_paused = true)]
async fn restart_clears_evidence_and_samples_again() {
    let source = NullCameraSource::new();
    let source_probe = source.probe();
    let mut wizard =
        wizard_at_liveness(source, NullFaceAnalysis::new(vec![ScriptedSignal::face()]), NullEndpoints::new()).await;

    wizard.enter_liveness_stage().await.unwrap();
    wizard.run_liveness().await.unwrap();
    assert!(wizard.session().is_complete());

    let first_camera = source_probe.camera().unwrap();
    assert!(first_camera.is_released());

    wizard.restart_liveness().unwrap();
    assert_eq!(wizard.session().evidence().captured_count(), 0);
    assert!(!wizard.can_complete_registration());
    assert!(matches!(wizard.run_liveness().await, Err(EnrollError::CameraNotReady)));

    wizard.enter_liveness_stage().await.unwrap();
    assert_eq!(wizard.session().active_challenge(), Some(Challenge::Neutral));
    wizard.run_liveness().await.unwrap();
    assert!(wizard.session().is_complete());
    assert_eq!(source_probe.acquisitions(), 2);
    assert_eq!(first_camera.frames(), 50);
    assert_eq!(source_probe.camera().unwrap().frames(), 50);
}

#[tokio::test]
async fn failed_registration_stays_on_account_stage() {
    let endpoints = NullEndpoints::new().failing_registration(SubmitError::Status {
        code: 400,
        body: "{\"email\": [\"already registered\"]}".into(),
    });
    let mut wizard: Wizard = EnrollmentWizard::new(
        &LivenessConfig::default(),
        NullCameraSource::new(),
        NullFaceAnalysis::new(vec![]),
        endpoints,
    )
    .unwrap();
    wizard.submit_personal_details(details()).unwrap();

    let err = wizard.register(account()).await.unwrap_err();
    assert!(matches!(err, EnrollError::Submit(SubmitError::Status { code: 400, .. })));
    assert_eq!(wizard.stage(), WizardStage::AccountSetup);
    assert!(wizard.subject_id().is_none());
}
