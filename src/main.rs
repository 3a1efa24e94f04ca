use face_enroll::{
    camera::{CameraSource, CaptureDevice},
    cli,
    config::Config,
    core::{event_channel, FaceSignalAdapter},
    paths, Challenge, DevMode, EnrollmentWizard, HttpEnrollmentClient, OrtFaceAnalysis, SubmitError,
    V4l2Camera, V4l2CameraSource,
};
use face_enroll::common::dev_mode::annotate_face;
use face_enroll::wizard::{AccountSetup, Gender, PersonalDetails};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "face-enroll")]
#[command(about = "Student enrollment with liveness capture")]
struct Cli {
    /// Enable development mode (verbose logs, captures saved locally)
    #[arg(long, global = true)]
    dev: bool,

    /// Config file (defaults: ./configs, user config dir, /etc)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a student and capture liveness evidence
    Enroll {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        /// M or F
        #[arg(long, value_parser = parse_gender)]
        gender: Gender,
        /// YYYY-MM-DD
        #[arg(long)]
        date_of_birth: NaiveDate,
        /// Year of study, 1-4
        #[arg(long)]
        year: u8,
        #[arg(long)]
        email: String,
        /// Prompted for when omitted
        #[arg(long)]
        password: Option<String>,
    },
    /// List video devices
    ListCameras,
    /// Grab a frame from the configured camera
    TestCamera,
    /// Load the face models and run them on one frame
    CheckModels,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.dev);

    let dev_mode = DevMode::new(cli.dev)?;
    let config = load_config(cli.config)?;
    let models_base = models_base(&dev_mode);

    match cli.command {
        Commands::Enroll { first_name, last_name, gender, date_of_birth, year, email, password } => {
            let personal = PersonalDetails {
                first_name,
                last_name,
                gender,
                date_of_birth,
                year_of_study: year,
            };
            let password = match password {
                Some(p) => p,
                None => prompt_password()?,
            };
            enroll(&config, models_base, &dev_mode, personal, AccountSetup { email, password }).await?;
        }
        Commands::ListCameras => {
            println!("🔍 Detecting available cameras...\n");
            let cameras = V4l2Camera::list_all_cameras()?;
            if cameras.is_empty() {
                println!("❌ No cameras found!");
                println!("\nTroubleshooting:");
                println!("  1. Check if cameras are connected");
                println!("  2. Ensure you have permission to access /dev/video*");
                return Ok(());
            }
            for (index, name, features, likely_ir) in &cameras {
                let tag = if *likely_ir { " (IR)" } else { "" };
                println!("📷 /dev/video{}: {}{}", index, name, tag);
                for feature in features {
                    println!("   - {}", feature);
                }
                println!();
            }
            match V4l2Camera::auto_detect() {
                Ok(index) => println!("✅ device_index = 999 selects /dev/video{}", index),
                Err(e) => println!("⚠️  Auto-detection failed: {}", e),
            }
        }
        Commands::TestCamera => {
            println!("Testing camera...");
            let mut source = V4l2CameraSource::new(&config.camera);
            let mut camera = source.acquire().await?;
            let frame = wait_for_frame(&mut camera).await?;
            let path = dev_mode.get_capture_path("test_camera");
            std::fs::write(&path, &frame.encode_png()?.bytes)?;
            println!("✅ Captured {}x{} frame to {}", frame.image.width(), frame.image.height(), path.display());
            camera.release();
        }
        Commands::CheckModels => {
            println!("Loading face models from {}...", models_base.display());
            let analysis = OrtFaceAnalysis::new(&config, models_base);
            let adapter = FaceSignalAdapter::initialize(analysis).await?;
            if !adapter.analysis().has_expressions() {
                println!("⚠️  No expression model; smile detection is advisory only");
            }

            let mut source = V4l2CameraSource::new(&config.camera);
            let mut camera = source.acquire().await?;
            let frame = wait_for_frame(&mut camera).await?;
            let signal = adapter.analyze(&frame).await?;
            camera.release();

            if let (Some(face), true) = (signal.face.as_ref(), dev_mode.is_enabled()) {
                let path = dev_mode.get_capture_path("check_models");
                annotate_face(&frame.image, face).save(&path)?;
                println!("Saved annotated frame to {}", path.display());
            }

            if signal.face_detected {
                println!("✅ Face detected (quality {:.2})", signal.quality.unwrap_or_default());
                let mut scores: Vec<_> = signal.expression_scores.iter().collect();
                scores.sort_by(|a, b| b.1.total_cmp(a.1));
                for (label, score) in scores {
                    println!("   {:<10} {:.2}", label, score);
                }
            } else {
                println!("⚠️  Models loaded, but no face in the test frame");
            }
        }
    }

    Ok(())
}

async fn enroll(
    config: &Config,
    models_base: PathBuf,
    dev_mode: &DevMode,
    personal: PersonalDetails,
    account: AccountSetup,
) -> Result<()> {
    let client = HttpEnrollmentClient::new(&config.api)?;
    let analysis = OrtFaceAnalysis::new(config, models_base);
    let source = V4l2CameraSource::new(&config.camera);
    let (tx, mut events) = event_channel();
    let mut wizard = EnrollmentWizard::new(&config.liveness, source, analysis, client)?.with_events(tx);

    wizard.submit_personal_details(personal)?;
    let subject = wizard.register(account).await?;
    println!("✅ Registered student {}", subject);

    wizard.enter_liveness_stage().await?;
    cli::run_liveness_with_preview(&mut wizard, &mut events).await?;

    if dev_mode.is_enabled() {
        let saved = dev_mode.dump_evidence(&subject.0, wizard.session().evidence())?;
        println!("Saved {} captures under {}", saved.len(), dev_mode.captures_dir().display());
    }

    println!("Submitting {} captures for verification...", Challenge::COUNT);
    let mut attempts = 0;
    loop {
        attempts += 1;
        match wizard.complete_registration().await {
            Ok(outcome) => {
                println!("✅ Enrollment complete for student {}", outcome.subject_id);
                if let Some(status) = outcome.status {
                    println!("   {}", status);
                }
                return Ok(());
            }
            Err(SubmitError::Rejected { status }) => {
                println!("❌ Liveness verification failed: {}", status);
                return Err(SubmitError::Rejected { status }.into());
            }
            Err(e) if e.is_retryable() && attempts < 3 => {
                println!("⚠️  {} - retrying", e);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn load_config(explicit: Option<PathBuf>) -> Result<Config> {
    match paths::find_config_file(explicit) {
        Some(path) => Config::load_from_path(&path).with_context(|| format!("loading {}", path.display())),
        None => {
            tracing::warn!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}

fn models_base(dev_mode: &DevMode) -> PathBuf {
    let system = paths::system_data_dir();
    if dev_mode.is_enabled() || !system.exists() {
        PathBuf::from(".")
    } else {
        system
    }
}

async fn wait_for_frame<D: CaptureDevice>(camera: &mut D) -> Result<face_enroll::Frame> {
    for _ in 0..50 {
        if let Some(frame) = camera.get_frame().await? {
            return Ok(frame);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    anyhow::bail!("camera produced no frame within 5 seconds")
}

fn parse_gender(value: &str) -> std::result::Result<Gender, String> {
    value.parse().map_err(|e: face_enroll::EnrollError| e.to_string())
}

fn prompt_password() -> Result<String> {
    use std::io::{self, BufRead, Write};
    print!("Password: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn setup_logging(dev_mode: bool) {
    if dev_mode {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }
}
