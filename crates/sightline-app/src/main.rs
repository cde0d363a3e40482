use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sightline_core::{
    canonicalize, class_name, CtcOcr, EigenFaceModel, EnrollmentStore, FaceLocator, FaceMatcher,
    ObjectDetector, OnnxFaceLocator, OnnxObjectDetector, TextExtractor, VoteSession,
    MIN_FACE_SIDE, SCAN_TIMEOUT_MESSAGE,
};
use sightline_hw::{RgbFrame, SharedCamera, V4lSource};

mod accounts;
mod config;
mod speech;
mod worker;

use accounts::{credentials_match, AccountStore, UserRecord};
use config::Config;
use speech::{CommandSpeech, NullSpeech, Speech};
use worker::{start_scan, CountingSink, DisplaySink, ScanEvent, ScanHandle, ScanOptions};

#[derive(Parser)]
#[command(name = "sightline", about = "Assistive camera recognition CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List video capture devices
    Devices,
    /// Create an account and enroll a face sample
    Signup {
        /// Username for the new account
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        password: String,
        /// Password confirmation
        #[arg(short, long)]
        confirm: String,
        /// Account category (e.g. "visually-impaired", "caretaker")
        #[arg(long, default_value = "standard")]
        category: String,
    },
    /// Log in with credentials, or with a face scan
    Login {
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        password: Option<String>,
        /// Use the camera instead of credentials
        #[arg(long)]
        face: bool,
    },
    /// Identify the person in front of the camera
    Identify,
    /// Detect objects and announce their names
    ScanObjects,
    /// Read printed text from the live camera feed
    ReadText,
    /// Capture a single photo and read its text
    CaptureText,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Devices => {
            let devices = V4lSource::list_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for d in devices {
                println!("{}  {} ({})", d.path, d.name, d.driver);
            }
        }
        Commands::Signup {
            name,
            password,
            confirm,
            category,
        } => {
            run_signup(&config, &name, &password, &confirm, &category).await?;
        }
        Commands::Login {
            name,
            password,
            face,
        } => {
            if face {
                run_face_login(&config).await?;
            } else {
                let (Some(name), Some(password)) = (name, password) else {
                    bail!("login requires --name and --password, or --face");
                };
                let store = AccountStore::new(&config.accounts_url);
                let users = store.fetch_users().await?;
                if credentials_match(&users, &name, &password) {
                    println!("Logged in as {name}");
                } else {
                    bail!("invalid username or password");
                }
            }
        }
        Commands::Identify => run_identify(&config).await?,
        Commands::ScanObjects => run_scan_objects(&config).await?,
        Commands::ReadText => run_read_text(&config).await?,
        Commands::CaptureText => run_capture_text(&config)?,
    }

    Ok(())
}

/// How a scan ended, from the foreground's point of view.
enum ScanOutcome<R> {
    Accepted(R),
    TimedOut,
    Cancelled,
}

/// Drive a scan to completion: publish display frames, stop on the
/// first terminal event or Ctrl-C. The camera is released before this
/// returns, whichever way the scan ends.
async fn run_scan<R, F>(
    camera: SharedCamera,
    detect: F,
    options: ScanOptions,
) -> Result<ScanOutcome<R>>
where
    R: Send + 'static,
    F: FnMut(&RgbFrame) -> Option<R> + Send + 'static,
{
    let (tx, rx) = tokio::sync::mpsc::channel(8);
    let handle = start_scan(camera, detect, options, tx);
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    Ok(drive_scan(rx, handle, shutdown).await)
}

/// Pump scan events until a terminal event arrives or the shutdown
/// future completes. The shutdown future is pinned once and polled
/// across iterations, so a signal arriving between polls is never lost.
async fn drive_scan<R: Send + 'static>(
    mut rx: tokio::sync::mpsc::Receiver<ScanEvent<R>>,
    handle: ScanHandle,
    shutdown: impl std::future::Future<Output = ()>,
) -> ScanOutcome<R> {
    let mut sink = CountingSink::default();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(ScanEvent::Frame(frame)) => sink.publish(frame),
                Some(ScanEvent::Accepted(result)) => {
                    handle.finish();
                    return ScanOutcome::Accepted(result);
                }
                Some(ScanEvent::TimedOut) => {
                    handle.finish();
                    return ScanOutcome::TimedOut;
                }
                None => {
                    handle.finish();
                    return ScanOutcome::Cancelled;
                }
            },
            _ = &mut shutdown => {
                tracing::info!("interrupted, stopping scan");
                handle.cancel();
                return ScanOutcome::Cancelled;
            }
        }
    }
}

/// Load the persisted face model if it still matches the enrollment
/// directory, otherwise retrain from the images on disk and save.
fn load_or_train_model(config: &Config) -> Result<EigenFaceModel> {
    let store = EnrollmentStore::new(&config.enroll_dir);
    let samples = store
        .load_samples()
        .context("failed to read enrollment images")?;
    if samples.is_empty() {
        bail!(
            "no enrolled faces in {}; run `sightline signup` first",
            config.enroll_dir.display()
        );
    }

    let expected: Vec<String> = samples.iter().map(|(label, _)| label.clone()).collect();
    if config.model_path.exists() {
        match EigenFaceModel::load(&config.model_path) {
            Ok(model) if model.labels() == expected.as_slice() => return Ok(model),
            Ok(_) => {
                tracing::info!("enrollment changed since last training, retraining");
            }
            Err(e) => {
                tracing::warn!(error = %e, "stored model unreadable, retraining");
            }
        }
    }

    let model = EigenFaceModel::train(&samples).context("face model training failed")?;
    model
        .save(&config.model_path)
        .context("failed to persist face model")?;
    Ok(model)
}

fn build_matcher(config: &Config) -> Result<FaceMatcher> {
    let locator = OnnxFaceLocator::load(&config.locator_model_path())
        .context("failed to load face locator model")?;
    let model = load_or_train_model(config)?;
    let session = VoteSession::new(config.vote_window, config.distance_threshold);
    Ok(FaceMatcher::new(Box::new(locator), model, session))
}

fn make_speech(config: &Config) -> Box<dyn Speech> {
    if config.speech_enabled {
        Box::new(CommandSpeech::new(&config.speech_synth, &config.speech_player))
    } else {
        tracing::info!("speech disabled via SIGHTLINE_SPEECH_ENABLED=0");
        Box::new(NullSpeech)
    }
}

fn announce(speech: &dyn Speech, text: &str) {
    if let Err(e) = speech.say(text) {
        tracing::warn!(error = %e, "speech output failed");
    }
}

async fn run_identify(config: &Config) -> Result<()> {
    let mut matcher = build_matcher(config)?;
    let camera = SharedCamera::new(config.camera_source, config.frame_width, config.frame_height);
    let speech = make_speech(config);

    let outcome = run_scan(
        camera,
        move |frame| matcher.observe_frame(&frame.data, frame.width, frame.height),
        ScanOptions {
            display_fps: config.display_fps,
            ..ScanOptions::default()
        },
    )
    .await?;

    match outcome {
        ScanOutcome::Accepted(matched) => {
            if matched.identity == "Unknown" {
                println!("Not Recognized");
                announce(speech.as_ref(), "Not Recognized");
            } else {
                println!("This is, {}", matched.identity);
                announce(speech.as_ref(), &format!("This is, {}", matched.identity));
            }
        }
        ScanOutcome::TimedOut | ScanOutcome::Cancelled => {}
    }
    Ok(())
}

async fn run_face_login(config: &Config) -> Result<()> {
    let mut matcher = build_matcher(config)?;
    let camera = SharedCamera::new(config.camera_source, config.frame_width, config.frame_height);

    let outcome = run_scan(
        camera,
        move |frame| matcher.observe_frame(&frame.data, frame.width, frame.height),
        ScanOptions {
            display_fps: config.display_fps,
            ..ScanOptions::default()
        },
    )
    .await?;

    match outcome {
        ScanOutcome::Accepted(matched) if matched.identity != "Unknown" => {
            println!("Logged in as {}", matched.identity);
            Ok(())
        }
        ScanOutcome::Accepted(_) => bail!("face not recognized"),
        ScanOutcome::TimedOut | ScanOutcome::Cancelled => bail!("face login aborted"),
    }
}

async fn run_scan_objects(config: &Config) -> Result<()> {
    let mut detector = OnnxObjectDetector::load(&config.detector_model_path())
        .context("failed to load object detector model")?;
    let camera = SharedCamera::new(config.camera_source, config.frame_width, config.frame_height);
    let speech = make_speech(config);

    let outcome = run_scan(
        camera,
        move |frame| {
            match detector.detect(&frame.data, frame.width, frame.height) {
                Ok(detections) if !detections.is_empty() => Some(detections),
                Ok(_) => None,
                Err(e) => {
                    tracing::debug!(error = %e, "object detection failed, skipping frame");
                    None
                }
            }
        },
        ScanOptions {
            display_fps: config.display_fps,
            ..ScanOptions::default()
        },
    )
    .await?;

    if let ScanOutcome::Accepted(detections) = outcome {
        let mut names: Vec<&str> = Vec::new();
        for d in &detections {
            let name = d.class_id.map(class_name).unwrap_or("object");
            if !names.contains(&name) {
                names.push(name);
            }
        }
        let summary = names.join(", ");
        println!("Detected: {summary}");
        announce(speech.as_ref(), &format!("I can see {summary}"));
    }
    Ok(())
}

fn load_text_extractor(config: &Config) -> Result<TextExtractor> {
    let ocr = CtcOcr::load(&config.ocr_model_path(), &config.ocr_dict_path())
        .context("failed to load text recognizer model")?;
    Ok(TextExtractor::new(Box::new(ocr)))
}

async fn run_read_text(config: &Config) -> Result<()> {
    let mut extractor = load_text_extractor(config)?;
    let camera = SharedCamera::new(config.camera_source, config.frame_width, config.frame_height);
    let speech = make_speech(config);

    let outcome = run_scan(
        camera,
        move |frame| {
            match extractor.scan_frame(&frame.data, frame.width, frame.height) {
                Ok(result) if !result.text.is_empty() => Some(result),
                Ok(_) => None,
                Err(e) => {
                    tracing::debug!(error = %e, "text recognition failed, skipping frame");
                    None
                }
            }
        },
        ScanOptions {
            timeout: Some(std::time::Duration::from_secs(config.text_timeout_secs)),
            pace: std::time::Duration::from_secs(1),
            display_fps: config.display_fps,
        },
    )
    .await?;

    match outcome {
        ScanOutcome::Accepted(result) => {
            println!("{} (confidence {:.0}%)", result.text, result.mean_confidence);
            announce(speech.as_ref(), &result.text);
        }
        ScanOutcome::TimedOut => {
            println!("{SCAN_TIMEOUT_MESSAGE}");
            announce(speech.as_ref(), SCAN_TIMEOUT_MESSAGE);
        }
        ScanOutcome::Cancelled => {}
    }
    Ok(())
}

fn run_capture_text(config: &Config) -> Result<()> {
    let mut extractor = load_text_extractor(config)?;
    let camera = SharedCamera::new(config.camera_source, config.frame_width, config.frame_height);
    let speech = make_speech(config);

    camera.acquire();
    let frame = camera.get_frame();
    camera.release();
    let frame = frame.context("failed to capture photo")?;

    if let Some(parent) = config.captured_photo_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    image::save_buffer(
        &config.captured_photo_path,
        &frame.data,
        frame.width,
        frame.height,
        image::ExtendedColorType::Rgb8,
    )
    .context("failed to save captured photo")?;
    tracing::info!(path = %config.captured_photo_path.display(), "saved photo");

    // a manual capture always reports, even when nothing was read
    let result = extractor
        .read_photo(&frame.data, frame.width, frame.height)
        .context("text recognition failed")?;
    if result.text.is_empty() {
        println!("No text recognized");
        announce(speech.as_ref(), "No text recognized");
    } else {
        println!("{} (confidence {:.0}%)", result.text, result.mean_confidence);
        announce(speech.as_ref(), &result.text);
    }
    Ok(())
}

async fn run_signup(
    config: &Config,
    name: &str,
    password: &str,
    confirm: &str,
    category: &str,
) -> Result<()> {
    let store = AccountStore::new(&config.accounts_url);
    store
        .register(
            name,
            UserRecord {
                full_name: name.to_string(),
                password: password.to_string(),
                category: category.to_string(),
            },
            confirm,
        )
        .await?;
    println!("Account created for {name}");

    capture_enrollment_face(config, name)?;

    // retrain immediately so the next identification sees the new face
    let _ = load_or_train_model(config)?;
    println!("Face enrolled for {name}");
    Ok(())
}

/// Capture one frame, find the largest usable face, and store its
/// canonical grayscale crop under the enrollment directory.
fn capture_enrollment_face(config: &Config, name: &str) -> Result<()> {
    let mut locator = OnnxFaceLocator::load(&config.locator_model_path())
        .context("failed to load face locator model")?;
    let camera = SharedCamera::new(config.camera_source, config.frame_width, config.frame_height);

    camera.acquire();
    let frame = camera.get_frame();
    camera.release();
    let frame = frame.context("failed to capture enrollment frame")?;

    let detections = locator
        .locate(&frame.data, frame.width, frame.height)
        .context("face detection failed")?;
    let face = detections
        .iter()
        .map(|d| d.clamp_to(frame.width, frame.height))
        .filter(|d| d.is_usable(MIN_FACE_SIDE))
        .max_by(|a, b| {
            (a.width * a.height)
                .partial_cmp(&(b.width * b.height))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    let Some(face) = face else {
        bail!("no face visible; look at the camera and try again");
    };

    let crop = frame.crop(
        face.x as u32,
        face.y as u32,
        face.width as u32,
        face.height as u32,
    );
    let gray = image::GrayImage::from_raw(crop.width, crop.height, crop.to_gray())
        .context("face crop buffer mismatch")?;
    let canonical = canonicalize(&gray);

    // an older model no longer matches the enrollment set
    if config.model_path.exists() {
        let _ = std::fs::remove_file(&config.model_path);
    }

    EnrollmentStore::new(&config.enroll_dir).save_sample(
        name,
        canonical.as_raw(),
        canonical.width(),
        canonical.height(),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sightline_hw::camera::{CameraError, FrameSource};
    use std::sync::Arc;

    struct FakeSource {
        width: u32,
        height: u32,
    }

    impl FrameSource for FakeSource {
        fn read(&mut self) -> Result<RgbFrame, CameraError> {
            Ok(RgbFrame {
                data: vec![128; (self.width * self.height * 3) as usize],
                width: self.width,
                height: self.height,
            })
        }

        fn resolution(&self) -> (u32, u32) {
            (self.width, self.height)
        }
    }

    fn fake_camera() -> SharedCamera {
        SharedCamera::with_opener(
            0,
            8,
            8,
            Arc::new(|_, w, h| {
                Ok(Box::new(FakeSource { width: w, height: h }) as Box<dyn FrameSource>)
            }),
        )
    }

    #[test]
    fn test_announce_accepts_boxed_speech() {
        let speech: Box<dyn Speech> = Box::new(speech::NullSpeech);
        announce(speech.as_ref(), "ready");
    }

    #[tokio::test]
    async fn test_shutdown_cancels_scan_and_releases_camera() {
        let camera = fake_camera();
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let handle = start_scan(camera.clone(), |_f| None::<u32>, ScanOptions::default(), tx);

        let outcome = drive_scan(rx, handle, async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        })
        .await;

        assert!(matches!(outcome, ScanOutcome::Cancelled));
        assert!(!camera.is_open(), "shutdown must release the camera");
    }

    #[tokio::test]
    async fn test_accepted_result_reaches_the_foreground() {
        let camera = fake_camera();
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let handle = start_scan(camera, |_f| Some(42u32), ScanOptions::default(), tx);

        let outcome = drive_scan(rx, handle, std::future::pending::<()>()).await;
        assert!(matches!(outcome, ScanOutcome::Accepted(42)));
    }
}
