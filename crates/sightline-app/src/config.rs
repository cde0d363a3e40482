use std::path::PathBuf;

/// Application configuration, loaded from environment variables.
pub struct Config {
    /// Video source id (`/dev/video{N}`).
    pub camera_source: u32,
    /// Capture/display resolution requested from the camera.
    pub frame_width: u32,
    pub frame_height: u32,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Flat enrollment directory (one image per identity).
    pub enroll_dir: PathBuf,
    /// Persisted face model (components + label map in one file).
    pub model_path: PathBuf,
    /// Fixed-name photo written by the manual capture path.
    pub captured_photo_path: PathBuf,
    /// Eigen distance below which a prediction is accepted.
    pub distance_threshold: f32,
    /// Consecutive confident frames required for face login.
    pub vote_window: usize,
    /// Live text scan gives up after this many seconds.
    pub text_timeout_secs: u64,
    /// Foreground display tick rate.
    pub display_fps: u32,
    /// Base URL of the remote account store.
    pub accounts_url: String,
    /// Spoken feedback on/off (`SIGHTLINE_SPEECH_ENABLED=0` silences it).
    pub speech_enabled: bool,
    /// Speech synthesizer command (writes a wav given `-w <file> <text>`).
    pub speech_synth: String,
    /// Audio player command (plays `<file>` to completion).
    pub speech_player: String,
}

impl Config {
    /// Load configuration from `SIGHTLINE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("sightline");

        let model_dir = std::env::var("SIGHTLINE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        let enroll_dir = std::env::var("SIGHTLINE_ENROLL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("faces"));

        let model_path = std::env::var("SIGHTLINE_FACE_MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("face-model.json"));

        Self {
            camera_source: env_u32("SIGHTLINE_CAMERA_SOURCE", 0),
            frame_width: env_u32("SIGHTLINE_FRAME_WIDTH", 1280),
            frame_height: env_u32("SIGHTLINE_FRAME_HEIGHT", 720),
            model_dir,
            enroll_dir,
            model_path,
            captured_photo_path: data_dir.join("captured-photo.jpg"),
            distance_threshold: env_f32("SIGHTLINE_DISTANCE_THRESHOLD", 5000.0),
            vote_window: env_usize("SIGHTLINE_VOTE_WINDOW", 5),
            text_timeout_secs: env_u64("SIGHTLINE_TEXT_TIMEOUT_SECS", 30),
            display_fps: env_u32("SIGHTLINE_DISPLAY_FPS", 30),
            accounts_url: std::env::var("SIGHTLINE_ACCOUNTS_URL")
                .unwrap_or_else(|_| "https://sightline-demo-default-rtdb.firebaseio.com".to_string()),
            speech_enabled: env_u32("SIGHTLINE_SPEECH_ENABLED", 1) != 0,
            speech_synth: std::env::var("SIGHTLINE_SPEECH_SYNTH")
                .unwrap_or_else(|_| "espeak-ng".to_string()),
            speech_player: std::env::var("SIGHTLINE_SPEECH_PLAYER")
                .unwrap_or_else(|_| "aplay".to_string()),
        }
    }

    /// Path to the face localization model.
    pub fn locator_model_path(&self) -> String {
        self.model_dir
            .join("face-locator.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the object detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("object-detector.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the OCR recognition model.
    pub fn ocr_model_path(&self) -> String {
        self.model_dir
            .join("text-recognizer.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the OCR character dictionary.
    pub fn ocr_dict_path(&self) -> String {
        self.model_dir
            .join("text-recognizer-dict.txt")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
