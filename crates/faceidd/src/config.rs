use faceid_core::{CaptureOptions, DEFAULT_THRESHOLD, DESCRIPTOR_DIM};
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Descriptor extractor executable.
    pub extractor_path: PathBuf,
    /// Directory holding the detection/landmark/descriptor model weights.
    pub model_dir: PathBuf,
    /// Path to the SQLite profile database.
    pub db_path: PathBuf,
    /// Euclidean distance below which a face matches a profile.
    pub match_threshold: f32,
    /// Upper bound for one capture in seconds; 0 disables the limit.
    pub capture_timeout_secs: u64,
    /// Frames discarded after opening the camera (AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Expected descriptor length.
    pub descriptor_dim: usize,
}

impl Config {
    /// Load configuration from `FACEID_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("faceid");

        let model_dir = std::env::var("FACEID_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        let extractor_path = std::env::var("FACEID_EXTRACTOR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/usr/libexec/faceid/faceid-extract"));

        let db_path = std::env::var("FACEID_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("profiles.db"));

        Self {
            camera_device: std::env::var("FACEID_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            extractor_path,
            model_dir,
            db_path,
            match_threshold: env_parse("FACEID_MATCH_THRESHOLD", DEFAULT_THRESHOLD),
            capture_timeout_secs: env_parse("FACEID_CAPTURE_TIMEOUT_SECS", 10),
            warmup_frames: env_parse("FACEID_WARMUP_FRAMES", 4),
            descriptor_dim: env_parse("FACEID_DESCRIPTOR_DIM", DESCRIPTOR_DIM),
        }
    }

    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            descriptor_dim: self.descriptor_dim,
            warmup_frames: self.warmup_frames,
            capture_timeout: (self.capture_timeout_secs > 0)
                .then(|| Duration::from_secs(self.capture_timeout_secs)),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
