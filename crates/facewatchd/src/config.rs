use crate::scheduler::{ScheduleMode, DEFAULT_TICK_INTERVAL};
use crate::upload::{GeoPoint, UploadPolicy};
use facewatch_core::DEFAULT_MATCH_THRESHOLD;
use std::path::Path;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Requested capture resolution; the driver may negotiate another.
    pub capture_width: u32,
    pub capture_height: u32,
    /// Number of warmup frames to discard at startup (camera AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Period of the capture scheduler.
    pub tick_interval: Duration,
    pub schedule_mode: ScheduleMode,
    /// Start the scheduler as soon as the daemon is up.
    pub autostart: bool,
    /// Maximum Euclidean distance accepted as a known face.
    pub match_threshold: f32,
    /// Base URL of the face model service.
    pub model_endpoint: String,
    /// URL or path of the reference photo list; recognition stays unavailable without it.
    pub reference_source: Option<String>,
    /// Upload sink URL; uploads are off without it.
    pub upload_endpoint: Option<String>,
    pub upload_policy: UploadPolicy,
    /// Fixed position attached to uploads.
    pub location: Option<GeoPoint>,
    /// Timeout applied to every HTTP request.
    pub http_timeout: Duration,
}

impl Config {
    /// Load configuration from `FACEWATCH_*` environment variables with defaults.
    ///
    /// If `FACEWATCH_ENV_FILE` names a `KEY=VALUE` file, its entries are
    /// applied first without overriding variables already set.
    pub fn from_env() -> Self {
        if let Ok(path) = std::env::var("FACEWATCH_ENV_FILE") {
            load_env_file(Path::new(&path));
        }

        let upload_endpoint = env_opt("FACEWATCH_UPLOAD_ENDPOINT");
        let upload_policy = if upload_endpoint.is_some() {
            env_parse("FACEWATCH_UPLOAD_POLICY", UploadPolicy::All)
        } else {
            UploadPolicy::Off
        };

        let location = match (
            env_opt_f64("FACEWATCH_LATITUDE"),
            env_opt_f64("FACEWATCH_LONGITUDE"),
        ) {
            (Some(latitude), Some(longitude)) => Some(GeoPoint { latitude, longitude }),
            _ => None,
        };

        Self {
            camera_device: std::env::var("FACEWATCH_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            capture_width: env_u32("FACEWATCH_CAPTURE_WIDTH", 1280),
            capture_height: env_u32("FACEWATCH_CAPTURE_HEIGHT", 720),
            warmup_frames: env_usize("FACEWATCH_WARMUP_FRAMES", 4),
            tick_interval: Duration::from_millis(env_nonzero_u64(
                "FACEWATCH_TICK_INTERVAL_MS",
                DEFAULT_TICK_INTERVAL.as_millis() as u64,
            )),
            schedule_mode: env_parse("FACEWATCH_SCHEDULE_MODE", ScheduleMode::Detect),
            autostart: env_flag("FACEWATCH_AUTOSTART", true),
            match_threshold: env_f32("FACEWATCH_MATCH_THRESHOLD", DEFAULT_MATCH_THRESHOLD),
            model_endpoint: std::env::var("FACEWATCH_MODEL_ENDPOINT")
                .unwrap_or_else(|_| "http://127.0.0.1:8500".to_string()),
            reference_source: env_opt("FACEWATCH_REFERENCE_SOURCE"),
            upload_endpoint,
            upload_policy,
            location,
            http_timeout: Duration::from_secs(env_u64("FACEWATCH_HTTP_TIMEOUT_SECS", 30)),
        }
    }
}

/// Apply a `KEY=VALUE` file to the process environment; existing variables win.
fn load_env_file(path: &Path) {
    match dotenv::from_path(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "loaded environment file"),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to load environment file")
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_opt_f64(key: &str) -> Option<f64> {
    env_opt(key).and_then(|v| v.parse().ok())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env_opt(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "unrecognized value; using default");
            default
        }),
        None => default,
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    env_opt(key).map(|v| parse_flag(&v)).unwrap_or(default)
}

fn parse_flag(value: &str) -> bool {
    !matches!(value.to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off")
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

fn env_nonzero_u64(key: &str, default: u64) -> u64 {
    match env_u64(key, default) {
        0 => {
            tracing::warn!(key, "zero is not allowed; using default");
            default
        }
        value => value,
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
