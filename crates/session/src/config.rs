//! Session configuration

use crate::SessionError;
use ::config::{Config, Environment, File, FileFormat};
use camera_capture::SourceConfig;
use dms::DmsConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix of environment overrides, e.g. `DROWSY__DMS__EAR_THRESHOLD=0.2`
pub const ENV_PREFIX: &str = "DROWSY";

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub source: SourceConfig,

    /// Annotated frames are written here; no export when unset
    pub output_dir: Option<PathBuf>,

    /// Annotated video file; no video when unset
    pub output_video: Option<PathBuf>,

    /// JSON-lines event log; no log when unset
    pub event_log: Option<PathBuf>,

    /// Frames between progress log lines (0 disables)
    pub progress_interval: u64,

    /// Emit logs as JSON
    pub log_json: bool,

    pub dms: DmsConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            output_dir: None,
            output_video: None,
            event_log: None,
            progress_interval: 30,
            log_json: false,
            dms: DmsConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Defaults, then the optional TOML file, then `DROWSY__*` variables
    pub fn load(path: Option<&Path>) -> Result<Self, SessionError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }
        let settings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__").try_parsing(true))
            .build()?;

        let config: SessionConfig = settings.try_deserialize()?;
        config.dms.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dms::StateScope;
    use std::fs;

    fn scratch_file(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("session-config-{}-{}", std::process::id(), name));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("session.toml");
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults_without_file() {
        let config = SessionConfig::load(None).unwrap();
        assert_eq!(config.progress_interval, 30);
        assert_eq!(config.source.fps, 30);
        assert!(config.output_dir.is_none());
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        let path = scratch_file(
            "toml",
            r#"
output_dir = "annotated"
output_video = "annotated.mp4"

[source]
kind = "video"
input_dir = "captures/run1"
video_path = "captures/run1.mp4"

[dms]
ear_threshold = 0.22
state_scope = "shared"
"#,
        );

        let config = SessionConfig::load(Some(&path)).unwrap();
        assert_eq!(config.source.input_dir, PathBuf::from("captures/run1"));
        assert_eq!(config.output_video, Some(PathBuf::from("annotated.mp4")));
        assert_eq!(config.source.kind, camera_capture::SourceKind::Video);
        assert_eq!(config.source.video_path, Some(PathBuf::from("captures/run1.mp4")));
        assert_eq!(config.output_dir, Some(PathBuf::from("annotated")));
        assert_eq!(config.dms.ear_threshold, 0.22);
        assert_eq!(config.dms.state_scope, StateScope::Shared);
        assert_eq!(config.dms.eye_closed_consec_frames, 3);
    }

    #[test]
    fn test_environment_overrides() {
        std::env::set_var("DROWSY__DMS__MAR_THRESHOLD", "0.5");
        let config = SessionConfig::load(None);
        std::env::remove_var("DROWSY__DMS__MAR_THRESHOLD");

        assert_eq!(config.unwrap().dms.mar_threshold, 0.5);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let path = scratch_file("invalid", "[dms]\neye_closed_consec_frames = 0\n");
        assert!(matches!(
            SessionConfig::load(Some(&path)),
            Err(SessionError::Dms(dms::DmsError::Config(_)))
        ));
    }

    #[test]
    fn test_missing_file_is_error() {
        let path = std::env::temp_dir().join("session-config-does-not-exist.toml");
        assert!(matches!(SessionConfig::load(Some(&path)), Err(SessionError::Config(_))));
    }
}
