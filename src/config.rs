// src/config.rs

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub input: InputConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Input files or directories; directories are expanded recursively.
    pub paths: Vec<String>,
    /// Ordered landmark names; landmark `body` is read from columns
    /// `body_x` / `body_y`.
    pub landmarks: Vec<String>,
    /// Name of the source identifier column. Informational only; it is
    /// never used for identity.
    #[serde(default)]
    pub id_label: Option<String>,
    /// First frame to process; a raw frame number or "HH:MM:SS".
    #[serde(default)]
    pub frame_start: Option<FrameBound>,
    /// Last frame to process (inclusive).
    #[serde(default)]
    pub frame_end: Option<FrameBound>,
    /// Process every n-th frame.
    #[serde(default = "default_frame_interval")]
    pub frame_interval: i64,
    /// Frame rate used to resolve "HH:MM:SS" bounds when no source video
    /// is configured.
    #[serde(default)]
    pub fps: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Nominal single-frame displacement cap. Drives the range factor,
    /// the coasting velocity clamp, and the per-coast-frame gate growth.
    pub move_distance: f64,
    /// Base acceptance radius of the match gate.
    pub max_move_distance: f64,
    /// Consecutive matches needed for full active-confidence.
    pub min_active: u32,
    /// Frames tolerated without a match before eviction.
    pub max_inactive: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            move_distance: 10.0,
            max_move_distance: 20.0,
            min_active: 3,
            max_inactive: 30, // 1s at 30fps
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Row-oriented text sink.
    #[serde(default)]
    pub csv: Option<String>,
    /// Streaming columnar sink (Arrow IPC stream).
    #[serde(default)]
    pub feather: Option<String>,
    /// When set, per-assignment match distances go to a side-channel
    /// `<output stem>_matches.csv` for diagnostic inspection.
    #[serde(default)]
    pub debug_mode: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Source video to annotate. Overlay rendering is skipped unless both
    /// input and output are set.
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    /// Also draw coasting (unmatched but not yet evicted) tracks.
    #[serde(default)]
    pub draw_coasting: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// A frame boundary: either a raw frame number or a "[HH:]MM:SS" time
/// string converted through the frame rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FrameBound {
    Frames(i64),
    Time(String),
}

impl FrameBound {
    pub fn resolve(&self, fps: Option<f64>) -> Result<i64> {
        match self {
            FrameBound::Frames(n) => Ok(*n),
            FrameBound::Time(s) => {
                if !s.contains(':') {
                    return s
                        .parse::<i64>()
                        .with_context(|| format!("Invalid frame bound: {}", s));
                }
                let fps = match fps {
                    Some(fps) if fps > 0.0 => fps,
                    _ => bail!("Frame bound '{}' needs a frame rate (set input.fps or configure a source video)", s),
                };
                // Rightmost part is seconds, then minutes, hours, days.
                let multipliers = [1i64, 60, 60, 24];
                let mut seconds = 0i64;
                let mut cumulative = 1i64;
                for (part, multiplier) in s.rsplit(':').zip(multipliers.iter()) {
                    cumulative *= multiplier;
                    let value: i64 = part
                        .trim()
                        .parse()
                        .with_context(|| format!("Invalid time component in '{}'", s))?;
                    seconds += value * cumulative;
                }
                Ok((seconds as f64 * fps) as i64)
            }
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read parameters file: {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse parameters file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.input.paths.is_empty() {
            bail!("Missing input files");
        }
        if self.input.landmarks.is_empty() {
            bail!("Missing landmark list (input.landmarks)");
        }
        if self.input.frame_interval < 1 {
            bail!("input.frame_interval must be >= 1");
        }
        if self.tracking.move_distance <= 0.0 || self.tracking.max_move_distance <= 0.0 {
            bail!("tracking distances must be positive");
        }
        if self.video.input.is_some() != self.video.output.is_some() {
            bail!("video.input and video.output must be set together");
        }
        Ok(())
    }
}

fn default_frame_interval() -> i64 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_minimal_yaml() {
        let yaml = r#"
input:
  paths: ["tracks.feather"]
  landmarks: [head, body, tail]
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.tracking.min_active, 3);
        assert_eq!(config.input.frame_interval, 1);
        assert!(config.output.csv.is_none());
        assert!(!config.output.debug_mode);
    }

    #[test]
    fn test_missing_inputs_rejected() {
        let yaml = r#"
input:
  paths: []
  landmarks: [head]
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_frame_bound_raw_number() {
        let bound = FrameBound::Frames(120);
        assert_eq!(bound.resolve(None).unwrap(), 120);
    }

    #[test]
    fn test_frame_bound_time_string() {
        let bound = FrameBound::Time("00:01:30".to_string());
        assert_eq!(bound.resolve(Some(30.0)).unwrap(), 2700);

        let short = FrameBound::Time("01:30".to_string());
        assert_eq!(short.resolve(Some(30.0)).unwrap(), 2700);
    }

    #[test]
    fn test_frame_bound_time_without_fps_fails() {
        let bound = FrameBound::Time("00:01:30".to_string());
        assert!(bound.resolve(None).is_err());
    }

    #[test]
    fn test_frame_bound_yaml_forms() {
        let frames: FrameBound = serde_yaml::from_str("250").unwrap();
        assert_eq!(frames.resolve(None).unwrap(), 250);

        let time: FrameBound = serde_yaml::from_str("\"00:00:10\"").unwrap();
        assert_eq!(time.resolve(Some(25.0)).unwrap(), 250);
    }
}
