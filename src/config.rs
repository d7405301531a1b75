use std::path::PathBuf;
use std::cmp::Ordering;
use std::str::FromStr;

use crate::emoticons::DEFAULT_EMOTICON_BASE_URL;
use crate::error::ConfigError;

/// Chat region inside the output frame, in pixels, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChatBounds {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl ChatBounds {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_positive(self.width) || !is_positive(self.height) {
            return Err(ConfigError::BoundsSize {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

impl FromStr for ChatBounds {
    type Err = ConfigError;

    /// Parses `x:y:width:height`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let parts = raw.split(':').collect::<Vec<_>>();
        if parts.len() != 4 {
            return Err(ConfigError::BoundsFormat(raw.to_owned()));
        }

        let mut values = [0.0_f32; 4];
        for (slot, part) in values.iter_mut().zip(&parts) {
            let trimmed = part.trim();
            *slot = trimmed
                .parse::<f32>()
                .ok()
                .filter(|value| value.is_finite())
                .ok_or_else(|| ConfigError::BoundsNumber {
                    component: trimmed.to_owned(),
                })?;
        }

        Ok(Self::new(values[0], values[1], values[2], values[3]))
    }
}

fn is_positive(value: f32) -> bool {
    value.partial_cmp(&0.0) == Some(Ordering::Greater)
}

/// Everything a render run needs. Built by the CLI, validated before use.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    pub start_time: f64,
    pub end_time: f64,
    pub transcript_path: PathBuf,
    pub fps: f64,
    pub output_path: PathBuf,
    pub hw_accel: bool,
    pub debug: bool,
    pub bounds: ChatBounds,
    pub font_size: f32,
    pub font_path: PathBuf,
    pub preview: bool,
    pub interactive: bool,
    pub atlas_out: Option<PathBuf>,
    pub emoticon_base_url: String,
    pub encoder_program: PathBuf,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            start_time: 0.0,
            end_time: 10.0,
            transcript_path: PathBuf::from("sample_comments.csv"),
            fps: 24.0,
            output_path: PathBuf::from("sample.mov"),
            hw_accel: false,
            debug: false,
            bounds: ChatBounds::new(0.0, 0.0, 200.0, 200.0),
            font_size: 24.0,
            font_path: PathBuf::from("Roboto-Regular.ttf"),
            preview: false,
            interactive: false,
            atlas_out: None,
            emoticon_base_url: DEFAULT_EMOTICON_BASE_URL.to_owned(),
            encoder_program: PathBuf::from("ffmpeg"),
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.end_time.partial_cmp(&self.start_time) != Some(Ordering::Greater) {
            return Err(ConfigError::TimeWindow {
                start: self.start_time,
                end: self.end_time,
            });
        }
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(ConfigError::NonPositive { field: "fps" });
        }
        if self.width == 0 {
            return Err(ConfigError::NonPositive { field: "width" });
        }
        if self.height == 0 {
            return Err(ConfigError::NonPositive { field: "height" });
        }
        if !is_positive(self.font_size) {
            return Err(ConfigError::NonPositive { field: "font size" });
        }
        self.bounds.validate()
    }

    pub fn total_time(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Number of frames in `[start, end)` at the configured rate (truncated).
    pub fn total_frames(&self) -> u64 {
        (self.total_time() * self.fps).max(0.0) as u64
    }

    /// Transcript time shown by `frame_index`.
    pub fn frame_time(&self, frame_index: u64) -> f64 {
        self.start_time + frame_index as f64 / self.fps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_parse_four_numbers() {
        let bounds: ChatBounds = "10:20:300.5:400".parse().expect("bounds should parse");
        assert_eq!(bounds, ChatBounds::new(10.0, 20.0, 300.5, 400.0));
        assert_eq!(bounds.right(), 310.5);
        assert_eq!(bounds.bottom(), 420.0);
    }

    #[test]
    fn bounds_reject_wrong_component_count() {
        assert_eq!(
            "0:0:200".parse::<ChatBounds>(),
            Err(ConfigError::BoundsFormat("0:0:200".to_owned()))
        );
        assert!("0:0:200:200:1".parse::<ChatBounds>().is_err());
    }

    #[test]
    fn bounds_reject_non_numeric_component() {
        let err = "0:zero:200:200".parse::<ChatBounds>().unwrap_err();
        assert_eq!(
            err,
            ConfigError::BoundsNumber {
                component: "zero".to_owned()
            }
        );
    }

    #[test]
    fn validation_requires_end_after_start() {
        let mut config = RenderConfig::default();
        config.start_time = 10.0;
        config.end_time = 10.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TimeWindow { .. })
        ));

        config.end_time = 12.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_rejects_zero_sized_bounds() {
        let mut config = RenderConfig::default();
        config.bounds = ChatBounds::new(0.0, 0.0, 0.0, 100.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BoundsSize { .. })
        ));
    }

    #[test]
    fn nan_values_never_validate() {
        let config = RenderConfig {
            end_time: f64::NAN,
            ..RenderConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::TimeWindow { .. })));

        let config = RenderConfig {
            font_size: f32::NAN,
            ..RenderConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::NonPositive { field: "font size" })
        );

        let bounds = ChatBounds::new(0.0, 0.0, f32::NAN, 10.0);
        assert!(matches!(bounds.validate(), Err(ConfigError::BoundsSize { .. })));
    }

    #[test]
    fn frame_clock_matches_window_and_rate() {
        let mut config = RenderConfig::default();
        config.start_time = 2.0;
        config.end_time = 7.0;
        config.fps = 1.0;
        assert_eq!(config.total_frames(), 5);
        assert_eq!(config.frame_time(0), 2.0);
        assert_eq!(config.frame_time(3), 5.0);
    }
}
