use std::fs;
use std::path::Path;

use fontdue::{Font, FontSettings};

use crate::error::FontError;

/// Coverage bitmap for one glyph, positioned relative to the pen on the baseline.
#[derive(Debug, Clone)]
pub struct GlyphBitmap {
    pub width: usize,
    pub height: usize,
    /// Left edge relative to the pen position.
    pub offset_x: i32,
    /// Top edge relative to the baseline (negative is above it).
    pub offset_y: i32,
    pub coverage: Vec<u8>,
}

/// What the compositor and the frame renderer need from a font.
pub trait Typeface {
    fn advance(&self, ch: char) -> f32;

    fn line_height(&self) -> f32;

    /// Distance from the top of a line to its baseline.
    fn ascent(&self) -> f32;

    fn rasterize(&self, ch: char) -> Option<GlyphBitmap>;

    fn text_width(&self, text: &str) -> f32 {
        text.chars().map(|ch| self.advance(ch)).sum()
    }
}

/// TrueType face loaded through fontdue at a fixed pixel size.
pub struct FontFace {
    font: Font,
    size: f32,
    ascent: f32,
    line_height: f32,
}

impl FontFace {
    pub fn load(path: &Path, size: f32) -> Result<Self, FontError> {
        let bytes = fs::read(path).map_err(|source| FontError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let face = Self::from_bytes(bytes, size).map_err(|error| match error {
            FontError::Parse { message, .. } => FontError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?;
        tracing::info!(path = %path.display(), size, "loaded font");
        Ok(face)
    }

    pub fn from_bytes(bytes: Vec<u8>, size: f32) -> Result<Self, FontError> {
        if size.is_nan() || size <= 0.0 {
            return Err(FontError::Size(size));
        }
        let font = Font::from_bytes(
            bytes,
            FontSettings {
                scale: size,
                ..FontSettings::default()
            },
        )
        .map_err(|message| FontError::Parse {
            path: Default::default(),
            message: message.to_owned(),
        })?;

        let (ascent, line_height) = match font.horizontal_line_metrics(size) {
            Some(metrics) => (metrics.ascent, metrics.new_line_size),
            None => (size * 0.8, size * 1.2),
        };

        Ok(Self {
            font,
            size,
            ascent,
            line_height: line_height.max(1.0),
        })
    }
}

impl Typeface for FontFace {
    fn advance(&self, ch: char) -> f32 {
        self.font.metrics(ch, self.size).advance_width
    }

    fn line_height(&self) -> f32 {
        self.line_height
    }

    fn ascent(&self) -> f32 {
        self.ascent
    }

    fn rasterize(&self, ch: char) -> Option<GlyphBitmap> {
        let (metrics, coverage) = self.font.rasterize(ch, self.size);
        if metrics.width == 0 || metrics.height == 0 {
            return None;
        }
        Some(GlyphBitmap {
            width: metrics.width,
            height: metrics.height,
            offset_x: metrics.xmin,
            offset_y: -(metrics.height as i32 + metrics.ymin),
            coverage,
        })
    }
}

/// Fixed-advance face drawing every visible character as a solid block.
/// Layout results are exact, which makes it the face for headless checks and benchmarks.
#[derive(Debug, Clone, Copy)]
pub struct MonospaceFace {
    pub advance: f32,
    pub line_height: f32,
}

impl MonospaceFace {
    pub fn new(advance: f32, line_height: f32) -> Self {
        Self {
            advance,
            line_height,
        }
    }
}

impl Typeface for MonospaceFace {
    fn advance(&self, _ch: char) -> f32 {
        self.advance
    }

    fn line_height(&self) -> f32 {
        self.line_height
    }

    fn ascent(&self) -> f32 {
        self.line_height * 0.8
    }

    fn rasterize(&self, ch: char) -> Option<GlyphBitmap> {
        if ch.is_whitespace() {
            return None;
        }
        let width = (self.advance * 0.8).round().max(1.0) as usize;
        let height = (self.ascent() * 0.9).round().max(1.0) as usize;
        Some(GlyphBitmap {
            width,
            height,
            offset_x: 0,
            offset_y: -(height as i32),
            coverage: vec![255; width * height],
        })
    }
}
