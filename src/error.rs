use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

/// Failure to retrieve or decode one emoticon image.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("emoticon '{id}': request to {url} failed: {source}")]
    Http {
        id: String,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("emoticon '{id}': {url} answered with status {status}")]
    Status { id: String, url: String, status: u16 },

    #[error("emoticon '{id}': image decode failed: {source}")]
    Decode {
        id: String,
        #[source]
        source: image::ImageError,
    },

    #[error("emoticon '{id}': {message}")]
    Source { id: String, message: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl FetchError {
    pub fn source_failure(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Source {
            id: id.into(),
            message: message.into(),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "cannot pack {images} emoticon images: atlas would exceed {max_side}x{max_side} (largest image {largest_width}x{largest_height})"
)]
pub struct PackingError {
    pub images: usize,
    pub max_side: u32,
    pub largest_width: u32,
    pub largest_height: u32,
}

#[derive(thiserror::Error, Debug)]
pub enum AtlasError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Packing(#[from] PackingError),

    #[error("failed to write atlas image {}: {source}", path.display())]
    Save {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Malformed transcript input.
#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("failed to open transcript {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed transcript record: {source}")]
    Record {
        #[source]
        source: csv::Error,
    },

    #[error("transcript row {row}: malformed message_fragments: {source}")]
    Fragments {
        row: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("transcript row {row}: content_offset_seconds must be finite, got {value}")]
    Offset { row: usize, value: f64 },
}

#[derive(thiserror::Error, Debug)]
pub enum FontError {
    #[error("failed to read font {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse font {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("font size must be > 0, got {0}")]
    Size(f32),
}

/// Encoder subprocess lifecycle failures.
#[derive(thiserror::Error, Debug)]
pub enum EncodeError {
    #[error("failed to start encoder '{}': {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("encoder i/o failed while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("encoder exited with {status}: {stderr_tail}")]
    Exit {
        status: ExitStatus,
        stderr_tail: String,
    },

    #[error("frame size mismatch: expected {expected} bytes, got {actual}")]
    FrameSize { expected: usize, actual: usize },

    #[error("encoder input is closed")]
    Closed,

    #[error("encoder worker thread panicked")]
    WorkerPanicked,

    #[error("encoding was cancelled")]
    Cancelled,
}

impl EncodeError {
    pub fn io(context: &'static str, source: io::Error) -> Self {
        Self::Io { context, source }
    }
}

/// Invalid render configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("end time ({end}) must be larger than start time ({start})")]
    TimeWindow { start: f64, end: f64 },

    #[error("bounds must be formatted as x:y:width:height with 4 numbers, got '{0}'")]
    BoundsFormat(String),

    #[error("bounds component '{component}' is not a number")]
    BoundsNumber { component: String },

    #[error("bounds width and height must be > 0, got {width}x{height}")]
    BoundsSize { width: f32, height: f32 },

    #[error("{field} must be > 0")]
    NonPositive { field: &'static str },
}

/// Which part of a render run failed; printed on abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    TranscriptLoad,
    FontLoad,
    AtlasBuild,
    FrameRender,
    EncodeSpawn,
    EncodeIo,
    Cancelled,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::TranscriptLoad => "transcript load",
            Self::FontLoad => "font load",
            Self::AtlasBuild => "atlas build",
            Self::FrameRender => "frame render",
            Self::EncodeSpawn => "encode spawn",
            Self::EncodeIo => "encode io",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub type RenderResult<T> = Result<T, RenderError>;

#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("transcript load failed: {0}")]
    Transcript(#[from] ParseError),

    #[error("font load failed: {0}")]
    Font(#[from] FontError),

    #[error("atlas build failed: {0}")]
    Atlas(#[from] AtlasError),

    #[error("frame render failed: cannot allocate a {width}x{height} surface")]
    Surface { width: u32, height: u32 },

    #[error("encoding failed: {0}")]
    Encode(#[from] EncodeError),

    #[error("render cancelled")]
    Cancelled,
}

impl RenderError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Config(_) => Stage::Config,
            Self::Transcript(_) => Stage::TranscriptLoad,
            Self::Font(_) => Stage::FontLoad,
            Self::Atlas(_) => Stage::AtlasBuild,
            Self::Surface { .. } => Stage::FrameRender,
            Self::Encode(EncodeError::Spawn { .. }) => Stage::EncodeSpawn,
            Self::Encode(EncodeError::Cancelled) | Self::Cancelled => Stage::Cancelled,
            Self::Encode(_) => Stage::EncodeIo,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_follows_the_failing_subsystem() {
        let spawn = RenderError::from(EncodeError::Spawn {
            program: PathBuf::from("ffmpeg"),
            source: io::Error::from(io::ErrorKind::NotFound),
        });
        assert_eq!(spawn.stage(), Stage::EncodeSpawn);

        let io = RenderError::from(EncodeError::io(
            "writing frame",
            io::Error::from(io::ErrorKind::BrokenPipe),
        ));
        assert_eq!(io.stage(), Stage::EncodeIo);

        let packing = RenderError::from(AtlasError::from(PackingError {
            images: 1,
            max_side: 16,
            largest_width: 32,
            largest_height: 32,
        }));
        assert_eq!(packing.stage(), Stage::AtlasBuild);
        assert_eq!(packing.stage().label(), "atlas build");
    }

    #[test]
    fn display_prefixes_name_the_stage() {
        let err = RenderError::from(ConfigError::TimeWindow {
            start: 5.0,
            end: 1.0,
        });
        assert!(err.to_string().starts_with("invalid configuration:"));
        assert!(err.to_string().contains("must be larger than start time"));

        let err = RenderError::from(ParseError::Offset {
            row: 3,
            value: f64::NAN,
        });
        assert!(err.to_string().starts_with("transcript load failed:"));
        assert!(err.to_string().contains("row 3"));
    }

    #[test]
    fn fetch_error_keeps_the_emoticon_id() {
        let err = FetchError::Status {
            id: "25".to_owned(),
            url: "https://example.invalid/25/1.0".to_owned(),
            status: 404,
        };
        let text = err.to_string();
        assert!(text.contains("'25'"));
        assert!(text.contains("404"));
    }
}
