//! chatreel renders a timestamped chat transcript, with inline emoticons, into
//! an overlay video streamed through ffmpeg.

pub mod atlas;
pub mod compositor;
pub mod config;
pub mod emoticons;
pub mod encoding;
pub mod error;
pub mod raster;
pub mod session;
pub mod text;
pub mod transcript;

pub use config::{ChatBounds, RenderConfig};
pub use error::{RenderError, RenderResult, Stage};
pub use session::{render_transcript, RenderSession, RenderSummary};
