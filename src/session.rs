use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use crate::atlas::{build_atlas, Atlas, MIN_ATLAS_SIDE};
use crate::compositor::Compositor;
use crate::config::RenderConfig;
use crate::emoticons::EmoticonSource;
use crate::encoding::{encoder_version, CancelToken, EncoderSettings, FfmpegPipe, PixelOrigin};
use crate::error::{RenderError, RenderResult};
use crate::raster::{FrameRenderer, PixelBuffer};
use crate::text::{FontFace, Typeface};
use crate::transcript::{load_transcript, Comment};

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSummary {
    pub frames: u64,
    pub comments: usize,
    pub emoticons: usize,
    /// `None` for preview runs.
    pub output: Option<PathBuf>,
    pub elapsed: Duration,
}

/// Compositor and renderer for one run, stepped one frame at a time.
pub struct RenderSession<'a> {
    compositor: Compositor<'a>,
    renderer: FrameRenderer<'a>,
}

impl<'a> RenderSession<'a> {
    pub fn new(
        config: &RenderConfig,
        comments: Vec<Comment>,
        atlas: &'a Atlas,
        face: &'a dyn Typeface,
    ) -> RenderResult<Self> {
        Ok(Self {
            compositor: Compositor::new(comments, atlas, face, config.bounds.width),
            renderer: FrameRenderer::new(config.width, config.height, config.bounds, atlas, face)?,
        })
    }

    /// Makes every comment due at `current_time` visible and draws the frame.
    pub fn render_frame(&mut self, current_time: f64) -> PixelBuffer {
        let shown = self.compositor.advance(current_time);
        if !shown.is_empty() {
            tracing::debug!(
                time = current_time,
                first = shown.start,
                count = shown.len(),
                "comments became visible"
            );
        }
        self.renderer.render(&self.compositor.layout())
    }

    pub fn compositor(&self) -> &Compositor<'a> {
        &self.compositor
    }

    pub fn origin(&self) -> PixelOrigin {
        self.renderer.origin()
    }
}

/// Loads everything `config` points at and renders the whole window.
pub fn render_transcript(
    config: &RenderConfig,
    source: &dyn EmoticonSource,
    cancel: &CancelToken,
) -> RenderResult<RenderSummary> {
    config.validate()?;

    let comments = load_transcript(&config.transcript_path, config.start_time, config.end_time)?;
    let face = FontFace::load(&config.font_path, config.font_size)?;
    let atlas = build_atlas(&comments, source, MIN_ATLAS_SIDE)?;
    if let Some(path) = &config.atlas_out {
        atlas.save_png(path)?;
        tracing::info!(path = %path.display(), "wrote emoticon atlas");
    }

    render_frames(config, comments, &atlas, &face, cancel)
}

/// Runs the frame loop over already loaded inputs, encoding unless `config.preview` is set.
pub fn render_frames(
    config: &RenderConfig,
    comments: Vec<Comment>,
    atlas: &Atlas,
    face: &dyn Typeface,
    cancel: &CancelToken,
) -> RenderResult<RenderSummary> {
    config.validate()?;
    let started = Instant::now();
    let comment_count = comments.len();
    let mut session = RenderSession::new(config, comments, atlas, face)?;

    let mut encoder = if config.preview {
        tracing::info!("preview run, frames are not encoded");
        None
    } else {
        match encoder_version(&config.encoder_program) {
            Ok(version) => tracing::info!(%version, "found encoder"),
            Err(error) => tracing::warn!(%error, "encoder version check failed"),
        }
        let settings = EncoderSettings::from_config(config, session.origin());
        Some(FfmpegPipe::spawn(settings.invocation(), cancel.clone())?)
    };

    let total_frames = config.total_frames();
    let frames_per_second = (config.fps.round() as u64).max(1);
    tracing::info!(
        frames = total_frames,
        comments = comment_count,
        start = config.start_time,
        end = config.end_time,
        "rendering"
    );

    for frame_index in 0..total_frames {
        if cancel.is_cancelled() {
            if let Some(encoder) = encoder.take() {
                encoder.abort();
            }
            return Err(RenderError::Cancelled);
        }

        let current_time = config.frame_time(frame_index);
        let frame = session.render_frame(current_time);
        tracing::debug!(frame = frame_index, time = current_time, "rendered frame");

        if let Some(encoder) = encoder.as_mut() {
            encoder.write_frame(frame)?;
        }

        if frame_index % frames_per_second == 0 {
            tracing::info!(
                "rendered frame {}/{} ({:.1}s)",
                frame_index + 1,
                total_frames,
                current_time
            );
        }

        if config.interactive {
            let due = Duration::from_secs_f64((frame_index + 1) as f64 / config.fps);
            if let Some(wait) = due.checked_sub(started.elapsed()) {
                thread::sleep(wait);
            }
        }
    }

    let output = match encoder {
        Some(encoder) => {
            encoder.finish()?;
            tracing::info!(path = %config.output_path.display(), "wrote video");
            Some(config.output_path.clone())
        }
        None => None,
    };

    Ok(RenderSummary {
        frames: total_frames,
        comments: comment_count,
        emoticons: atlas.len(),
        output,
        elapsed: started.elapsed(),
    })
}
