use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use chatreel::config::{ChatBounds, RenderConfig};
use chatreel::emoticons::{HttpEmoticonSource, DEFAULT_EMOTICON_BASE_URL};
use chatreel::encoding::CancelToken;
use chatreel::error::{AtlasError, ConfigError, RenderError};
use chatreel::render_transcript;

const VERSION: &str = match option_env!("CHATREEL_GIT_HASH") {
    Some(hash) => hash,
    None => "unknown",
};

#[derive(Debug, Parser)]
#[command(name = "chatreel")]
#[command(about = "Render a chat transcript with inline emoticons into an overlay video")]
#[command(version = VERSION)]
struct Cli {
    /// Output width in pixels.
    #[arg(long, default_value_t = 1920)]
    width: u32,
    /// Output height in pixels.
    #[arg(long, default_value_t = 1080)]
    height: u32,
    /// First transcript second to render.
    #[arg(short = 's', long, default_value_t = 0.0)]
    start: f64,
    /// Last transcript second to render.
    #[arg(short = 'e', long, default_value_t = 10.0)]
    end: f64,
    #[arg(short = 'p', long, default_value = "sample_comments.csv")]
    transcript: PathBuf,
    #[arg(long, default_value_t = 24.0)]
    fps: f64,
    #[arg(short = 'o', long, default_value = "sample.mov")]
    output: PathBuf,
    /// Encode with h264_nvenc instead of lossless qtrle.
    #[arg(long)]
    hwaccel: bool,
    #[arg(long)]
    debug: bool,
    /// Chat box as x:y:width:height in output pixels.
    #[arg(long, default_value = "0:0:200:200")]
    bounds: String,
    #[arg(long, default_value_t = 24.0)]
    font_size: f32,
    #[arg(long, default_value = "Roboto-Regular.ttf")]
    font_path: PathBuf,
    /// Render frames without starting the encoder.
    #[arg(long)]
    preview: bool,
    /// Pace rendering to real time.
    #[arg(short = 'i', long)]
    interactive: bool,
    /// Also write the packed emoticon atlas to this PNG.
    #[arg(long)]
    atlas_out: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_EMOTICON_BASE_URL)]
    emoticon_base_url: String,
    /// Encoder executable.
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: PathBuf,
}

impl TryFrom<Cli> for RenderConfig {
    type Error = ConfigError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let bounds = cli.bounds.parse::<ChatBounds>()?;
        Ok(Self {
            width: cli.width,
            height: cli.height,
            start_time: cli.start,
            end_time: cli.end,
            transcript_path: cli.transcript,
            fps: cli.fps,
            output_path: cli.output,
            hw_accel: cli.hwaccel,
            debug: cli.debug,
            bounds,
            font_size: cli.font_size,
            font_path: cli.font_path,
            preview: cli.preview,
            interactive: cli.interactive,
            atlas_out: cli.atlas_out,
            emoticon_base_url: cli.emoticon_base_url,
            encoder_program: cli.ffmpeg,
        })
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            report(&error);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = RenderConfig::try_from(cli).map_err(RenderError::from)?;
    let source = HttpEmoticonSource::new(config.emoticon_base_url.clone())
        .map_err(|error| RenderError::from(AtlasError::from(error)))?;

    let cancel = CancelToken::new();
    let interrupt = cancel.clone();
    if let Err(error) = ctrlc::set_handler(move || interrupt.cancel()) {
        tracing::warn!(%error, "failed to install Ctrl-C handler");
    }

    let summary = render_transcript(&config, &source, &cancel)?;
    match &summary.output {
        Some(path) => println!(
            "Wrote {} ({} frames, {} comments, {} emoticons, {:.1}s)",
            path.display(),
            summary.frames,
            summary.comments,
            summary.emoticons,
            summary.elapsed.as_secs_f64()
        ),
        None => println!(
            "Preview rendered {} frames ({} comments, {} emoticons)",
            summary.frames, summary.comments, summary.emoticons
        ),
    }
    Ok(())
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn report(error: &anyhow::Error) {
    let Some(render) = error.downcast_ref::<RenderError>() else {
        eprintln!("[chatreel] failed: {error:#}");
        return;
    };
    match std::error::Error::source(render) {
        Some(cause) => eprintln!("[chatreel] {} failed: {cause}", render.stage()),
        None => eprintln!("[chatreel] {render}"),
    }
}
