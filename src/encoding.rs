use std::fs;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use crate::config::RenderConfig;
use crate::error::EncodeError;
use crate::raster::PixelBuffer;

const STDERR_TAIL_CHARS: usize = 500;

/// Row order of the pixel buffers handed to the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelOrigin {
    /// First row is the top of the image.
    TopLeft,
    /// First row is the bottom of the image (GPU readback order).
    BottomLeft,
}

/// Shared flag that stops the frame loop and the encoder worker.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
    pub program: PathBuf,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub hw_accel: bool,
    pub debug: bool,
    pub output: PathBuf,
    pub source_origin: PixelOrigin,
}

impl EncoderSettings {
    pub fn from_config(config: &RenderConfig, source_origin: PixelOrigin) -> Self {
        Self {
            program: config.encoder_program.clone(),
            fps: config.fps,
            width: config.width,
            height: config.height,
            hw_accel: config.hw_accel,
            debug: config.debug,
            output: config.output_path.clone(),
            source_origin,
        }
    }

    pub fn frame_len(&self) -> usize {
        PixelBuffer::byte_len(self.width, self.height)
    }

    pub fn invocation(&self) -> EncoderInvocation {
        EncoderInvocation {
            program: self.program.clone(),
            args: ffmpeg_args(self),
            output_path: Some(self.output.clone()),
            frame_len: self.frame_len(),
            log_stderr: self.debug,
        }
    }
}

pub fn ffmpeg_args(settings: &EncoderSettings) -> Vec<String> {
    let loglevel = if settings.debug { "info" } else { "error" };
    let mut args = vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        loglevel.to_owned(),
        "-y".to_owned(),
        "-f".to_owned(),
        "rawvideo".to_owned(),
        "-pix_fmt".to_owned(),
        "rgba".to_owned(),
        "-r".to_owned(),
        settings.fps.to_string(),
        "-s".to_owned(),
        format!("{}x{}", settings.width, settings.height),
        "-i".to_owned(),
        "pipe:0".to_owned(),
        "-an".to_owned(),
    ];

    if settings.hw_accel {
        args.extend(["-c:v", "h264_nvenc", "-preset", "fast"].map(str::to_owned));
    } else {
        // qtrle keeps the alpha channel losslessly.
        args.extend(["-c:v", "qtrle", "-pix_fmt", "argb"].map(str::to_owned));
    }

    if settings.source_origin == PixelOrigin::BottomLeft {
        args.push("-vf".to_owned());
        args.push("vflip".to_owned());
    }

    args.push(settings.output.to_string_lossy().into_owned());
    args
}

/// A fully resolved encoder command line.
#[derive(Debug, Clone)]
pub struct EncoderInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// File the encoder writes; removed again when encoding fails or is aborted.
    pub output_path: Option<PathBuf>,
    /// Exact byte length every frame must have.
    pub frame_len: usize,
    /// Forward each encoder stderr line to the log.
    pub log_stderr: bool,
}

/// Streams frames into an encoder subprocess.
///
/// Frames go through a single-slot channel to a worker thread that owns the
/// subprocess stdin, so `write_frame` blocks while the encoder is behind.
/// A second thread drains stderr so the encoder never stalls on a full pipe.
pub struct FfmpegPipe {
    sender: Option<mpsc::SyncSender<Vec<u8>>>,
    worker: Option<JoinHandle<Result<u64, EncodeError>>>,
    stderr: Option<JoinHandle<String>>,
    child: Option<Child>,
    cancel: CancelToken,
    output_path: Option<PathBuf>,
    frame_len: usize,
}

impl FfmpegPipe {
    pub fn spawn(invocation: EncoderInvocation, cancel: CancelToken) -> Result<Self, EncodeError> {
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| EncodeError::Spawn {
                program: invocation.program.clone(),
                source,
            })?;
        tracing::info!(
            program = %invocation.program.display(),
            args = %invocation.args.join(" "),
            "started encoder"
        );

        let mut pipe = Self {
            sender: None,
            worker: None,
            stderr: None,
            child: None,
            cancel,
            output_path: invocation.output_path,
            frame_len: invocation.frame_len,
        };

        let (stdin, stderr) = match (child.stdin.take(), child.stderr.take()) {
            (Some(stdin), Some(stderr)) => (stdin, stderr),
            _ => {
                reap(&mut child);
                return Err(EncodeError::io(
                    "capturing encoder pipes",
                    std::io::Error::new(ErrorKind::BrokenPipe, "encoder pipes missing"),
                ));
            }
        };
        pipe.child = Some(child);

        let log_stderr = invocation.log_stderr;
        let stderr_thread = thread::Builder::new()
            .name("chatreel-ffmpeg-stderr".to_owned())
            .spawn(move || drain_stderr(stderr, log_stderr))
            .map_err(|source| EncodeError::io("starting encoder stderr reader", source))?;
        pipe.stderr = Some(stderr_thread);

        let (sender, receiver) = mpsc::sync_channel::<Vec<u8>>(1);
        let worker_cancel = pipe.cancel.clone();
        let worker = thread::Builder::new()
            .name("chatreel-ffmpeg-encoder".to_owned())
            .spawn(move || feed_stdin(stdin, receiver, worker_cancel))
            .map_err(|source| EncodeError::io("starting encoder worker", source))?;
        pipe.sender = Some(sender);
        pipe.worker = Some(worker);

        Ok(pipe)
    }

    /// Queues one frame. Blocks while the previous frame is still being written.
    pub fn write_frame(&mut self, frame: PixelBuffer) -> Result<(), EncodeError> {
        if self.cancel.is_cancelled() {
            return Err(EncodeError::Cancelled);
        }
        if frame.data.len() != self.frame_len {
            return Err(EncodeError::FrameSize {
                expected: self.frame_len,
                actual: frame.data.len(),
            });
        }

        let sender = self.sender.as_ref().ok_or(EncodeError::Closed)?;
        if sender.send(frame.data).is_ok() {
            return Ok(());
        }

        // The worker hung up: report why.
        self.sender = None;
        match self.worker.take().map(JoinHandle::join) {
            Some(Ok(Err(error))) => Err(error),
            Some(Err(_)) => Err(EncodeError::WorkerPanicked),
            _ => Err(EncodeError::Closed),
        }
    }

    /// Closes the input, waits for the encoder and returns the number of frames written.
    pub fn finish(mut self) -> Result<u64, EncodeError> {
        drop(self.sender.take());

        let written = match self.worker.take().map(JoinHandle::join) {
            Some(Ok(result)) => result,
            Some(Err(_)) => Err(EncodeError::WorkerPanicked),
            None => Err(EncodeError::Closed),
        };

        let status = match self.child.as_mut() {
            Some(child) => child
                .wait()
                .map_err(|source| EncodeError::io("waiting for encoder", source)),
            None => Err(EncodeError::Closed),
        };
        self.child = None;
        let stderr_tail = self.join_stderr();

        let outcome = match status {
            Ok(status) if !status.success() => Err(EncodeError::Exit {
                status,
                stderr_tail,
            }),
            Ok(_) => written,
            Err(error) => Err(error),
        };

        match outcome {
            Ok(frames) => {
                tracing::info!(frames, "encoder finished");
                self.output_path = None;
                Ok(frames)
            }
            Err(error) => {
                self.remove_output();
                Err(error)
            }
        }
    }

    /// Stops encoding immediately and deletes the partial output.
    pub fn abort(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.cancel.cancel();
        drop(self.sender.take());

        if let Some(child) = self.child.as_mut() {
            reap(child);
        }
        self.child = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        let tail = self.join_stderr();
        if !tail.is_empty() {
            tracing::debug!(stderr = %tail, "encoder aborted");
        }
        self.remove_output();
    }

    fn join_stderr(&mut self) -> String {
        self.stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    }

    fn remove_output(&mut self) {
        let Some(path) = self.output_path.take() else {
            return;
        };
        match fs::remove_file(&path) {
            Ok(()) => tracing::info!(path = %path.display(), "removed partial output"),
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "failed to remove partial output")
            }
        }
    }
}

impl Drop for FfmpegPipe {
    fn drop(&mut self) {
        if self.child.is_some() {
            self.shutdown();
        }
    }
}

fn feed_stdin(
    mut stdin: ChildStdin,
    receiver: mpsc::Receiver<Vec<u8>>,
    cancel: CancelToken,
) -> Result<u64, EncodeError> {
    let mut frames = 0_u64;
    while let Ok(frame) = receiver.recv() {
        if cancel.is_cancelled() {
            return Err(EncodeError::Cancelled);
        }
        stdin
            .write_all(&frame)
            .map_err(|source| EncodeError::io("writing frame to encoder", source))?;
        frames += 1;
    }
    stdin
        .flush()
        .map_err(|source| EncodeError::io("flushing encoder input", source))?;
    Ok(frames)
}

fn drain_stderr(stderr: ChildStderr, log_lines: bool) -> String {
    let mut tail = String::new();
    for line in BufReader::new(stderr).split(b'\n') {
        let Ok(line) = line else {
            break;
        };
        let line = String::from_utf8_lossy(&line);
        let line = line.trim_end();
        if log_lines && !line.is_empty() {
            tracing::debug!(target: "chatreel::ffmpeg", "{line}");
        }
        tail.push_str(line);
        tail.push('\n');
        if tail.len() > STDERR_TAIL_CHARS * 8 {
            tail = last_n_chars(&tail, STDERR_TAIL_CHARS);
            tail.push('\n');
        }
    }
    last_n_chars(&tail, STDERR_TAIL_CHARS)
}

fn reap(child: &mut Child) {
    if let Err(error) = child.kill() {
        if error.kind() != ErrorKind::InvalidInput {
            tracing::warn!(%error, "failed to kill encoder");
        }
    }
    let _ = child.wait();
}

/// First line of `<program> -version`.
pub fn encoder_version(program: &Path) -> Result<String, EncodeError> {
    let output = Command::new(program)
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .map_err(|source| EncodeError::Spawn {
            program: program.to_path_buf(),
            source,
        })?;
    if !output.status.success() {
        return Err(EncodeError::Exit {
            status: output.status,
            stderr_tail: last_n_chars(&String::from_utf8_lossy(&output.stderr), STDERR_TAIL_CHARS),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_owned())
}

fn last_n_chars(s: &str, max_chars: usize) -> String {
    let count = s.chars().count();
    s.chars()
        .skip(count.saturating_sub(max_chars))
        .collect::<String>()
        .trim()
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> EncoderSettings {
        EncoderSettings {
            program: PathBuf::from("ffmpeg"),
            fps: 24.0,
            width: 1920,
            height: 1080,
            hw_accel: false,
            debug: false,
            output: PathBuf::from("out.mov"),
            source_origin: PixelOrigin::TopLeft,
        }
    }

    #[test]
    fn software_profile_keeps_alpha_and_skips_flip_for_top_left_frames() {
        let args = ffmpeg_args(&settings());
        assert_eq!(
            args.join(" "),
            "-hide_banner -loglevel error -y -f rawvideo -pix_fmt rgba -r 24 -s 1920x1080 \
             -i pipe:0 -an -c:v qtrle -pix_fmt argb out.mov"
        );
    }

    #[test]
    fn hardware_profile_and_bottom_left_frames() {
        let settings = EncoderSettings {
            hw_accel: true,
            debug: true,
            fps: 29.97,
            source_origin: PixelOrigin::BottomLeft,
            ..settings()
        };
        let args = ffmpeg_args(&settings);
        let joined = args.join(" ");
        assert!(joined.contains("-loglevel info"));
        assert!(joined.contains("-r 29.97"));
        assert!(joined.contains("-c:v h264_nvenc -preset fast"));
        assert!(!joined.contains("qtrle"));
        assert!(joined.ends_with("-vf vflip out.mov"));
    }

    #[test]
    fn invocation_carries_frame_length_and_output() {
        let invocation = settings().invocation();
        assert_eq!(invocation.frame_len, 1920 * 1080 * 4);
        assert_eq!(invocation.output_path, Some(PathBuf::from("out.mov")));
        assert!(!invocation.log_stderr);
    }

    #[test]
    fn tail_keeps_last_chars_trimmed() {
        assert_eq!(last_n_chars("abcdef\n", 4), "def");
        assert_eq!(last_n_chars("  ab ", 10), "ab");
        assert_eq!(last_n_chars("héllo", 4), "éllo");
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let invocation = EncoderInvocation {
            program: PathBuf::from("chatreel-no-such-encoder"),
            args: Vec::new(),
            output_path: None,
            frame_len: 4,
            log_stderr: false,
        };
        let err = FfmpegPipe::spawn(invocation, CancelToken::new())
            .err()
            .expect("spawn should fail");
        assert!(matches!(err, EncodeError::Spawn { .. }));
    }
}
