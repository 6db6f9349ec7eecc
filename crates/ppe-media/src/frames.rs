//! Raw RGB frame I/O through FFmpeg child processes.
//!
//! `FrameReader` decodes any container FFmpeg understands into packed
//! `rgb24` frames on stdout. `FrameWriter` takes the same layout on stdin
//! and writes the intermediate file. Both run synchronously and are meant
//! for a blocking thread.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use image::RgbImage;
use tracing::{debug, warn};

use crate::command::{check_ffmpeg, STDERR_TAIL_LINES};
use crate::error::{MediaError, MediaResult};

/// Collects the last lines of a child's stderr on a background thread.
///
/// Keeps the pipe drained so a chatty FFmpeg never blocks on a full buffer.
struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    handle: Option<JoinHandle<()>>,
}

impl StderrTail {
    fn spawn(stderr: ChildStderr) -> Self {
        let lines = Arc::new(Mutex::new(VecDeque::new()));
        let sink = Arc::clone(&lines);
        let handle = std::thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                if let Ok(mut tail) = sink.lock() {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
        });
        Self {
            lines,
            handle: Some(handle),
        }
    }

    /// Wait for the pipe to close and return what was captured.
    fn collect(&mut self) -> Option<String> {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        let text = self
            .lines
            .lock()
            .ok()?
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        (!text.trim().is_empty()).then_some(text)
    }
}

fn take_stderr(child: &mut Child) -> MediaResult<StderrTail> {
    child
        .stderr
        .take()
        .map(StderrTail::spawn)
        .ok_or_else(|| MediaError::internal("FFmpeg stderr not captured"))
}

fn exit_error(what: &str, status: std::process::ExitStatus, tail: &mut StderrTail) -> MediaError {
    MediaError::ffmpeg_failed(
        format!("{} exited with {}", what, status),
        tail.collect(),
        status.code(),
    )
}

/// Sequential reader of decoded RGB frames.
pub struct FrameReader {
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr: StderrTail,
    width: u32,
    height: u32,
    frame_len: usize,
    finished: bool,
}

impl FrameReader {
    /// Start decoding `input`. `width`×`height` is the decoded size, after
    /// FFmpeg applies any display rotation.
    pub fn open(input: impl AsRef<Path>, width: u32, height: u32) -> MediaResult<Self> {
        let input = input.as_ref();
        if width == 0 || height == 0 {
            return Err(MediaError::invalid_video(format!(
                "Invalid frame size {}x{}",
                width, height
            )));
        }
        if !input.exists() {
            return Err(MediaError::FileNotFound(input.to_path_buf()));
        }

        let ffmpeg = check_ffmpeg()?;
        let mut child = Command::new(ffmpeg)
            .args(["-hide_banner", "-v", "error", "-nostdin", "-i"])
            .arg(input)
            .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                MediaError::ffmpeg_failed(format!("Failed to spawn FFmpeg: {}", e), None, None)
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stdout not captured"))?;
        let stderr = take_stderr(&mut child)?;

        debug!(input = %input.display(), width, height, "Frame reader started");

        Ok(Self {
            child,
            stdout: BufReader::with_capacity(1 << 20, stdout),
            stderr,
            width,
            height,
            frame_len: width as usize * height as usize * 3,
            finished: false,
        })
    }

    /// Next frame, or `None` at end of stream.
    ///
    /// A truncated trailing frame is discarded.
    pub fn read_frame(&mut self) -> MediaResult<Option<RgbImage>> {
        let mut buf = vec![0u8; self.frame_len];
        let mut filled = 0;

        while filled < self.frame_len {
            match self.stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if filled == 0 {
            return Ok(None);
        }
        if filled < self.frame_len {
            warn!(
                bytes = filled,
                expected = self.frame_len,
                "Discarding truncated trailing frame"
            );
            return Ok(None);
        }

        RgbImage::from_raw(self.width, self.height, buf)
            .map(Some)
            .ok_or_else(|| MediaError::internal("Failed to create image buffer"))
    }

    /// Reap the decoder, failing if it exited abnormally.
    pub fn finish(mut self) -> MediaResult<()> {
        self.finished = true;
        let status = self.child.wait()?;
        if status.success() {
            Ok(())
        } else {
            Err(exit_error("FFmpeg decoder", status, &mut self.stderr))
        }
    }
}

impl Drop for FrameReader {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Settings for the intermediate file written by [`FrameWriter`].
#[derive(Debug, Clone)]
pub struct FrameWriterOptions {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// FFmpeg encoder name; `mpeg4` is tagged `mp4v`
    pub codec: String,
}

/// Sequential writer of RGB frames into a video file.
pub struct FrameWriter {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: StderrTail,
    output: PathBuf,
    width: u32,
    height: u32,
    frames_written: u64,
    finished: bool,
}

impl FrameWriter {
    /// Start an encoder writing to `output`.
    pub fn create(output: impl AsRef<Path>, opts: &FrameWriterOptions) -> MediaResult<Self> {
        let output = output.as_ref();
        if opts.width == 0 || opts.height == 0 {
            return Err(MediaError::invalid_video(format!(
                "Invalid frame size {}x{}",
                opts.width, opts.height
            )));
        }

        let ffmpeg = check_ffmpeg()?;
        let mut cmd = Command::new(ffmpeg);
        cmd.args(["-hide_banner", "-y", "-v", "error"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .args(["-s", &format!("{}x{}", opts.width, opts.height)])
            .args(["-r", &format!("{}", opts.fps)])
            .args(["-i", "-", "-an", "-c:v", &opts.codec]);
        if opts.codec == "mpeg4" {
            cmd.args(["-tag:v", "mp4v", "-q:v", "2"]);
        }
        cmd.arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            MediaError::ffmpeg_failed(format!("Failed to spawn FFmpeg: {}", e), None, None)
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stdin not captured"))?;
        let stderr = take_stderr(&mut child)?;

        debug!(
            output = %output.display(),
            codec = %opts.codec,
            fps = opts.fps,
            "Frame writer started"
        );

        Ok(Self {
            child,
            stdin: Some(stdin),
            stderr,
            output: output.to_path_buf(),
            width: opts.width,
            height: opts.height,
            frames_written: 0,
            finished: false,
        })
    }

    /// Append one frame. The frame must match the writer's dimensions.
    pub fn write_frame(&mut self, frame: &RgbImage) -> MediaResult<()> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(MediaError::internal(format!(
                "Frame is {}x{}, writer expects {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| MediaError::internal("Frame writer already closed"))?;

        if let Err(e) = stdin.write_all(frame.as_raw()) {
            if e.kind() == ErrorKind::BrokenPipe {
                // Encoder died; its stderr says why.
                self.stdin = None;
                self.finished = true;
                let status = self.child.wait()?;
                return Err(exit_error("FFmpeg encoder", status, &mut self.stderr));
            }
            return Err(e.into());
        }

        self.frames_written += 1;
        Ok(())
    }

    /// Close stdin and wait for the encoder to flush.
    pub fn finish(mut self) -> MediaResult<PathBuf> {
        self.finished = true;
        if let Some(mut stdin) = self.stdin.take() {
            stdin.flush()?;
        }

        let status = self.child.wait()?;
        if !status.success() {
            return Err(exit_error("FFmpeg encoder", status, &mut self.stderr));
        }

        debug!(
            output = %self.output.display(),
            frames = self.frames_written,
            "Frame writer finished"
        );
        Ok(self.output.clone())
    }
}

impl Drop for FrameWriter {
    fn drop(&mut self) {
        if !self.finished {
            self.stdin = None;
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
