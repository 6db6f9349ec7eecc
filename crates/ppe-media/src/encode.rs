//! Final H.264 encode of the annotated intermediate file.

use std::path::Path;
use std::time::Instant;

use tokio::sync::watch;
use tracing::info;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::progress::FfmpegProgress;

/// Options for [`encode_to_h264`].
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    pub codec: String,
    pub pixel_format: String,
    /// Kill the encoder after this many seconds
    pub timeout_secs: Option<u64>,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            codec: "libx264".to_string(),
            pixel_format: "yuv420p".to_string(),
            timeout_secs: None,
        }
    }
}

/// Build the browser-compatible encode command.
///
/// 4:2:0 chroma needs even dimensions, so odd sizes are trimmed by a pixel.
pub fn h264_command(input: &Path, output: &Path, opts: &EncodeOptions) -> FfmpegCommand {
    FfmpegCommand::new(input, output)
        .output_args(["-vf", "scale=trunc(iw/2)*2:trunc(ih/2)*2"])
        .video_codec(opts.codec.as_str())
        .pixel_format(opts.pixel_format.as_str())
        .movflags("+faststart")
        .no_audio()
}

/// Re-encode `temp` into a streamable H.264 MP4 at `output`.
pub async fn encode_to_h264<F>(
    temp: &Path,
    output: &Path,
    opts: &EncodeOptions,
    cancel: Option<watch::Receiver<bool>>,
    progress: F,
) -> MediaResult<()>
where
    F: Fn(FfmpegProgress) + Send + 'static,
{
    if !temp.exists() {
        return Err(MediaError::FileNotFound(temp.to_path_buf()));
    }

    let started = Instant::now();
    let cmd = h264_command(temp, output, opts);

    let mut runner = FfmpegRunner::new();
    if let Some(cancel) = cancel {
        runner = runner.with_cancel(cancel);
    }
    if let Some(secs) = opts.timeout_secs {
        runner = runner.with_timeout(secs);
    }

    runner.run_with_progress(&cmd, progress).await?;

    if !output.exists() {
        return Err(MediaError::ffmpeg_failed(
            "Encoder finished without writing output",
            None,
            None,
        ));
    }

    info!(
        output = %output.display(),
        codec = %opts.codec,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "H.264 encode complete"
    );
    Ok(())
}
