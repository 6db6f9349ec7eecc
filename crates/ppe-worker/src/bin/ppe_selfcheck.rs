//! Deployment self-check: directories, FFmpeg and the model.

use std::path::Path;

use anyhow::Context;
use ppe_media::{check_ffmpeg, check_ffprobe, ObjectDetector};
use ppe_worker::WorkerConfig;

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "ppe-selfcheck: upload_dir={} output_dir={} model={}",
        config.upload_dir.display(),
        config.output_dir.display(),
        config.model_path.display()
    );

    ensure_writable(&config.upload_dir)?;
    ensure_writable(&config.output_dir)?;

    let ffmpeg = check_ffmpeg().context("ffmpeg not available")?;
    let ffprobe = check_ffprobe().context("ffprobe not available")?;
    println!("ppe-selfcheck: ffmpeg={}", ffmpeg.display());
    println!("ppe-selfcheck: ffprobe={}", ffprobe.display());

    let detector =
        ObjectDetector::new(config.detector_config()).context("failed to load model")?;
    let names = detector.class_names();
    if names.is_empty() {
        println!("ppe-selfcheck: model carries no class names (class_<id> will be used)");
    } else {
        println!("ppe-selfcheck: classes: {}", names.join(", "));
    }

    println!("ppe-selfcheck: ok");
    Ok(())
}

fn ensure_writable(dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("cannot create {}", dir.display()))?;
    let probe = dir.join(".ppe-selfcheck");
    std::fs::write(&probe, b"ok").with_context(|| format!("{} is not writable", dir.display()))?;
    std::fs::remove_file(&probe)?;
    Ok(())
}
