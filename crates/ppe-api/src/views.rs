//! Server-rendered HTML pages.

use std::fmt::Write;

use axum::http::StatusCode;
use ppe_models::{DetectionStats, JobRecord, JobStatus, PpeClass, DEFAULT_CLASSES};

/// Seconds between refreshes of a job page that is still running.
pub const REFRESH_SECS: u32 = 2;

const STYLE: &str = r#"
* { box-sizing: border-box; font-family: 'Inter', -apple-system, BlinkMacSystemFont, 'Segoe UI', sans-serif; }
body { margin: 0; background: linear-gradient(135deg, #f5f7fa 0%, #c3cfe2 100%); color: #1f2937; min-height: 100vh; }
main { max-width: 1200px; margin: 0 auto; padding: 2rem 1.5rem 3rem; }
a { color: #5b21b6; }
.header-container { background: linear-gradient(135deg, #667eea 0%, #764ba2 100%); padding: 2.5rem 2.5rem; border-radius: 24px; margin-bottom: 2rem; box-shadow: 0 20px 60px rgba(102, 126, 234, 0.4); }
.header-container h1 { font-size: 2.6rem; font-weight: 800; color: white; margin: 0 0 0.5rem 0; letter-spacing: -1px; }
.header-container h1 a { color: inherit; text-decoration: none; }
.header-container .subtitle { font-size: 1.15rem; color: rgba(255, 255, 255, 0.95); margin: 0; }
.stats-overview { display: grid; grid-template-columns: repeat(auto-fit, minmax(200px, 1fr)); gap: 1.25rem; margin-bottom: 2rem; }
.stat-box { background: white; border-radius: 18px; padding: 1.5rem; text-align: center; box-shadow: 0 8px 24px rgba(0, 0, 0, 0.08); }
.stat-number { font-size: 1.8rem; font-weight: 800; color: #4c1d95; }
.stat-desc { color: #6b7280; font-weight: 500; margin-top: 0.25rem; }
.columns { display: grid; grid-template-columns: 1.3fr 1fr; gap: 1.5rem; }
@media (max-width: 900px) { .columns, .video-grid { grid-template-columns: 1fr !important; } }
.pro-card { background: white; border-radius: 20px; padding: 1.75rem; margin-bottom: 1.5rem; box-shadow: 0 10px 30px rgba(0, 0, 0, 0.08); }
.pro-card h3 { margin: 0 0 1rem 0; font-size: 1.3rem; }
.info-grid { display: grid; grid-template-columns: 1fr 1fr; gap: 0.75rem; margin-bottom: 1rem; }
.info-item { background: #f5f3ff; border-radius: 12px; padding: 0.75rem 1rem; }
.info-label { font-size: 0.8rem; color: #6b7280; text-transform: uppercase; letter-spacing: 0.05em; }
.info-value { font-weight: 700; color: #312e81; }
.class-list { list-style: none; padding: 0; margin: 0; }
.class-list li { padding: 0.4rem 0; display: flex; align-items: center; gap: 0.6rem; }
.swatch { display: inline-block; width: 14px; height: 14px; border-radius: 4px; }
.features-grid { display: grid; grid-template-columns: repeat(auto-fit, minmax(220px, 1fr)); gap: 1rem; }
.feature-item { background: #fafafa; border-radius: 14px; padding: 1.25rem; border: 1px solid #ede9fe; }
.feature-title { font-weight: 700; margin-bottom: 0.35rem; }
.feature-desc { color: #6b7280; font-size: 0.95rem; }
input[type=file] { width: 100%; padding: 1.25rem; border: 2px dashed #a78bfa; border-radius: 14px; background: #faf5ff; }
.hint { color: #6b7280; font-size: 0.9rem; margin: 0.5rem 0 1rem; }
.btn { display: block; width: 100%; text-align: center; border: 0; cursor: pointer; padding: 0.95rem 1.25rem; border-radius: 14px; font-size: 1.05rem; font-weight: 700; color: white; text-decoration: none; background: linear-gradient(135deg, #667eea 0%, #764ba2 100%); }
.btn.secondary { background: #4b5563; }
.progress { background: #ede9fe; border-radius: 999px; overflow: hidden; height: 18px; margin: 1rem 0; }
.progress .bar { height: 100%; background: linear-gradient(90deg, #667eea, #764ba2); transition: width 0.5s; }
.progress .bar.indeterminate { width: 100%; opacity: 0.6; }
.alert { border-radius: 14px; padding: 1rem 1.25rem; margin-bottom: 1.25rem; font-weight: 600; }
.alert.success { background: #dcfce7; color: #166534; }
.alert.error { background: #fee2e2; color: #991b1b; }
.alert.info { background: #e0e7ff; color: #3730a3; }
.video-grid { display: grid; grid-template-columns: 1fr 1fr; gap: 1.5rem; margin: 1.25rem 0; }
.video-container { background: #111827; border-radius: 16px; padding: 0.75rem; }
.video-label { display: inline-block; color: white; font-weight: 600; margin: 0.25rem 0 0.5rem 0.25rem; }
video { width: 100%; border-radius: 10px; background: black; }
table { width: 100%; border-collapse: collapse; }
th, td { text-align: left; padding: 0.55rem 0.4rem; border-bottom: 1px solid #f3f4f6; }
td.num { text-align: right; font-variant-numeric: tabular-nums; }
tr.violation td { color: #b91c1c; font-weight: 600; }
.job-list td { font-size: 0.95rem; }
.badge { display: inline-block; padding: 0.15rem 0.6rem; border-radius: 999px; font-size: 0.8rem; font-weight: 700; background: #e5e7eb; }
.badge.completed { background: #dcfce7; color: #166534; }
.badge.failed { background: #fee2e2; color: #991b1b; }
.badge.processing, .badge.encoding { background: #e0e7ff; color: #3730a3; }
.footer-container { text-align: center; color: #6b7280; margin-top: 2.5rem; font-size: 0.9rem; }
"#;

const FEATURES: &[(&str, &str)] = &[
    (
        "Frame-by-frame Detection",
        "Every frame of the video is analysed by a YOLOv8 model for PPE compliance.",
    ),
    (
        "Multi-Class Recognition",
        "Detect person, helmet, vest, and identify missing safety equipment violations.",
    ),
    (
        "Detailed Analytics",
        "Per-class detection counts for every processed video, ready for safety audits.",
    ),
    (
        "Browser Playback",
        "Annotated output is re-encoded to H.264 for side-by-side comparison and download.",
    ),
];

/// Escape text for HTML element and attribute content.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn hex_color(rgb: [u8; 3]) -> String {
    format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2])
}

fn layout(title: &str, body: &str, refresh_secs: Option<u32>) -> String {
    let refresh = refresh_secs
        .map(|secs| format!(r#"<meta http-equiv="refresh" content="{}">"#, secs))
        .unwrap_or_default();
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
{refresh}
<title>{title}</title>
<style>{style}</style>
</head>
<body>
<main>
<div class="header-container">
<h1><a href="/">PPE AI Safety Monitoring</a></h1>
<p class="subtitle">Computer vision for workplace safety compliance</p>
</div>
{body}
<div class="footer-container">PPE AI Safety Monitoring System</div>
</main>
</body>
</html>"#,
        refresh = refresh,
        title = escape(title),
        style = STYLE,
        body = body,
    )
}

/// Landing page inputs.
pub struct IndexPage<'a> {
    /// Class names reported by the loaded model
    pub class_names: &'a [String],
    pub max_upload_mb: u64,
    /// Recent jobs, newest first
    pub recent_jobs: &'a [JobRecord],
}

/// (name, description, colour) rows for the class list.
fn class_rows(class_names: &[String]) -> Vec<(String, &'static str, String)> {
    if class_names.is_empty() {
        return DEFAULT_CLASSES
            .iter()
            .map(|(name, desc)| {
                (
                    name.to_string(),
                    *desc,
                    hex_color(PpeClass::from_label(name).color()),
                )
            })
            .collect();
    }

    class_names
        .iter()
        .map(|name| {
            let class = PpeClass::from_label(name);
            let desc = DEFAULT_CLASSES
                .iter()
                .find(|(known, _)| PpeClass::from_label(known) == class)
                .map(|(_, desc)| *desc)
                .unwrap_or(if class.is_violation() {
                    "Missing equipment violation"
                } else {
                    "Detected object"
                });
            (name.clone(), desc, hex_color(class.color()))
        })
        .collect()
}

pub fn index_page(page: &IndexPage<'_>) -> String {
    let classes = class_rows(page.class_names);

    let mut body = String::new();
    let _ = write!(
        body,
        r#"<div class="stats-overview">
<div class="stat-box"><div class="stat-number">YOLOv8</div><div class="stat-desc">ONNX Runtime Inference</div></div>
<div class="stat-box"><div class="stat-number">{classes} Classes</div><div class="stat-desc">PPE Categories</div></div>
<div class="stat-box"><div class="stat-number">{max_mb} MB</div><div class="stat-desc">Maximum Upload</div></div>
</div>
<div class="columns">
<div>
<div class="pro-card">
<h3>Upload Video</h3>
<form method="post" action="/api/jobs" enctype="multipart/form-data">
<input type="file" name="video" accept=".mp4,.avi,.mov,video/mp4,video/x-msvideo,video/quicktime" required>
<p class="hint">Supported formats: MP4, AVI, MOV. Max file size: {max_mb}MB</p>
<button class="btn" type="submit">Start PPE Detection</button>
</form>
</div>
"#,
        classes = classes.len(),
        max_mb = page.max_upload_mb,
    );

    if !page.recent_jobs.is_empty() {
        body.push_str(
            r#"<div class="pro-card"><h3>Recent Jobs</h3><table class="job-list"><tr><th>File</th><th>Status</th><th>Uploaded</th></tr>"#,
        );
        for job in page.recent_jobs {
            let _ = write!(
                body,
                r#"<tr><td><a href="/jobs/{id}">{name}</a></td><td><span class="badge {status}">{status}</span></td><td>{created}</td></tr>"#,
                id = job.id,
                name = escape(&job.original_filename),
                status = job.status,
                created = job.created_at.format("%Y-%m-%d %H:%M UTC"),
            );
        }
        body.push_str("</table></div>\n");
    }

    body.push_str("</div>\n<div>\n");
    let _ = write!(
        body,
        r#"<div class="pro-card">
<h3>Model Configuration</h3>
<div class="info-grid">
<div class="info-item"><div class="info-label">Model Architecture</div><div class="info-value">YOLOv8</div></div>
<div class="info-item"><div class="info-label">Detection Task</div><div class="info-value">PPE Compliance</div></div>
<div class="info-item"><div class="info-label">Classes Detected</div><div class="info-value">{} Categories</div></div>
<div class="info-item"><div class="info-label">Use Case</div><div class="info-value">Industrial Safety</div></div>
</div>
<h4>Detection Classes</h4>
<ul class="class-list">
"#,
        classes.len()
    );
    for (name, desc, color) in &classes {
        let _ = write!(
            body,
            r#"<li><span class="swatch" style="background:{color}"></span><strong>{name}</strong> - {desc}</li>"#,
            color = color,
            name = escape(name),
            desc = desc,
        );
    }
    body.push_str("</ul>\n</div>\n</div>\n</div>\n");

    body.push_str(r#"<div class="pro-card"><h3>Key Features</h3><div class="features-grid">"#);
    for (title, desc) in FEATURES {
        let _ = write!(
            body,
            r#"<div class="feature-item"><div class="feature-title">{}</div><div class="feature-desc">{}</div></div>"#,
            title, desc
        );
    }
    body.push_str("</div></div>\n");

    layout("PPE AI Safety Monitoring", &body, None)
}

fn video_mime(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        _ => "video/mp4",
    }
}

fn stats_table(stats: &DetectionStats) -> String {
    if stats.is_empty() {
        return format!(
            r#"<p class="hint">No objects detected in {} frames.</p>"#,
            stats.frames_processed
        );
    }

    let mut html = String::from(
        r#"<table><tr><th>Class</th><th style="text-align:right">Detections</th></tr>"#,
    );
    for (name, count) in stats.sorted() {
        let class = PpeClass::from_label(name);
        let _ = write!(
            html,
            r#"<tr{row}><td><span class="swatch" style="background:{color}"></span> {name}</td><td class="num">{count}</td></tr>"#,
            row = if class.is_violation() { r#" class="violation""# } else { "" },
            color = hex_color(class.color()),
            name = escape(name),
            count = count,
        );
    }
    let _ = write!(
        html,
        r#"</table><p class="hint">{total} detections across {frames} frames ({with} with detections). Violations: {violations}. Counts are summed per frame.</p>"#,
        total = stats.total(),
        frames = stats.frames_processed,
        with = stats.frames_with_detections,
        violations = stats.violations(),
    );
    html
}

pub fn job_page(job: &JobRecord) -> String {
    let mut body = String::new();
    let title = format!("{} - PPE Detection", job.original_filename);
    let message = escape(&job.status_message());

    match job.status {
        JobStatus::Queued | JobStatus::Processing | JobStatus::Encoding => {
            let bar = match job.status {
                JobStatus::Processing if job.progress.total_frames > 0 => format!(
                    r#"<div class="bar" style="width:{}%"></div>"#,
                    job.progress.percent()
                ),
                JobStatus::Queued => r#"<div class="bar" style="width:0%"></div>"#.to_string(),
                _ => r#"<div class="bar indeterminate"></div>"#.to_string(),
            };
            let _ = write!(
                body,
                r#"<div class="pro-card">
<h3>Processing {name}</h3>
<div class="alert info">{message}</div>
<div class="progress">{bar}</div>
<p class="hint">This page refreshes automatically.</p>
</div>"#,
                name = escape(&job.original_filename),
                message = message,
                bar = bar,
            );
            return layout(&title, &body, Some(REFRESH_SECS));
        }
        JobStatus::Failed => {
            let _ = write!(
                body,
                r#"<div class="pro-card">
<h3>{name}</h3>
<div class="alert error">{message}</div>
<a class="btn secondary" href="/">Upload another video</a>
</div>"#,
                name = escape(&job.original_filename),
                message = message,
            );
        }
        JobStatus::Completed => {
            let stats = job.stats.clone().unwrap_or_default();
            let _ = write!(
                body,
                r#"<div class="alert success">{message}</div>
<div class="pro-card">
<h3>Detection Results</h3>
<div class="video-grid">
<div class="video-container"><span class="video-label">Original Video</span>
<video controls preload="metadata" src="/media/{id}/original" type="{original_mime}"></video></div>
<div class="video-container"><span class="video-label">Processed Video</span>
<video controls preload="metadata" src="/media/{id}/processed" type="video/mp4"></video></div>
</div>
<a class="btn" href="/media/{id}/download">Download Processed Video</a>
</div>
<div class="pro-card">
<h3>Detection Counts</h3>
{stats}
</div>
<a class="btn secondary" href="/">Upload another video</a>"#,
                message = message,
                id = job.id,
                original_mime = video_mime(&job.original_filename),
                stats = stats_table(&stats),
            );
        }
    }

    layout(&title, &body, None)
}

pub fn error_page(status: StatusCode, detail: &str) -> String {
    let body = format!(
        r#"<div class="pro-card">
<h3>{code} {reason}</h3>
<div class="alert error">{detail}</div>
<a class="btn secondary" href="/">Back to upload</a>
</div>"#,
        code = status.as_u16(),
        reason = status.canonical_reason().unwrap_or("Error"),
        detail = escape(detail),
    );
    layout("Error - PPE AI Safety Monitoring", &body, None)
}
