//! Router tests against an in-memory registry and a stub detector.

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use image::RgbImage;
use ppe_api::{create_router, ApiConfig, AppState};
use ppe_media::{Annotator, Detection, FrameDetector, MediaResult};
use ppe_models::{DetectionStats, JobId, JobPaths, JobRecord, JobStatus};
use ppe_worker::{JobExecutor, JobHandler, JobRegistry, VideoProcessor, WorkerConfig};
use tempfile::TempDir;
use tokio::sync::watch;
use tower::ServiceExt;

const BOUNDARY: &str = "ppe-test-boundary";

struct StubDetector(Vec<String>);

impl FrameDetector for StubDetector {
    fn detect(&self, _frame: &RgbImage) -> MediaResult<Vec<Detection>> {
        Ok(Vec::new())
    }

    fn class_names(&self) -> &[String] {
        &self.0
    }
}

/// Accepts jobs and leaves them queued.
struct Idle;

impl JobHandler for Idle {
    async fn handle(self: Arc<Self>, _job_id: JobId, _cancel: watch::Receiver<bool>) {}

    async fn discard(self: Arc<Self>, _job_id: JobId) {}
}

struct Harness {
    dir: TempDir,
    state: AppState,
    app: Router,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(ApiConfig::default())
    }

    fn with_config(config: ApiConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let worker_config = WorkerConfig {
            upload_dir: dir.path().join("uploads"),
            output_dir: dir.path().join("outputs"),
            ..Default::default()
        };

        let processor = Arc::new(VideoProcessor::with_detector(
            worker_config.clone(),
            JobRegistry::new(),
            Arc::new(StubDetector(vec![
                "Hardhat".to_string(),
                "NO-Hardhat".to_string(),
                "Person".to_string(),
            ])),
            Annotator::boxes_only(),
        ));
        let (executor, _handle) = JobExecutor::start(Arc::new(Idle), &worker_config);

        let state = AppState::new(config, processor, executor);
        let app = create_router(state.clone(), None);
        Self { dir, state, app }
    }

    fn upload_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("uploads")
    }

    async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    /// Register a job with real files in the temp dir.
    async fn insert_job(&self, name: &str) -> JobRecord {
        let id = JobId::new();
        let config = self.state.worker_config();
        let paths = JobPaths::for_job(&id, &config.upload_dir, &config.output_dir, "mp4");
        tokio::fs::create_dir_all(&config.upload_dir).await.unwrap();
        tokio::fs::create_dir_all(&config.output_dir).await.unwrap();
        tokio::fs::write(&paths.input, b"original-bytes").await.unwrap();

        let record = JobRecord::new(id, name, paths);
        self.state.registry.insert(record.clone()).await;
        record
    }

    async fn complete_job(&self, job: &JobRecord, output: &[u8]) {
        let paths = job.paths.as_ref().unwrap();
        tokio::fs::write(&paths.final_output, output).await.unwrap();

        let mut stats = DetectionStats::default();
        stats.record_frame(["Person", "NO-Hardhat"]);
        stats.record_frame(["Person", "Hardhat"]);
        self.state
            .registry
            .update(&job.id, |record| record.complete(stats))
            .await
            .unwrap();
    }
}

fn multipart_body(field: &str, filename: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(field: &str, filename: &str, content: &[u8], json: bool) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/jobs")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        );
    if json {
        builder = builder.header(header::ACCEPT, "application/json");
    } else {
        builder = builder.header(header::ACCEPT, "text/html");
    }
    builder
        .body(Body::from(multipart_body(field, filename, content)))
        .unwrap()
}

async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

fn dir_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

#[tokio::test]
async fn test_health_endpoint() {
    let harness = Harness::new();
    for uri in ["/health", "/healthz"] {
        let response = harness.get(uri).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "healthy");
    }
}

#[tokio::test]
async fn test_security_headers_and_request_id() {
    let harness = Harness::new();
    let response = harness
        .send(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "req-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert_eq!(response.headers()["x-frame-options"], "DENY");
    assert_eq!(response.headers()["x-request-id"], "req-123");
}

#[tokio::test]
async fn test_metrics_route_absent_without_handle() {
    let harness = Harness::new();
    let response = harness.get("/metrics").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_index_page() {
    let harness = Harness::new();
    let response = harness.get("/").await;
    assert_eq!(response.status(), StatusCode::OK);

    let html = body_text(response).await;
    assert!(html.contains("PPE AI Safety Monitoring"));
    assert!(html.contains("Start PPE Detection"));
    assert!(html.contains(r#"name="video""#));
    assert!(html.contains("<strong>NO-Hardhat</strong>"));
    assert!(html.contains("3 Categories"));
}

#[tokio::test]
async fn test_upload_json_queues_job() {
    let harness = Harness::new();
    let response = harness
        .send(upload_request("video", "site.MP4", b"not really a video", true))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let json = body_json(response).await;
    let job_id = JobId::parse(json["job_id"].as_str().unwrap()).unwrap();
    assert_eq!(json["status_url"], format!("/api/jobs/{}", job_id));

    let job = harness.state.registry.get(&job_id).await.unwrap();
    assert_eq!(job.original_filename, "site.MP4");
    assert_eq!(job.status, JobStatus::Queued);

    let input = &job.paths.as_ref().unwrap().input;
    assert!(input.to_string_lossy().ends_with(&format!("{}.mp4", job_id)));
    assert_eq!(tokio::fs::read(input).await.unwrap(), b"not really a video");
    // No partial file left behind
    assert_eq!(dir_entries(&harness.upload_dir()), 1);
}

#[tokio::test]
async fn test_upload_browser_redirects_to_job_page() {
    let harness = Harness::new();
    let response = harness
        .send(upload_request("video", "yard.mov", b"bytes", false))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let location = response.headers()[header::LOCATION].to_str().unwrap();
    let id = location.strip_prefix("/jobs/").unwrap();
    assert!(JobId::parse(id).is_some());
    assert_eq!(harness.state.registry.len().await, 1);
}

#[tokio::test]
async fn test_upload_rejects_unsupported_extension() {
    let harness = Harness::new();
    let response = harness
        .send(upload_request("video", "notes.txt", b"hello", true))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert!(json["detail"].as_str().unwrap().contains("Unsupported file type"));
    assert!(harness.state.registry.is_empty().await);
    assert_eq!(dir_entries(&harness.upload_dir()), 0);
}

#[tokio::test]
async fn test_upload_rejects_empty_file() {
    let harness = Harness::new();
    let response = harness
        .send(upload_request("video", "site.mp4", b"", true))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["detail"]
        .as_str()
        .unwrap()
        .contains("empty"));
    assert!(harness.state.registry.is_empty().await);
    assert_eq!(dir_entries(&harness.upload_dir()), 0);
}

#[tokio::test]
async fn test_upload_requires_video_field() {
    let harness = Harness::new();
    let response = harness
        .send(upload_request("attachment", "site.mp4", b"bytes", true))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(harness.state.registry.is_empty().await);
}

#[tokio::test]
async fn test_upload_error_renders_html_for_browsers() {
    let harness = Harness::new();
    let response = harness
        .send(upload_request("video", "notes.txt", b"hello", false))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let html = body_text(response).await;
    assert!(html.contains("400 Bad Request"));
    assert!(html.contains("Unsupported file type"));
}

#[tokio::test]
async fn test_upload_over_limit() {
    let harness = Harness::with_config(ApiConfig {
        max_upload_bytes: 8,
        ..Default::default()
    });
    let response = harness
        .send(upload_request("video", "site.mp4", b"0123456789abcdef", true))
        .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(harness.state.registry.is_empty().await);
    assert_eq!(dir_entries(&harness.upload_dir()), 0);
}

#[tokio::test]
async fn test_get_job_validates_id() {
    let harness = Harness::new();

    let response = harness.get("/api/jobs/not-a-uuid").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = harness.get(&format!("/api/jobs/{}", JobId::new())).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(body_json(response).await["detail"].is_string());
}

#[tokio::test]
async fn test_job_status_json() {
    let harness = Harness::new();
    let job = harness.insert_job("site.mp4").await;
    harness
        .state
        .registry
        .update(&job.id, |record| {
            record.set_status(JobStatus::Processing);
            record.set_progress(30, 120);
        })
        .await;

    let response = harness.get(&format!("/api/jobs/{}", job.id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "processing");
    assert_eq!(json["progress"]["percent"], 25);
    assert_eq!(json["message"], "Processing frame 30 of 120");
    assert!(json.get("media").is_none());

    let list = body_json(harness.get("/api/jobs").await).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_job_page_states() {
    let harness = Harness::new();
    let job = harness.insert_job("site.mp4").await;

    let html = body_text(harness.get(&format!("/jobs/{}", job.id)).await).await;
    assert!(html.contains(r#"http-equiv="refresh""#));

    harness.complete_job(&job, b"processed").await;
    let html = body_text(harness.get(&format!("/jobs/{}", job.id)).await).await;
    assert!(html.contains("Detection completed successfully!"));
    assert!(html.contains(&format!("/media/{}/original", job.id)));
    assert!(html.contains(&format!("/media/{}/processed", job.id)));
    assert!(html.contains("Download Processed Video"));

    let response = harness.get(&format!("/jobs/{}", JobId::new())).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(body_text(response).await.contains("404 Not Found"));
}

#[tokio::test]
async fn test_failed_job_page() {
    let harness = Harness::new();
    let job = harness.insert_job("site.mp4").await;
    harness
        .state
        .registry
        .update(&job.id, |record| record.fail("Invalid video file: no frames"))
        .await;

    let html = body_text(harness.get(&format!("/jobs/{}", job.id)).await).await;
    assert!(html.contains("An error occurred during processing: Invalid video file: no frames"));

    let response = harness.get(&format!("/media/{}/processed", job.id)).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_media_before_completion() {
    let harness = Harness::new();
    let job = harness.insert_job("site.mp4").await;

    for kind in ["processed", "download"] {
        let response = harness.get(&format!("/media/{}/{}", job.id, kind)).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    // The upload itself is playable right away
    let response = harness.get(&format!("/media/{}/original", job.id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"original-bytes");
}

#[tokio::test]
async fn test_processed_video_supports_range() {
    let harness = Harness::new();
    let job = harness.insert_job("site.mp4").await;
    harness.complete_job(&job, b"0123456789").await;

    let response = harness.get(&format!("/media/{}/processed", job.id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");

    let response = harness
        .send(
            Request::builder()
                .uri(format!("/media/{}/processed", job.id))
                .header(header::RANGE, "bytes=2-5")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 2-5/10");
    assert_eq!(body_bytes(response).await, b"2345");
}

#[tokio::test]
async fn test_download_sets_attachment_name() {
    let harness = Harness::new();
    let job = harness.insert_job("site.mp4").await;
    harness.complete_job(&job, b"processed").await;

    let response = harness.get(&format!("/media/{}/download", job.id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"ppe_detection_output.mp4\""
    );
    assert_eq!(body_bytes(response).await, b"processed");
}

#[tokio::test]
async fn test_delete_job() {
    let harness = Harness::new();
    let job = harness.insert_job("site.mp4").await;
    let delete = |id: &JobId| {
        Request::builder()
            .method("DELETE")
            .uri(format!("/api/jobs/{}", id))
            .body(Body::empty())
            .unwrap()
    };

    let response = harness.send(delete(&job.id)).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    harness.complete_job(&job, b"processed").await;
    let response = harness.send(delete(&job.id)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let paths = job.paths.as_ref().unwrap();
    assert!(!paths.input.exists());
    assert!(!paths.final_output.exists());
    assert!(harness.state.registry.get(&job.id).await.is_none());
}

#[tokio::test]
async fn test_ready_reports_model_and_executor() {
    let harness = Harness::new();
    let response = harness.get("/ready").await;

    // ffmpeg may be missing on the test host; the other checks are ours
    let status = response.status();
    assert!(status == StatusCode::OK || status == StatusCode::SERVICE_UNAVAILABLE);
    let json = body_json(response).await;
    assert_eq!(json["checks"]["model"]["status"], "ok");
    assert_eq!(json["checks"]["executor"]["status"], "ok");
    assert!(json["checks"]["model"]["detail"]
        .as_str()
        .unwrap()
        .contains("3 classes"));
}

#[tokio::test]
async fn test_upload_rate_limited_per_ip() {
    let harness = Harness::with_config(ApiConfig {
        rate_limit_rps: 1,
        rate_limit_burst: 1,
        ..Default::default()
    });

    let request = |ip: &str| {
        let mut request = upload_request("video", "site.mp4", b"bytes", true);
        request
            .headers_mut()
            .insert("x-forwarded-for", ip.parse().unwrap());
        request
    };

    assert_eq!(harness.send(request("203.0.113.9")).await.status(), StatusCode::ACCEPTED);
    assert_eq!(
        harness.send(request("203.0.113.9")).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(harness.send(request("203.0.113.10")).await.status(), StatusCode::ACCEPTED);
}
