//! HTML page handlers.

use axum::extract::{Path, State};
use axum::response::Html;

use super::load_job;
use crate::error::HtmlError;
use crate::state::AppState;
use crate::views::{self, IndexPage};

/// Jobs shown under the upload form.
const RECENT_JOBS: usize = 10;

/// Landing page with the upload form.
///
/// GET /
pub async fn index(State(state): State<AppState>) -> Html<String> {
    let class_names = state.processor.class_names();
    let mut recent_jobs = state.registry.list().await;
    recent_jobs.truncate(RECENT_JOBS);

    Html(views::index_page(&IndexPage {
        class_names: &class_names,
        max_upload_mb: state.config.max_upload_mb(),
        recent_jobs: &recent_jobs,
    }))
}

/// Progress, results or error for one job.
///
/// GET /jobs/:id
pub async fn job_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Html<String>, HtmlError> {
    let job = load_job(&state, &id).await?;
    Ok(Html(views::job_page(&job)))
}
