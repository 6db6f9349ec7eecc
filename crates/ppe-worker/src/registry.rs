//! In-memory job registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ppe_models::{JobId, JobRecord};
use tokio::sync::RwLock;

/// Shared map of job id to job record.
///
/// Cheap to clone; all clones see the same jobs.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<JobId, JobRecord>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: JobRecord) {
        self.jobs.write().await.insert(record.id.clone(), record);
    }

    pub async fn get(&self, id: &JobId) -> Option<JobRecord> {
        self.jobs.read().await.get(id).cloned()
    }

    /// All jobs, newest first.
    pub async fn list(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<JobRecord> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    /// Apply `f` to a job and return the updated record.
    pub async fn update<F>(&self, id: &JobId, f: F) -> Option<JobRecord>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut jobs = self.jobs.write().await;
        let record = jobs.get_mut(id)?;
        f(record);
        Some(record.clone())
    }

    /// Record frame progress from a blocking thread.
    ///
    /// Must not be called from inside the async runtime.
    pub fn set_progress_blocking(&self, id: &JobId, frames_processed: u64, total_frames: u64) {
        if let Some(record) = self.jobs.blocking_write().get_mut(id) {
            record.set_progress(frames_processed, total_frames);
        }
    }

    pub async fn remove(&self, id: &JobId) -> Option<JobRecord> {
        self.jobs.write().await.remove(id)
    }

    /// Finished jobs last touched more than `older_than` ago.
    pub async fn expired(&self, older_than: Duration) -> Vec<JobRecord> {
        let Ok(age) = chrono::Duration::from_std(older_than) else {
            return Vec::new();
        };
        let cutoff = Utc::now() - age;
        self.jobs
            .read()
            .await
            .values()
            .filter(|job| job.is_terminal() && job.updated_at < cutoff)
            .cloned()
            .collect()
    }

    /// Jobs that are queued or running.
    pub async fn active_count(&self) -> usize {
        self.jobs
            .read()
            .await
            .values()
            .filter(|job| !job.is_terminal())
            .count()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ppe_models::{DetectionStats, JobPaths, JobStatus};

    fn record() -> JobRecord {
        let id = JobId::new();
        let paths = JobPaths::for_job(&id, "uploads", "outputs", "mp4");
        JobRecord::new(id, "site.mp4", paths)
    }

    #[tokio::test]
    async fn test_insert_get_remove() {
        let registry = JobRegistry::new();
        let job = record();
        let id = job.id.clone();

        registry.insert(job).await;
        assert_eq!(registry.get(&id).await.unwrap().status, JobStatus::Queued);
        assert_eq!(registry.active_count().await, 1);

        assert!(registry.remove(&id).await.is_some());
        assert!(registry.get(&id).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_update_returns_snapshot() {
        let registry = JobRegistry::new();
        let job = record();
        let id = job.id.clone();
        registry.insert(job).await;

        let updated = registry
            .update(&id, |job| job.set_status(JobStatus::Processing))
            .await
            .unwrap();
        assert_eq!(updated.status, JobStatus::Processing);
        assert!(registry.update(&JobId::new(), |_| {}).await.is_none());
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let registry = JobRegistry::new();
        let mut older = record();
        older.created_at = Utc::now() - chrono::Duration::minutes(5);
        let older_id = older.id.clone();
        let newer = record();
        let newer_id = newer.id.clone();

        registry.insert(older).await;
        registry.insert(newer).await;

        let ids: Vec<JobId> = registry.list().await.into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![newer_id, older_id]);
    }

    #[tokio::test]
    async fn test_expired_only_terminal() {
        let registry = JobRegistry::new();

        let mut done = record();
        done.complete(DetectionStats::default());
        done.updated_at = Utc::now() - chrono::Duration::hours(2);
        let done_id = done.id.clone();

        let mut running = record();
        running.set_status(JobStatus::Processing);
        running.updated_at = Utc::now() - chrono::Duration::hours(2);

        registry.insert(done).await;
        registry.insert(running).await;

        let expired = registry.expired(Duration::from_secs(3600)).await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, done_id);
    }

    #[tokio::test]
    async fn test_progress_from_blocking_thread() {
        let registry = JobRegistry::new();
        let job = record();
        let id = job.id.clone();
        registry.insert(job).await;

        let r = registry.clone();
        let i = id.clone();
        tokio::task::spawn_blocking(move || r.set_progress_blocking(&i, 5, 10))
            .await
            .unwrap();

        assert_eq!(registry.get(&id).await.unwrap().progress.percent(), 50);
    }
}
