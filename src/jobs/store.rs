//! In-memory job records, keyed by id. Grounded on `dms::memory`'s
//! `RwLock<HashMap<..>>`-guarded fake, the same shape this module needs for
//! a process-local job table.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::model::{Job, JobStatus, ProcessedDocument};
use crate::prelude::*;

#[derive(Clone, Default)]
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<uuid::Uuid, Job>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, job: Job) {
        self.jobs.write().await.insert(job.id, job);
    }

    pub async fn get(&self, id: uuid::Uuid) -> Option<Job> {
        self.jobs.read().await.get(&id).cloned()
    }

    /// Newest first.
    pub async fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub async fn mark_in_progress(&self, id: uuid::Uuid) {
        self.update(id, |job| job.status = JobStatus::InProgress).await;
    }

    pub async fn set_progress(&self, id: uuid::Uuid, pages_done: usize, total_pages: usize) {
        self.update(id, |job| {
            job.pages_done = pages_done;
            job.total_pages = total_pages;
        })
        .await;
    }

    pub async fn complete(&self, id: uuid::Uuid, result: &ProcessedDocument) {
        self.update(id, |job| {
            job.status = JobStatus::Completed;
            job.pages_done = result.processed_pages;
            job.total_pages = result.total_pages;
            job.result_text = Some(result.text.clone());
        })
        .await;
    }

    pub async fn cancelled(&self, id: uuid::Uuid, partial: &ProcessedDocument) {
        self.update(id, |job| {
            job.status = JobStatus::Cancelled;
            job.pages_done = partial.processed_pages;
            job.total_pages = partial.total_pages;
            job.result_text = Some(partial.text.clone());
        })
        .await;
    }

    pub async fn fail(&self, id: uuid::Uuid, message: String) {
        self.update(id, |job| {
            job.status = JobStatus::Failed;
            job.error_message = Some(message);
        })
        .await;
    }

    async fn update(&self, id: uuid::Uuid, f: impl FnOnce(&mut Job)) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(&id) {
            f(job);
            job.updated_at = Utc::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_is_newest_first() {
        let store = JobStore::new();
        let first = Job::new(1);
        let mut second = Job::new(2);
        second.created_at = first.created_at + chrono::Duration::seconds(1);
        store.insert(first.clone()).await;
        store.insert(second.clone()).await;

        let listed = store.list().await;
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
    }

    #[tokio::test]
    async fn terminal_transitions_record_results() {
        let store = JobStore::new();
        let job = Job::new(1);
        store.insert(job.clone()).await;

        store.mark_in_progress(job.id).await;
        assert_eq!(store.get(job.id).await.unwrap().status, JobStatus::InProgress);

        store.set_progress(job.id, 2, 5).await;
        assert_eq!(store.get(job.id).await.unwrap().pages_done, 2);

        store
            .complete(
                job.id,
                &ProcessedDocument {
                    text: "done".to_string(),
                    processed_pages: 5,
                    total_pages: 5,
                    ..Default::default()
                },
            )
            .await;
        let completed = store.get(job.id).await.unwrap();
        assert_eq!(completed.status, JobStatus::Completed);
        assert_eq!(completed.result_text.as_deref(), Some("done"));
    }
}
