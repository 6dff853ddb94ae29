//! The asynchronous job subsystem: a bounded queue, a fixed worker pool, and
//! per-`(document, page)` re-OCR with cooperative cancellation
//! (`SPEC_FULL.md` §4.3).
//!
//! Grounded on `queues/work.rs`'s `WorkQueue`/`WorkItemProcessor` shape — a
//! bounded `mpsc` channel plus a pool of receivers draining it — generalized
//! so the work item is `(document_id, CancellationToken)` and the processor
//! is `ocr::pipeline::Pipeline`, checking `token.is_cancelled()` at the page
//! boundary §4.3.1 calls for instead of running every item to completion.

pub mod store;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::dms::DmsClient;
use crate::error::CoreError;
use crate::history::HistoryStore;
use crate::model::{Job, OcrPageResult};
use crate::ocr::backend::{OcrBackend, OcrBackendKind, OcrPageInput};
use crate::ocr::cache::PageCache;
use crate::ocr::pipeline::{OcrOptions, Pipeline};
use crate::prelude::*;
use store::JobStore;

/// Queue capacity, per §4.3: a full channel makes `submit` block (the
/// submitter is backpressured, not rejected).
const CHANNEL_CAPACITY: usize = 100;

struct QueuedJob {
    job_id: Uuid,
    document_id: i64,
    cancel: CancellationToken,
}

/// Shared, `'static`-owned context every worker needs to run a pipeline.
/// Cloning is cheap: every field is an `Arc` or an internally-`Arc`'d handle.
#[derive(Clone)]
struct WorkerContext {
    dms: Arc<dyn DmsClient>,
    backend: Arc<OcrBackendKind>,
    history: HistoryStore,
    cache_root: Arc<Path>,
    ocr_complete_tag: Arc<str>,
    default_options: OcrOptions,
}

/// A bounded job queue backed by a fixed worker pool, plus a side table of
/// per-`(document_id, page_index)` cancellation handles for targeted re-OCR.
pub struct JobQueue {
    tx: mpsc::Sender<QueuedJob>,
    store: JobStore,
    job_cancel_handles: Arc<AsyncMutex<HashMap<Uuid, CancellationToken>>>,
    reocr_cancel_handles: Arc<AsyncMutex<HashMap<(i64, usize), CancellationToken>>>,
    context: WorkerContext,
}

impl JobQueue {
    /// Spawn `worker_count` workers (default 1) consuming the bounded queue.
    pub fn new(
        worker_count: usize,
        dms: Arc<dyn DmsClient>,
        backend: Arc<OcrBackendKind>,
        history: HistoryStore,
        cache_root: impl Into<Arc<Path>>,
        ocr_complete_tag: impl Into<Arc<str>>,
        default_options: OcrOptions,
    ) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let rx = Arc::new(AsyncMutex::new(rx));
        let context = WorkerContext {
            dms,
            backend,
            history,
            cache_root: cache_root.into(),
            ocr_complete_tag: ocr_complete_tag.into(),
            default_options,
        };
        let store = JobStore::new();

        for worker_id in 0..worker_count.max(1) {
            let rx = rx.clone();
            let store = store.clone();
            let context = context.clone();
            tokio::spawn(async move { worker_loop(worker_id, rx, store, context).await });
        }

        Self {
            tx,
            store,
            job_cancel_handles: Arc::new(AsyncMutex::new(HashMap::new())),
            reocr_cancel_handles: Arc::new(AsyncMutex::new(HashMap::new())),
            context,
        }
    }

    /// Enqueue a job for `document_id`, blocking if the channel is full.
    pub async fn submit(&self, document_id: i64) -> Result<Uuid> {
        let job = Job::new(document_id);
        let job_id = job.id;
        let cancel = CancellationToken::new();
        self.store.insert(job).await;
        self.job_cancel_handles.lock().await.insert(job_id, cancel.clone());
        self.tx
            .send(QueuedJob { job_id, document_id, cancel })
            .await
            .map_err(|_| anyhow!("job queue is no longer accepting work"))?;
        Ok(job_id)
    }

    pub async fn status(&self, job_id: Uuid) -> Option<Job> {
        self.store.get(job_id).await
    }

    /// Newest first.
    pub async fn list(&self) -> Vec<Job> {
        self.store.list().await
    }

    /// Trip the job's cancellation token. Cooperative: the pipeline observes
    /// it at the next page boundary.
    pub async fn cancel(&self, job_id: Uuid) {
        if let Some(token) = self.job_cancel_handles.lock().await.get(&job_id) {
            token.cancel();
        }
    }

    /// Re-run OCR for a single cached page, cancelling any re-OCR already in
    /// flight for the same `(document_id, page_index)` key first.
    pub async fn reocr_page(&self, document_id: i64, page_index: usize) -> Result<String> {
        let key = (document_id, page_index);
        let token = {
            let mut handles = self.reocr_cancel_handles.lock().await;
            if let Some(existing) = handles.remove(&key) {
                existing.cancel();
            }
            let token = CancellationToken::new();
            handles.insert(key, token.clone());
            token
        };

        let cache = PageCache::new(self.context.cache_root.as_ref(), document_id);
        let page = cache.load_one(page_index).await?;
        let input = OcrPageInput {
            page_number: page_index + 1,
            mime_type: page.mime_type,
            data: page.data,
        };

        let result = if token.is_cancelled() {
            return Err(anyhow!("re-OCR of document {document_id} page {page_index} was superseded"));
        } else {
            self.context
                .backend
                .process_image(input)
                .await
                .map_err(|source| CoreError::BackendError { page: page_index + 1, source })?
        };

        self.context
            .history
            .store_page_result(&OcrPageResult {
                document_id,
                page_index,
                text: result.text.clone(),
                limit_hit: result.limit_hit,
                generation_info: result.generation_info,
            })
            .await?;

        self.reocr_cancel_handles.lock().await.remove(&key);
        Ok(result.text)
    }
}

async fn worker_loop(
    _worker_id: usize,
    rx: Arc<AsyncMutex<mpsc::Receiver<QueuedJob>>>,
    store: JobStore,
    context: WorkerContext,
) {
    loop {
        let queued = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(queued) = queued else {
            break;
        };

        store.mark_in_progress(queued.job_id).await;
        let pipeline = Pipeline {
            dms: context.dms.as_ref(),
            backend: context.backend.as_ref(),
            history: &context.history,
            cache_root: context.cache_root.as_ref(),
            ocr_complete_tag: context.ocr_complete_tag.as_ref(),
        };

        let store_for_progress = store.clone();
        let job_id = queued.job_id;
        let progress = move |done: usize, total: usize| {
            let store = store_for_progress.clone();
            tokio::spawn(async move { store.set_progress(job_id, done, total).await });
        };

        match pipeline
            .run(queued.document_id, &context.default_options, Some(&queued.cancel), Some(&progress))
            .await
        {
            Ok(result) => store.complete(queued.job_id, &result).await,
            Err(err) => match err.downcast::<crate::ocr::pipeline::Cancelled>() {
                Ok(cancelled) => store.cancelled(queued.job_id, &cancelled.partial).await,
                Err(err) => store.fail(queued.job_id, err.to_string()).await,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dms::memory::InMemoryDmsClient;
    use crate::llm::fake::FakeLlmBackend;
    use crate::model::{Document, JobStatus};
    use crate::ocr::backends::vision_llm::VisionLlmBackend;
    use crate::prompt::parse_prompt;

    fn sample_document(id: i64) -> Document {
        Document {
            id,
            title: "Invoice".to_string(),
            content: "already extracted".to_string(),
            tags: vec!["OCR-complete".to_string()],
            correspondent: None,
            document_type: None,
            created_date: None,
            original_file_name: "invoice.pdf".to_string(),
            custom_fields: Vec::new(),
        }
    }

    #[tokio::test]
    async fn submitted_job_short_circuits_and_completes() {
        let dms = Arc::new(InMemoryDmsClient::new());
        dms.insert_document(sample_document(1)).await;
        let history = HistoryStore::connect_in_memory().await.unwrap();
        let prompt = parse_prompt(r#"[[messages]]
user = "transcribe {{ImageUrl}}"
"#)
        .unwrap();
        let backend = Arc::new(OcrBackendKind::VisionLlm(VisionLlmBackend::new(
            Arc::new(FakeLlmBackend::new()),
            prompt,
        )));
        let tmp = tempfile::tempdir().unwrap();

        let queue = JobQueue::new(
            1,
            dms,
            backend,
            history,
            Arc::from(tmp.path()),
            Arc::from("OCR-complete"),
            OcrOptions {
                upload_pdf: false,
                replace_original: false,
                copy_metadata: false,
                limit_pages: 0,
                process_mode: crate::ocr::ProcessMode::WholePdf,
                pdf_skip_existing_ocr: false,
            },
        );

        let job_id = queue.submit(1).await.unwrap();
        let mut job = queue.status(job_id).await.unwrap();
        for _ in 0..50 {
            if job.status.is_terminal() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            job = queue.status(job_id).await.unwrap();
        }
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result_text.as_deref(), Some("already extracted"));
    }
}
