//! Background refill of the prefetch queue and deferred batch review.
//!
//! Burst generation runs on a bounded worker pool; newly enqueued records
//! accumulate into review batches serviced by one long-lived worker task.
//! Review failures are rescheduled up to three attempts per batch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use driftpage_common::{signature_for_doc, Config, Doc};
use driftpage_llm::engine::GenerationEngine;
use driftpage_llm::review::ReviewService;
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::queue::PrefetchQueue;
use crate::store::SignatureStore;

const MAX_REVIEW_ATTEMPTS: u32 = 3;
const REVIEW_RETRY_COOLDOWN: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct ReviewJob {
    ids: Vec<String>,
    attempt: u32,
}

pub struct Prefetcher {
    queue: Arc<PrefetchQueue>,
    engine: Arc<GenerationEngine>,
    low_water: usize,
    fill_to: usize,
    review_batch: usize,
    max_workers: usize,
    review_tx: mpsc::UnboundedSender<ReviewJob>,
}

impl Prefetcher {
    /// Build the prefetcher and spawn its review worker. Must be called
    /// within a tokio runtime.
    pub fn new(
        queue: Arc<PrefetchQueue>,
        engine: Arc<GenerationEngine>,
        reviewer: Option<Arc<dyn ReviewService>>,
        store: Arc<SignatureStore>,
        config: &Config,
    ) -> Arc<Self> {
        let (review_tx, review_rx) = mpsc::unbounded_channel();
        tokio::spawn(review_worker(
            queue.clone(),
            reviewer,
            store,
            review_rx,
            review_tx.clone(),
        ));
        Arc::new(Self {
            queue,
            engine,
            low_water: config.prefetch_low_water,
            fill_to: config.prefetch_fill_to,
            review_batch: config.prefetch_review_batch.max(1),
            max_workers: config.prefetch_max_workers.max(1),
            review_tx,
        })
    }

    pub fn low_water(&self) -> usize {
        self.low_water
    }

    /// Hand a batch of record ids to the review worker.
    pub fn schedule_review(&self, ids: Vec<String>) {
        if ids.is_empty() {
            return;
        }
        let _ = self.review_tx.send(ReviewJob { ids, attempt: 0 });
    }

    /// Startup fill: generate until the queue holds `desired` documents,
    /// giving up after `max(5, desired*3)` failures.
    pub async fn prewarm(&self, desired: usize) {
        if desired == 0 {
            return;
        }
        let max_failures = 5usize.max(desired * 3);
        let mut failures = 0usize;
        let mut pending: Vec<String> = Vec::new();

        while self.queue.size() < desired && failures < max_failures {
            let mut produced = 0usize;
            let mut stream = self.engine.generate_burst("", None, "prewarm");
            while let Some(doc) = stream.next().await {
                if self.queue.size() >= desired {
                    break;
                }
                match self.queue.enqueue(&doc) {
                    Some(id) => {
                        produced += 1;
                        pending.push(id);
                        if pending.len() >= self.review_batch {
                            self.schedule_review(std::mem::take(&mut pending));
                        }
                    }
                    None => failures += 1,
                }
            }
            if produced == 0 {
                failures += 1;
            }
        }
        self.schedule_review(pending);
        info!(size = self.queue.size(), desired, failures, "Prewarm finished");
    }

    /// Refill the queue to `max(min_fill, FILL_TO)` with up to `max_workers`
    /// burst jobs in flight. Surplus documents from in-flight jobs are
    /// discarded once the target is reached.
    pub async fn top_up(&self, brief: &str, min_fill: usize) {
        let target = min_fill.max(self.fill_to);
        let max_failures = 5usize.max(target * 3);
        let failures = Arc::new(AtomicUsize::new(0));
        let pending: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut jobs: JoinSet<()> = JoinSet::new();

        loop {
            let size = self.queue.size();
            if size >= target && size > self.low_water {
                break;
            }
            if failures.load(Ordering::Relaxed) >= max_failures {
                warn!(target, "Top-up giving up after repeated failures");
                break;
            }

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };

            let queue = self.queue.clone();
            let engine = self.engine.clone();
            let brief = brief.to_string();
            let failures_for_job = failures.clone();
            let pending = pending.clone();
            let review_batch = self.review_batch;
            let tx = self.review_tx.clone();

            jobs.spawn(async move {
                let _permit = permit;
                let mut produced = 0usize;
                let mut stream = engine.generate_burst(&brief, None, "topup");
                while let Some(doc) = stream.next().await {
                    if queue.size() >= target {
                        debug!("queue at target, discarding surplus burst doc");
                        break;
                    }
                    if let Some(id) = queue.enqueue(&doc) {
                        produced += 1;
                        let batch = {
                            let mut pending = pending.lock().await;
                            pending.push(id);
                            if pending.len() >= review_batch {
                                Some(std::mem::take(&mut *pending))
                            } else {
                                None
                            }
                        };
                        if let Some(ids) = batch {
                            let _ = tx.send(ReviewJob { ids, attempt: 0 });
                        }
                    }
                }
                if produced == 0 {
                    failures_for_job.fetch_add(1, Ordering::Relaxed);
                }
            });

            // Reap whatever already finished so job errors surface early.
            while let Some(result) = jobs.try_join_next() {
                if let Err(e) = result {
                    warn!(error = %e, "Top-up worker panicked");
                    failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        while let Some(result) = jobs.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Top-up worker panicked");
            }
        }

        let rest = std::mem::take(&mut *pending.lock().await);
        self.schedule_review(rest);
        info!(size = self.queue.size(), target, "Top-up finished");
    }
}

/// Single consumer of the review queue: loads each batch, reviews it, and
/// applies verdicts. Unreviewable batches retry with a cool-down.
async fn review_worker(
    queue: Arc<PrefetchQueue>,
    reviewer: Option<Arc<dyn ReviewService>>,
    store: Arc<SignatureStore>,
    mut rx: mpsc::UnboundedReceiver<ReviewJob>,
    tx: mpsc::UnboundedSender<ReviewJob>,
) {
    while let Some(job) = rx.recv().await {
        let retry = review_queued(&queue, reviewer.as_deref(), &store, &job.ids).await;
        if retry.is_empty() {
            continue;
        }
        if job.attempt + 1 >= MAX_REVIEW_ATTEMPTS {
            warn!(
                count = retry.len(),
                "Abandoning review batch after {MAX_REVIEW_ATTEMPTS} attempts"
            );
            continue;
        }
        tokio::time::sleep(REVIEW_RETRY_COOLDOWN).await;
        let _ = tx.send(ReviewJob {
            ids: retry,
            attempt: job.attempt + 1,
        });
    }
}

/// Review the given queued records in one batch. Rejected records are
/// deleted, corrected ones overwritten (with the review attached and the new
/// signature recorded). Returns the ids that could not be reviewed.
pub async fn review_queued(
    queue: &PrefetchQueue,
    reviewer: Option<&dyn ReviewService>,
    store: &SignatureStore,
    ids: &[String],
) -> Vec<String> {
    let mut loaded: Vec<(String, Doc)> = Vec::new();
    for id in ids {
        if !queue.record_exists(id) {
            // Already served or taken; nothing to review.
            continue;
        }
        match queue.load_record(id) {
            Some(doc) => loaded.push((id.clone(), doc)),
            None => {
                warn!(id, "Dropping unparseable queued record");
                queue.remove_record(id);
            }
        }
    }
    if loaded.is_empty() {
        return Vec::new();
    }
    let Some(reviewer) = reviewer else {
        return Vec::new();
    };

    let docs: Vec<Doc> = loaded.iter().map(|(_, d)| d.clone()).collect();
    let records = reviewer.review_batch(&docs).await;

    let mut retry = Vec::new();
    for ((id, doc), record) in loaded.into_iter().zip(records) {
        let Some(mut record) = record else {
            retry.push(id);
            continue;
        };
        if !record.ok {
            info!(id, "Removing queued record rejected by review");
            queue.remove_record(&id);
            continue;
        }
        if let Some(corrected) = record.doc.take() {
            let mut corrected = *corrected;
            corrected.created_at = doc.created_at;
            corrected.review = Some(record);
            store.add(&signature_for_doc(&corrected));
            queue.overwrite_record(&id, &corrected);
        }
    }
    retry
}
