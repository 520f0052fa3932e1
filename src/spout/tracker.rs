//! Failure tracking and the retry queue.
//!
//! A message id is either absent, pending retry (mapped and queued) or in
//! flight (mapped, already re-emitted). The map is the dedup index: at most
//! one `TrackedMessage` per id. The queue is multi-producer (failures) and
//! single-consumer (the drain loop). A queued record whose id no longer maps
//! to that same record has been acked or abandoned and is skipped on pop.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, OnceCell, mpsc, watch};
use tracing::debug;

use crate::message::{MessageRecord, MessageStat};
use crate::utils::error::ClientError;

/// A failed message and its retry statistics.
///
/// The message itself is filled in by the first fetch from the broker; every
/// caller racing on the same record shares that one fetch.
#[derive(Debug)]
pub struct TrackedMessage {
    msg_id: String,
    message: OnceCell<Arc<MessageRecord>>,
    stat: Arc<MessageStat>,
}

impl TrackedMessage {
    fn new(msg_id: &str) -> Self {
        Self {
            msg_id: msg_id.to_string(),
            message: OnceCell::new(),
            stat: Arc::new(MessageStat::new()),
        }
    }

    pub fn msg_id(&self) -> &str {
        &self.msg_id
    }

    /// `None` until the broker fetch has completed.
    pub fn message(&self) -> Option<&Arc<MessageRecord>> {
        self.message.get()
    }

    pub fn stat(&self) -> &Arc<MessageStat> {
        &self.stat
    }

    async fn load<F, Fut>(&self, fetch: F) -> Result<&Arc<MessageRecord>, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<MessageRecord, ClientError>>,
    {
        self.message
            .get_or_try_init(move || async move { fetch().await.map(Arc::new) })
            .await
    }
}

/// What a failure report did to the tracked state.
#[derive(Debug)]
pub enum FailureOutcome {
    /// First failure: record created with a zero count and queued.
    Tracked,
    Requeued { failure_times: i32 },
    /// Ceiling reached: record dropped as if acked.
    Abandoned { failure_times: i32 },
    /// The broker fetch failed; the id stays untracked.
    FetchFailed(ClientError),
    /// The record was acked or abandoned while this report was in progress.
    Released,
}

#[derive(Debug)]
pub struct FailureTracker {
    max_fail_times: i32,
    failures: DashMap<String, Arc<TrackedMessage>>,
    retry_tx: mpsc::UnboundedSender<Arc<TrackedMessage>>,
    retry_rx: Mutex<mpsc::UnboundedReceiver<Arc<TrackedMessage>>>,
    queued: AtomicUsize,
}

impl FailureTracker {
    /// `max_fail_times < 0` retries forever.
    pub fn new(max_fail_times: i32) -> Self {
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        Self {
            max_fail_times,
            failures: DashMap::new(),
            retry_tx,
            retry_rx: Mutex::new(retry_rx),
            queued: AtomicUsize::new(0),
        }
    }

    pub fn max_fail_times(&self) -> i32 {
        self.max_fail_times
    }

    /// Stops tracking `msg_id`. Unknown ids are ignored.
    pub fn ack(&self, msg_id: &str) -> bool {
        self.failures.remove(msg_id).is_some()
    }

    /// Records a failure of `msg_id`, fetching the message through `fetch`
    /// the first time the id is seen. No map lock is held while fetching.
    pub async fn fail<F, Fut>(&self, msg_id: &str, fetch: F) -> FailureOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<MessageRecord, ClientError>>,
    {
        let (record, first) = match self.failures.entry(msg_id.to_string()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let record = Arc::new(TrackedMessage::new(msg_id));
                entry.insert(record.clone());
                (record, true)
            }
        };

        // A caller waiting on another caller's fetch runs its own closure when
        // that fetch fails. By then the record has been released, so skip the
        // round-trip and drop the report.
        let tracked = &record;
        let loaded = record
            .load(move || async move {
                if self.is_current(tracked) {
                    fetch().await
                } else {
                    Err(ClientError::InvalidState(format!(
                        "{msg_id} released before fetch"
                    )))
                }
            })
            .await;
        if let Err(err) = loaded {
            if !self.is_current(&record) {
                return FailureOutcome::Released;
            }
            self.release(&record);
            return FailureOutcome::FetchFailed(err);
        }

        if first {
            if !self.is_current(&record) {
                return FailureOutcome::Released;
            }
            self.enqueue(record);
            return FailureOutcome::Tracked;
        }

        let failure_times = record.stat.record_failure();
        if !self.is_current(&record) {
            return FailureOutcome::Released;
        }
        if self.max_fail_times < 0 || failure_times < self.max_fail_times {
            self.enqueue(record);
            FailureOutcome::Requeued { failure_times }
        } else {
            self.release(&record);
            FailureOutcome::Abandoned { failure_times }
        }
    }

    /// Waits for the next record to re-emit. Returns `None` once `shutdown`
    /// reads `true`, without consuming anything from the queue.
    pub async fn next_retry(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<Arc<TrackedMessage>> {
        let mut retry_rx = tokio::select! {
            biased;
            _ = stopped(shutdown) => return None,
            guard = self.retry_rx.lock() => guard,
        };

        loop {
            let record = tokio::select! {
                biased;
                _ = stopped(shutdown) => return None,
                record = retry_rx.recv() => record?,
            };
            self.queued.fetch_sub(1, Ordering::AcqRel);

            if self.is_current(&record) {
                return Some(record);
            }
            debug!(msg_id = %record.msg_id, "Skipping released retry");
        }
    }

    /// Puts a popped record back on the queue, e.g. when its emit failed.
    pub fn requeue(&self, record: Arc<TrackedMessage>) {
        if self.is_current(&record) {
            self.enqueue(record);
        }
    }

    pub fn is_tracked(&self, msg_id: &str) -> bool {
        self.failures.contains_key(msg_id)
    }

    pub fn failure_times(&self, msg_id: &str) -> Option<i32> {
        self.failures
            .get(msg_id)
            .map(|record| record.stat.failure_times())
    }

    /// Number of tracked ids.
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of records sitting in the retry queue. Records acked or
    /// abandoned after being queued are counted until the drain skips them.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    pub fn pending(&self) -> Vec<Arc<TrackedMessage>> {
        self.failures
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn enqueue(&self, record: Arc<TrackedMessage>) {
        self.queued.fetch_add(1, Ordering::AcqRel);
        if self.retry_tx.send(record).is_err() {
            // receiver lives as long as the tracker
            self.queued.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn is_current(&self, record: &Arc<TrackedMessage>) -> bool {
        self.failures
            .get(&record.msg_id)
            .is_some_and(|current| Arc::ptr_eq(current.value(), record))
    }

    // Removes the id only while it still maps to `record`.
    fn release(&self, record: &Arc<TrackedMessage>) {
        self.failures
            .remove_if(&record.msg_id, |_, current| Arc::ptr_eq(current, record));
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let is_stopped = *shutdown.borrow_and_update();
        if is_stopped {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
