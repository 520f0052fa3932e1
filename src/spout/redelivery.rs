//! Redelivery spout.
//!
//! First deliveries are emitted straight from the broker's delivery callback
//! with a fresh, untracked `MessageStat`; nothing is remembered for them.
//! Only when the host reports a failure is the message fetched back from the
//! broker by id and handed to the `FailureTracker`, from which `next_tuple`
//! re-emits it until it is acked or its failure count reaches
//! `max_fail_times`.
//!
//! The first failure of an id is queued with a zero count; later failures
//! increment before comparing against the ceiling, so `max_fail_times = 0`
//! still replays a message once.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::BrokerSettings;
use crate::consumer::{
    BrokerClient, Capability, ConsumeContext, ConsumeStatus, Connector, MessageListener,
    PushConsumer, build_push_consumer,
};
use crate::message::{MessageRecord, MessageStat};
use crate::spout::collector::{Collector, Tuple};
use crate::spout::tracker::{FailureOutcome, FailureTracker};
use crate::spout::{Fields, Spout, SpoutContext};
use crate::utils::error::SpoutError;

pub struct RedeliverySpout<K: Connector> {
    connector: K,
    settings: BrokerSettings,
    core: Arc<SpoutCore<K::Client>>,
}

// Shared with the broker client, which holds it as its listener.
struct SpoutCore<C> {
    collector: Arc<dyn Collector>,
    tracker: FailureTracker,
    consumer: OnceLock<PushConsumer<C>>,
    task_id: OnceLock<u32>,
    shutdown: watch::Sender<bool>,
}

impl<K: Connector> RedeliverySpout<K> {
    pub fn new(connector: K, settings: BrokerSettings, collector: Arc<dyn Collector>) -> Self {
        let (shutdown, _) = watch::channel(false);
        let core = Arc::new(SpoutCore {
            collector,
            tracker: FailureTracker::new(settings.max_fail_times),
            consumer: OnceLock::new(),
            task_id: OnceLock::new(),
            shutdown,
        });
        Self {
            connector,
            settings,
            core,
        }
    }

    /// The running push consumer, once `open` succeeded.
    pub fn consumer(&self) -> Option<&PushConsumer<K::Client>> {
        self.core.consumer.get()
    }

    /// Number of message ids currently tracked after a failure.
    pub fn pending_failures(&self) -> usize {
        self.core.tracker.len()
    }

    /// Depth of the retry queue, including records released after queueing.
    pub fn queued_retries(&self) -> usize {
        self.core.tracker.queued()
    }

    pub fn is_tracked(&self, msg_id: &str) -> bool {
        self.core.tracker.is_tracked(msg_id)
    }

    pub fn failure_times(&self, msg_id: &str) -> Option<i32> {
        self.core.tracker.failure_times(msg_id)
    }

    pub fn is_closed(&self) -> bool {
        *self.core.shutdown.borrow()
    }
}

impl<K: Connector> Spout for RedeliverySpout<K> {
    fn open(&self, context: &SpoutContext) -> Result<(), SpoutError> {
        if self.core.consumer.get().is_some() {
            return Err(SpoutError::AlreadyOpen);
        }

        let mut settings = self.settings.clone();
        settings.instance_name = context.task_id.to_string();

        let consumer = build_push_consumer(&self.connector, &settings, self.core.clone())
            .inspect_err(|err| error!(task_id = context.task_id, %err, "Failed to init consumer"))?;
        let _ = self.core.task_id.set(context.task_id);

        // only a started consumer is kept, so a failed open can be retried
        if let Err(err) = consumer.start() {
            error!(task_id = context.task_id, %err, "Failed to start consumer");
            consumer.shutdown();
            return Err(err);
        }
        if let Err(consumer) = self.core.consumer.set(consumer) {
            consumer.shutdown();
            return Err(SpoutError::AlreadyOpen);
        }

        info!(
            task_id = context.task_id,
            max_fail_times = self.core.tracker.max_fail_times(),
            "Spout opened"
        );
        Ok(())
    }

    fn close(&self) {
        self.core.shutdown.send_replace(true);

        if let Some(consumer) = self.core.consumer.get() {
            consumer.shutdown();
        }

        for record in self.core.tracker.pending() {
            warn!(
                msg_id = %record.msg_id(),
                message = ?record.message(),
                stat = ?record.stat().snapshot(),
                "Failed to handle message before close"
            );
        }
    }

    fn activate(&self) {
        match self.core.consumer.get() {
            Some(consumer) => consumer.resume(),
            None => warn!("activate called before open"),
        }
    }

    fn deactivate(&self) {
        match self.core.consumer.get() {
            Some(consumer) => consumer.suspend(),
            None => warn!("deactivate called before open"),
        }
    }

    /// Only failed messages come through here; first deliveries are emitted
    /// by the broker callback.
    async fn next_tuple(&self) -> bool {
        let mut shutdown = self.core.shutdown.subscribe();
        let Some(record) = self.core.tracker.next_retry(&mut shutdown).await else {
            return false;
        };
        let Some(message) = record.message().cloned() else {
            return false;
        };

        record.stat().mark_elapsed();
        let tuple = Tuple::new(message, record.stat().clone());
        match self.core.collector.emit(tuple, record.msg_id()) {
            Ok(()) => true,
            Err(err) => {
                error!(msg_id = %record.msg_id(), %err, "Failed to re-emit message");
                self.core.tracker.requeue(record);
                false
            }
        }
    }

    fn ack(&self, msg_id: &str) {
        if self.core.tracker.ack(msg_id) {
            debug!(msg_id, "Acked tracked message");
        }
    }

    /// Fetching a message back by id is a broker round-trip; with many
    /// failures this path is slow.
    async fn fail(&self, msg_id: &str) {
        let Some(consumer) = self.core.consumer.get() else {
            warn!(msg_id, "fail called before open");
            return;
        };

        let outcome = self
            .core
            .tracker
            .fail(msg_id, || consumer.view_message(msg_id))
            .await;
        match outcome {
            FailureOutcome::Tracked => debug!(msg_id, "Tracking failed message"),
            FailureOutcome::Requeued { failure_times } => {
                debug!(msg_id, failure_times, "Requeued failed message")
            }
            FailureOutcome::Abandoned { failure_times } => warn!(
                msg_id,
                failure_times, "Failure too many times, skip message"
            ),
            FailureOutcome::FetchFailed(err) => {
                error!(msg_id, %err, "Failed to get message from broker")
            }
            FailureOutcome::Released => debug!(msg_id, "Message released during failure report"),
        }
    }

    fn declare_output_fields(&self) -> Fields {
        Fields::new(["message", "stat"])
    }

    fn component_config(&self) -> Option<HashMap<String, serde_json::Value>> {
        None
    }
}

impl<C: BrokerClient> MessageListener for SpoutCore<C> {
    fn capability(&self) -> Capability {
        Capability::Concurrently
    }

    fn consume_message(&self, msgs: &[MessageRecord], context: &ConsumeContext) -> ConsumeStatus {
        for msg in msgs {
            let tuple = Tuple::new(Arc::new(msg.clone()), Arc::new(MessageStat::new()));
            if let Err(err) = self.collector.emit(tuple, &msg.msg_id) {
                error!(
                    msg_id = %msg.msg_id,
                    task_id = ?self.task_id.get(),
                    queue_id = context.queue_id,
                    batch = msgs.len(),
                    %err,
                    "Failed to emit message"
                );
                return ConsumeStatus::ReconsumeLater;
            }
        }
        ConsumeStatus::ConsumeSuccess
    }
}
