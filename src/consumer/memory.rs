//! In-process broker client.
//!
//! `MemoryBroker` keeps published messages by id, routes them through the
//! registered subscription and delivers them to the listener in batches of
//! `consume_message_batch_max_size`, synchronously on the publishing thread.
//! Batches answered with `ReconsumeLater` are parked until `redeliver` is
//! called. Delivery honours suspend/resume, and messages published before a
//! subscription exists are never delivered (consumption starts at the last
//! offset). Fault toggles let tests exercise connection and fetch failures.
//!
//! Clones share state, so a test can keep one handle while the consumer owns
//! another.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info};
use uuid::Uuid;

use crate::consumer::client::{BrokerClient, Connector};
use crate::consumer::listener::{Capability, ConsumeContext, ConsumeStatus, RegisteredListener};
use crate::consumer::options::{ConsumerOptions, Subscription};
use crate::message::MessageRecord;
use crate::utils::error::ClientError;

/// Number of queues a topic is spread over.
pub const QUEUE_COUNT: i32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Created,
    Running,
    Suspended,
    Shutdown,
}

#[derive(Debug)]
struct State {
    status: ClientStatus,
    options: Option<ConsumerOptions>,
    subscription: Option<Subscription>,
    listener: Option<RegisteredListener>,
    messages: HashMap<String, MessageRecord>,
    backlog: VecDeque<MessageRecord>,
    reconsume: VecDeque<MessageRecord>,
    // queues with an orderly batch in flight
    locked_queues: HashSet<i32>,
    next_offset: i64,
}

impl Default for State {
    fn default() -> Self {
        Self {
            status: ClientStatus::Created,
            options: None,
            subscription: None,
            listener: None,
            messages: HashMap::new(),
            backlog: VecDeque::new(),
            reconsume: VecDeque::new(),
            locked_queues: HashSet::new(),
            next_offset: 0,
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    refuse_connections: AtomicBool,
    fail_fetches: AtomicBool,
    fetch_delay_ms: AtomicU64,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
    faults: Arc<Faults>,
    fetches: Arc<AtomicUsize>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a message and delivers it if it matches the subscription.
    /// Returns the broker-assigned message id.
    pub fn publish(&self, topic: &str, tags: Option<&str>, body: impl Into<Vec<u8>>) -> String {
        let msg_id = Uuid::new_v4().simple().to_string().to_uppercase();
        {
            let mut state = self.lock();
            let offset = state.next_offset;
            state.next_offset += 1;

            let mut record = MessageRecord::new(msg_id.clone(), topic, body.into());
            record.tags = tags.map(str::to_string);
            record.queue_id = (offset % i64::from(QUEUE_COUNT)) as i32;
            record.queue_offset = offset / i64::from(QUEUE_COUNT);

            state.messages.insert(msg_id.clone(), record.clone());
            if state
                .subscription
                .as_ref()
                .is_some_and(|sub| sub.matches(&record))
            {
                state.backlog.push_back(record);
            }
        }
        self.dispatch();
        msg_id
    }

    /// Stores a message so it can be fetched by id without delivering it.
    pub fn store(&self, record: MessageRecord) {
        self.lock().messages.insert(record.msg_id.clone(), record);
    }

    /// Moves every batch answered with `ReconsumeLater` back in front of the
    /// backlog and delivers again. Returns how many messages were moved.
    pub fn redeliver(&self) -> usize {
        let moved = {
            let mut state = self.lock();
            let state = &mut *state;
            let moved = state.reconsume.len();
            while let Some(record) = state.reconsume.pop_back() {
                state.backlog.push_front(record);
            }
            moved
        };
        self.dispatch();
        moved
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.faults.refuse_connections.store(refuse, Ordering::Release);
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.faults.fail_fetches.store(fail, Ordering::Release);
    }

    /// Delay applied to every `view_message` call before it answers.
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.faults
            .fetch_delay_ms
            .store(delay.as_millis() as u64, Ordering::Release);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Acquire)
    }

    pub fn status(&self) -> ClientStatus {
        self.lock().status
    }

    pub fn backlog_len(&self) -> usize {
        self.lock().backlog.len()
    }

    pub fn reconsume_len(&self) -> usize {
        self.lock().reconsume.len()
    }

    pub fn options(&self) -> Option<ConsumerOptions> {
        self.lock().options.clone()
    }

    pub fn subscription(&self) -> Option<Subscription> {
        self.lock().subscription.clone()
    }

    pub fn listener_capability(&self) -> Option<Capability> {
        self.lock().listener.as_ref().map(RegisteredListener::capability)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // The listener runs without the state lock held so it may call back into
    // the broker (e.g. fetch by id).
    fn dispatch(&self) {
        while let Some((listener, batch, context)) = self.next_batch() {
            let status = listener.consume(&batch, &context);
            debug!(
                queue_id = context.queue_id,
                size = batch.len(),
                ?status,
                "Delivered batch"
            );
            self.complete(&listener, batch, context.queue_id, status);
        }
    }

    fn next_batch(&self) -> Option<(RegisteredListener, Vec<MessageRecord>, ConsumeContext)> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.status != ClientStatus::Running {
            return None;
        }
        let listener = state.listener.clone()?;
        let max = state
            .options
            .as_ref()
            .map_or(1, |o| o.consume_message_batch_max_size)
            .max(1);

        let batch: Vec<MessageRecord> = match listener.capability() {
            Capability::Orderly => {
                let queue_id = state
                    .backlog
                    .iter()
                    .map(|m| m.queue_id)
                    .find(|q| !state.locked_queues.contains(q))?;
                let mut batch = Vec::new();
                let mut rest = VecDeque::with_capacity(state.backlog.len());
                while let Some(record) = state.backlog.pop_front() {
                    if record.queue_id == queue_id && batch.len() < max {
                        batch.push(record);
                    } else {
                        rest.push_back(record);
                    }
                }
                state.backlog = rest;
                state.locked_queues.insert(queue_id);
                batch
            }
            _ => {
                let n = max.min(state.backlog.len());
                state.backlog.drain(..n).collect()
            }
        };

        let first = batch.first()?;
        let context = ConsumeContext {
            queue_id: first.queue_id,
            delivery_attempt: first.reconsume_times.max(0) as u32 + 1,
        };
        Some((listener, batch, context))
    }

    fn complete(
        &self,
        listener: &RegisteredListener,
        batch: Vec<MessageRecord>,
        queue_id: i32,
        status: ConsumeStatus,
    ) {
        let mut state = self.lock();
        if listener.capability() == Capability::Orderly {
            state.locked_queues.remove(&queue_id);
        }
        if status == ConsumeStatus::ReconsumeLater {
            for mut record in batch {
                record.reconsume_times += 1;
                state.reconsume.push_back(record);
            }
        }
    }
}

impl Connector for MemoryBroker {
    type Client = MemoryBroker;

    fn connect(&self, options: &ConsumerOptions) -> Result<Self::Client, ClientError> {
        if self.faults.refuse_connections.load(Ordering::Acquire) {
            return Err(ClientError::Unavailable(options.name_server_addr.clone()));
        }
        self.lock().options = Some(options.clone());
        Ok(self.clone())
    }
}

impl BrokerClient for MemoryBroker {
    fn subscribe(&self, subscription: &Subscription) -> Result<(), ClientError> {
        let mut state = self.lock();
        if state.status == ClientStatus::Shutdown {
            return Err(ClientError::InvalidState("client is shut down".to_string()));
        }
        state.subscription = Some(subscription.clone());
        Ok(())
    }

    fn register_listener(&self, listener: RegisteredListener) -> Result<(), ClientError> {
        let mut state = self.lock();
        if state.status == ClientStatus::Shutdown {
            return Err(ClientError::InvalidState("client is shut down".to_string()));
        }
        state.listener = Some(listener);
        Ok(())
    }

    fn start(&self) -> Result<(), ClientError> {
        {
            let mut state = self.lock();
            if state.status != ClientStatus::Created {
                return Err(ClientError::InvalidState(format!(
                    "cannot start client in state {:?}",
                    state.status
                )));
            }
            state.status = ClientStatus::Running;
        }
        info!("Memory broker client started");
        self.dispatch();
        Ok(())
    }

    fn suspend(&self) {
        let mut state = self.lock();
        if state.status == ClientStatus::Running {
            state.status = ClientStatus::Suspended;
        }
    }

    fn resume(&self) {
        {
            let mut state = self.lock();
            if state.status != ClientStatus::Suspended {
                return;
            }
            state.status = ClientStatus::Running;
        }
        self.dispatch();
    }

    fn shutdown(&self) {
        let mut state = self.lock();
        state.status = ClientStatus::Shutdown;
        // drops the listener so it does not keep its owner alive
        state.listener = None;
    }

    async fn view_message(&self, msg_id: &str) -> Result<MessageRecord, ClientError> {
        self.fetches.fetch_add(1, Ordering::AcqRel);

        let delay = self.faults.fetch_delay_ms.load(Ordering::Acquire);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.faults.fail_fetches.load(Ordering::Acquire) {
            return Err(ClientError::Unavailable(format!(
                "fetch of {msg_id} timed out"
            )));
        }

        self.lock()
            .messages
            .get(msg_id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(msg_id.to_string()))
    }
}
