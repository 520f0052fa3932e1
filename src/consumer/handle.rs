use std::sync::Arc;

use crate::consumer::client::BrokerClient;
use crate::consumer::options::ConsumerOptions;
use crate::message::MessageRecord;
use crate::utils::error::{ClientError, SpoutError};

/// Output of the consumer factory.
#[derive(Debug)]
pub enum Consumer<C> {
    Push(PushConsumer<C>),
    Pull(PullConsumer<C>),
}

impl<C> Consumer<C> {
    pub fn options(&self) -> &ConsumerOptions {
        match self {
            Self::Push(consumer) => consumer.options(),
            Self::Pull(consumer) => consumer.options(),
        }
    }
}

/// A subscribed push consumer with its listener registered, not yet started.
#[derive(Debug)]
pub struct PushConsumer<C> {
    options: ConsumerOptions,
    client: Arc<C>,
}

impl<C: BrokerClient> PushConsumer<C> {
    pub(crate) fn new(options: ConsumerOptions, client: C) -> Self {
        Self {
            options,
            client: Arc::new(client),
        }
    }

    pub fn start(&self) -> Result<(), SpoutError> {
        self.client.start().map_err(SpoutError::ClientInit)
    }

    pub fn suspend(&self) {
        self.client.suspend();
    }

    pub fn resume(&self) {
        self.client.resume();
    }

    pub fn shutdown(&self) {
        self.client.shutdown();
    }

    pub async fn view_message(&self, msg_id: &str) -> Result<MessageRecord, ClientError> {
        self.client.view_message(msg_id).await
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }
}

impl<C> PushConsumer<C> {
    pub fn options(&self) -> &ConsumerOptions {
        &self.options
    }
}

/// A pull consumer bound to its group. Pulling is driven by the caller
/// through the client.
#[derive(Debug)]
pub struct PullConsumer<C> {
    options: ConsumerOptions,
    client: Arc<C>,
}

impl<C: BrokerClient> PullConsumer<C> {
    pub(crate) fn new(options: ConsumerOptions, client: C) -> Self {
        Self {
            options,
            client: Arc::new(client),
        }
    }

    pub fn start(&self) -> Result<(), SpoutError> {
        self.client.start().map_err(SpoutError::ClientInit)
    }

    pub fn shutdown(&self) {
        self.client.shutdown();
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }
}

impl<C> PullConsumer<C> {
    pub fn options(&self) -> &ConsumerOptions {
        &self.options
    }
}
