//! Broker client seam.
//!
//! Implementations own connection management, offsets and the delivery
//! thread pool. Delivery reaches the application through the listener
//! registered with `register_listener`; `view_message` re-fetches a single
//! message by id at any time after `start`.

use std::future::Future;

use crate::consumer::listener::RegisteredListener;
use crate::consumer::options::{ConsumerOptions, Subscription};
use crate::message::MessageRecord;
use crate::utils::error::ClientError;

pub trait BrokerClient: Send + Sync + 'static {
    fn subscribe(&self, subscription: &Subscription) -> Result<(), ClientError>;

    fn register_listener(&self, listener: RegisteredListener) -> Result<(), ClientError>;

    /// Starts delivery. Must not be called twice.
    fn start(&self) -> Result<(), ClientError>;

    /// Stops new deliveries without dropping the subscription.
    fn suspend(&self);

    fn resume(&self);

    fn shutdown(&self);

    fn view_message(
        &self,
        msg_id: &str,
    ) -> impl Future<Output = Result<MessageRecord, ClientError>> + Send;
}

/// Creates broker clients from fully mapped consumer options.
pub trait Connector: Send + Sync {
    type Client: BrokerClient;

    fn connect(&self, options: &ConsumerOptions) -> Result<Self::Client, ClientError>;
}
