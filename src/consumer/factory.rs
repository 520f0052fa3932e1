//! Consumer factory.
//!
//! Pure construction: map settings onto consumer options, connect a client,
//! subscribe and register the listener. Nothing here starts network I/O and
//! nothing is retried; every client error surfaces as
//! `SpoutError::ClientInit`.

use std::sync::Arc;

use tracing::info;

use crate::config::BrokerSettings;
use crate::consumer::client::{BrokerClient, Connector};
use crate::consumer::handle::{Consumer, PullConsumer, PushConsumer};
use crate::consumer::listener::{MessageListener, RegisteredListener};
use crate::consumer::options::{ConsumerMode, ConsumerOptions};
use crate::utils::error::SpoutError;

/// Builds a push or pull consumer. The listener is only used in push mode.
pub fn build_consumer<K: Connector>(
    connector: &K,
    settings: &BrokerSettings,
    listener: Arc<dyn MessageListener>,
    mode: ConsumerMode,
) -> Result<Consumer<K::Client>, SpoutError> {
    match mode {
        ConsumerMode::Push => build_push_consumer(connector, settings, listener).map(Consumer::Push),
        ConsumerMode::Pull => build_pull_consumer(connector, settings).map(Consumer::Pull),
    }
}

pub fn build_push_consumer<K: Connector>(
    connector: &K,
    settings: &BrokerSettings,
    listener: Arc<dyn MessageListener>,
) -> Result<PushConsumer<K::Client>, SpoutError> {
    let options = ConsumerOptions::push(settings);
    info!(
        instance = %options.instance_name,
        group = %options.consumer_group,
        topic = %settings.topic,
        tag = %settings.topic_tag,
        "Begin to init push consumer"
    );

    let listener = RegisteredListener::resolve(listener).ok_or(SpoutError::NoListenerCapability)?;

    let client = connector.connect(&options).map_err(SpoutError::ClientInit)?;
    if let Some(subscription) = options.subscription.as_ref() {
        client
            .subscribe(subscription)
            .map_err(SpoutError::ClientInit)?;
    }
    client
        .register_listener(listener)
        .map_err(SpoutError::ClientInit)?;

    Ok(PushConsumer::new(options, client))
}

pub fn build_pull_consumer<K: Connector>(
    connector: &K,
    settings: &BrokerSettings,
) -> Result<PullConsumer<K::Client>, SpoutError> {
    let options = ConsumerOptions::pull(settings);
    info!(
        instance = %options.instance_name,
        group = %options.consumer_group,
        "Begin to init pull consumer"
    );

    let client = connector.connect(&options).map_err(SpoutError::ClientInit)?;
    Ok(PullConsumer::new(options, client))
}
