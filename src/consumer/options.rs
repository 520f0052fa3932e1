//! Consumer options built from `BrokerSettings`.
//!
//! Every field is mapped explicitly so the mapping can be audited and tested
//! field by field.

use serde::Serialize;

use crate::config::BrokerSettings;
use crate::message::MessageRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConsumerMode {
    Push,
    Pull,
}

/// Where a new consumer group starts reading. Push consumers never replay
/// the backlog, so the latest offset is the only policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConsumeFromWhere {
    LastOffset,
}

/// Topic plus tag filter. `*` or an empty expression matches every tag,
/// otherwise tags are separated by `||`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub topic: String,
    pub tag_expr: String,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, tag_expr: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            tag_expr: tag_expr.into(),
        }
    }

    pub fn matches(&self, msg: &MessageRecord) -> bool {
        if msg.topic != self.topic {
            return false;
        }
        let expr = self.tag_expr.trim();
        if expr.is_empty() || expr == "*" {
            return true;
        }
        match msg.tags.as_deref() {
            Some(tags) => expr.split("||").any(|tag| tag.trim() == tags),
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerOptions {
    pub mode: ConsumerMode,
    pub consumer_group: String,
    pub name_server_addr: String,
    pub instance_name: String,
    pub consume_from_where: Option<ConsumeFromWhere>,
    pub subscription: Option<Subscription>,
    pub consume_message_batch_max_size: usize,
    pub pull_batch_size: usize,
    pub consume_thread_min: usize,
    pub consume_thread_max: usize,
}

impl ConsumerOptions {
    /// Push consumers always start from the latest offset and subscribe to
    /// the configured topic and tag filter.
    pub fn push(settings: &BrokerSettings) -> Self {
        Self {
            consume_from_where: Some(ConsumeFromWhere::LastOffset),
            subscription: Some(Subscription::new(
                settings.topic.clone(),
                settings.topic_tag.clone(),
            )),
            ..Self::common(ConsumerMode::Push, settings)
        }
    }

    /// Pull consumers only carry the group; the caller drives pulls.
    pub fn pull(settings: &BrokerSettings) -> Self {
        Self::common(ConsumerMode::Pull, settings)
    }

    fn common(mode: ConsumerMode, settings: &BrokerSettings) -> Self {
        Self {
            mode,
            consumer_group: settings.group_id.clone(),
            name_server_addr: settings.name_server_addr.clone(),
            instance_name: settings.instance_name.clone(),
            consume_from_where: None,
            subscription: None,
            consume_message_batch_max_size: settings.consume_message_batch_max_size,
            pull_batch_size: settings.pull_batch_size,
            consume_thread_min: settings.consume_thread_min,
            consume_thread_max: settings.consume_thread_max,
        }
    }
}
