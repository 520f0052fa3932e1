use serde::{Deserialize, Serialize};

/// Top-level configuration settings for the application.
///
/// Includes the broker consumer settings and the logging level.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub logging: LoggingSettings,
}

/// Configuration for the broker consumer feeding the spout.
///
/// `max_fail_times` bounds redelivery: negative retries forever, `0` allows
/// the first failure to be replayed once, `N` abandons a message once its
/// failure count reaches `N`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BrokerSettings {
    pub name_server_addr: String,
    pub group_id: String,
    pub topic: String,
    pub topic_tag: String,
    pub instance_name: String,
    pub max_fail_times: i32,
    pub consume_message_batch_max_size: usize,
    pub pull_batch_size: usize,
    pub consume_thread_min: usize,
    pub consume_thread_max: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values are filled from defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub name_server_addr: Option<String>,
    pub group_id: Option<String>,
    pub topic: Option<String>,
    pub topic_tag: Option<String>,
    pub instance_name: Option<String>,
    pub max_fail_times: Option<i32>,
    pub consume_message_batch_max_size: Option<usize>,
    pub pull_batch_size: Option<usize>,
    pub consume_thread_min: Option<usize>,
    pub consume_thread_max: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            name_server_addr: "127.0.0.1:9876".to_string(),
            group_id: "spout_consumer_group".to_string(),
            topic: "spout_topic".to_string(),
            topic_tag: "*".to_string(),
            instance_name: "DEFAULT".to_string(),
            max_fail_times: 5,
            consume_message_batch_max_size: 1,
            pull_batch_size: 32,
            consume_thread_min: 20,
            consume_thread_max: 64,
        }
    }
}

impl PartialBrokerSettings {
    /// Fills every missing field from `default`.
    pub fn merge(self, default: BrokerSettings) -> BrokerSettings {
        BrokerSettings {
            name_server_addr: self.name_server_addr.unwrap_or(default.name_server_addr),
            group_id: self.group_id.unwrap_or(default.group_id),
            topic: self.topic.unwrap_or(default.topic),
            topic_tag: self.topic_tag.unwrap_or(default.topic_tag),
            instance_name: self.instance_name.unwrap_or(default.instance_name),
            max_fail_times: self.max_fail_times.unwrap_or(default.max_fail_times),
            consume_message_batch_max_size: self
                .consume_message_batch_max_size
                .unwrap_or(default.consume_message_batch_max_size),
            pull_batch_size: self.pull_batch_size.unwrap_or(default.pull_batch_size),
            consume_thread_min: self
                .consume_thread_min
                .unwrap_or(default.consume_thread_min),
            consume_thread_max: self
                .consume_thread_max
                .unwrap_or(default.consume_thread_max),
        }
    }
}
