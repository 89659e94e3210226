//! Per-address operational settings.
//!
//! [`AddressSettings`] is a fragment: every field is an `Option` and `None`
//! means "never assigned", which is distinct from holding the default value.
//! [`ResolvedAddressSettings`] is what routing and flow control read.

use serde::{Deserialize, Serialize};

use crate::settings::overlay::{fill, Mergeable};

pub const DEFAULT_MAX_DELIVERY_ATTEMPTS: i32 = 10;
pub const DEFAULT_MAX_SIZE_BYTES: i64 = -1;
pub const DEFAULT_MAX_SIZE_MESSAGES: i64 = -1;
pub const DEFAULT_MAX_SIZE_BYTES_REJECT_THRESHOLD: i64 = -1;
pub const DEFAULT_PAGE_SIZE: i32 = 10 * 1024 * 1024;
pub const DEFAULT_MESSAGE_COUNTER_HISTORY_DAY_LIMIT: i32 = 0;
pub const DEFAULT_REDELIVER_DELAY: i64 = 0;
pub const DEFAULT_REDELIVER_MULTIPLIER: f64 = 1.0;
pub const DEFAULT_EXPIRY_DELAY: i64 = -1;
pub const DEFAULT_SLOW_CONSUMER_THRESHOLD: i64 = -1;
pub const DEFAULT_SLOW_CONSUMER_CHECK_PERIOD: i64 = 5;
pub const DEFAULT_AUTO_CREATE_QUEUES: bool = true;
pub const DEFAULT_AUTO_DELETE_QUEUES: bool = true;
pub const DEFAULT_AUTO_CREATE_ADDRESSES: bool = true;
pub const DEFAULT_AUTO_DELETE_ADDRESSES: bool = true;
pub const DEFAULT_PURGE_ON_NO_CONSUMERS: bool = false;
pub const DEFAULT_MAX_CONSUMERS: i32 = -1;
pub const DEFAULT_ID_CACHE_SIZE: i32 = 20_000;
pub const DEFAULT_PREFETCH_PAGE_MESSAGES: i32 = -1;

/// What happens to messages sent to an address that is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AddressFullMessagePolicy {
    #[default]
    Page,
    Drop,
    Block,
    Fail,
}

/// Action taken against a consumer below the slow-consumer threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlowConsumerPolicy {
    Kill,
    #[default]
    Notify,
}

/// Unit of `slow_consumer_threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlowConsumerThresholdMeasurementUnit {
    #[default]
    MessagesPerSecond,
    MessagesPerMinute,
    MessagesPerHour,
    MessagesPerDay,
}

/// A partially populated settings record contributed by one pattern.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AddressSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_letter_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_delay: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_expiry_delay: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_expiry_delay: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_delivery_attempts: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size_messages: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size_bytes_reject_threshold: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size_bytes: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_full_message_policy: Option<AddressFullMessagePolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_counter_history_day_limit: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redelivery_delay: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redelivery_multiplier: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_redelivery_delay: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slow_consumer_threshold: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slow_consumer_threshold_measurement_unit: Option<SlowConsumerThresholdMeasurementUnit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slow_consumer_check_period: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slow_consumer_policy: Option<SlowConsumerPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_create_queues: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_delete_queues: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_create_addresses: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_delete_addresses: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_purge_on_no_consumers: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_max_consumers: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_cache_size: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefetch_page_messages: Option<i32>,
}

impl AddressSettings {
    /// Serialize, omitting unset fields.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// True when no field has been assigned.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl Mergeable for AddressSettings {
    type Resolved = ResolvedAddressSettings;

    fn merge(&mut self, less_specific: &Self) {
        // No `..` here: a new field does not compile until it is merged.
        let AddressSettings {
            dead_letter_address,
            expiry_address,
            expiry_delay,
            min_expiry_delay,
            max_expiry_delay,
            max_delivery_attempts,
            max_size_bytes,
            max_size_messages,
            max_size_bytes_reject_threshold,
            page_size_bytes,
            address_full_message_policy,
            message_counter_history_day_limit,
            redelivery_delay,
            redelivery_multiplier,
            max_redelivery_delay,
            slow_consumer_threshold,
            slow_consumer_threshold_measurement_unit,
            slow_consumer_check_period,
            slow_consumer_policy,
            auto_create_queues,
            auto_delete_queues,
            auto_create_addresses,
            auto_delete_addresses,
            default_purge_on_no_consumers,
            default_max_consumers,
            id_cache_size,
            prefetch_page_messages,
        } = less_specific;

        fill(&mut self.dead_letter_address, dead_letter_address);
        fill(&mut self.expiry_address, expiry_address);
        fill(&mut self.expiry_delay, expiry_delay);
        fill(&mut self.min_expiry_delay, min_expiry_delay);
        fill(&mut self.max_expiry_delay, max_expiry_delay);
        fill(&mut self.max_delivery_attempts, max_delivery_attempts);
        fill(&mut self.max_size_bytes, max_size_bytes);
        fill(&mut self.max_size_messages, max_size_messages);
        fill(&mut self.max_size_bytes_reject_threshold, max_size_bytes_reject_threshold);
        fill(&mut self.page_size_bytes, page_size_bytes);
        fill(&mut self.address_full_message_policy, address_full_message_policy);
        fill(&mut self.message_counter_history_day_limit, message_counter_history_day_limit);
        fill(&mut self.redelivery_delay, redelivery_delay);
        fill(&mut self.redelivery_multiplier, redelivery_multiplier);
        fill(&mut self.max_redelivery_delay, max_redelivery_delay);
        fill(&mut self.slow_consumer_threshold, slow_consumer_threshold);
        fill(
            &mut self.slow_consumer_threshold_measurement_unit,
            slow_consumer_threshold_measurement_unit,
        );
        fill(&mut self.slow_consumer_check_period, slow_consumer_check_period);
        fill(&mut self.slow_consumer_policy, slow_consumer_policy);
        fill(&mut self.auto_create_queues, auto_create_queues);
        fill(&mut self.auto_delete_queues, auto_delete_queues);
        fill(&mut self.auto_create_addresses, auto_create_addresses);
        fill(&mut self.auto_delete_addresses, auto_delete_addresses);
        fill(&mut self.default_purge_on_no_consumers, default_purge_on_no_consumers);
        fill(&mut self.default_max_consumers, default_max_consumers);
        fill(&mut self.id_cache_size, id_cache_size);
        fill(&mut self.prefetch_page_messages, prefetch_page_messages);
    }

    fn resolve(self) -> ResolvedAddressSettings {
        let AddressSettings {
            dead_letter_address,
            expiry_address,
            expiry_delay,
            min_expiry_delay,
            max_expiry_delay,
            max_delivery_attempts,
            max_size_bytes,
            max_size_messages,
            max_size_bytes_reject_threshold,
            page_size_bytes,
            address_full_message_policy,
            message_counter_history_day_limit,
            redelivery_delay,
            redelivery_multiplier,
            max_redelivery_delay,
            slow_consumer_threshold,
            slow_consumer_threshold_measurement_unit,
            slow_consumer_check_period,
            slow_consumer_policy,
            auto_create_queues,
            auto_delete_queues,
            auto_create_addresses,
            auto_delete_addresses,
            default_purge_on_no_consumers,
            default_max_consumers,
            id_cache_size,
            prefetch_page_messages,
        } = self;

        let redelivery_delay = redelivery_delay.unwrap_or(DEFAULT_REDELIVER_DELAY);

        ResolvedAddressSettings {
            dead_letter_address,
            expiry_address,
            expiry_delay: expiry_delay.unwrap_or(DEFAULT_EXPIRY_DELAY),
            min_expiry_delay: min_expiry_delay.unwrap_or(DEFAULT_EXPIRY_DELAY),
            max_expiry_delay: max_expiry_delay.unwrap_or(DEFAULT_EXPIRY_DELAY),
            max_delivery_attempts: max_delivery_attempts.unwrap_or(DEFAULT_MAX_DELIVERY_ATTEMPTS),
            max_size_bytes: max_size_bytes.unwrap_or(DEFAULT_MAX_SIZE_BYTES),
            max_size_messages: max_size_messages.unwrap_or(DEFAULT_MAX_SIZE_MESSAGES),
            max_size_bytes_reject_threshold: max_size_bytes_reject_threshold
                .unwrap_or(DEFAULT_MAX_SIZE_BYTES_REJECT_THRESHOLD),
            page_size_bytes: page_size_bytes.unwrap_or(DEFAULT_PAGE_SIZE),
            address_full_message_policy: address_full_message_policy.unwrap_or_default(),
            message_counter_history_day_limit: message_counter_history_day_limit
                .unwrap_or(DEFAULT_MESSAGE_COUNTER_HISTORY_DAY_LIMIT),
            redelivery_delay,
            redelivery_multiplier: redelivery_multiplier.unwrap_or(DEFAULT_REDELIVER_MULTIPLIER),
            max_redelivery_delay: max_redelivery_delay.unwrap_or(redelivery_delay.saturating_mul(10)),
            slow_consumer_threshold: slow_consumer_threshold
                .unwrap_or(DEFAULT_SLOW_CONSUMER_THRESHOLD),
            slow_consumer_threshold_measurement_unit: slow_consumer_threshold_measurement_unit
                .unwrap_or_default(),
            slow_consumer_check_period: slow_consumer_check_period
                .unwrap_or(DEFAULT_SLOW_CONSUMER_CHECK_PERIOD),
            slow_consumer_policy: slow_consumer_policy.unwrap_or_default(),
            auto_create_queues: auto_create_queues.unwrap_or(DEFAULT_AUTO_CREATE_QUEUES),
            auto_delete_queues: auto_delete_queues.unwrap_or(DEFAULT_AUTO_DELETE_QUEUES),
            auto_create_addresses: auto_create_addresses.unwrap_or(DEFAULT_AUTO_CREATE_ADDRESSES),
            auto_delete_addresses: auto_delete_addresses.unwrap_or(DEFAULT_AUTO_DELETE_ADDRESSES),
            default_purge_on_no_consumers: default_purge_on_no_consumers
                .unwrap_or(DEFAULT_PURGE_ON_NO_CONSUMERS),
            default_max_consumers: default_max_consumers.unwrap_or(DEFAULT_MAX_CONSUMERS),
            id_cache_size: id_cache_size.unwrap_or(DEFAULT_ID_CACHE_SIZE),
            prefetch_page_messages: prefetch_page_messages.unwrap_or(DEFAULT_PREFETCH_PAGE_MESSAGES),
        }
    }
}

/// Fully resolved settings for one concrete address.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedAddressSettings {
    pub dead_letter_address: Option<String>,
    pub expiry_address: Option<String>,
    pub expiry_delay: i64,
    pub min_expiry_delay: i64,
    pub max_expiry_delay: i64,
    pub max_delivery_attempts: i32,
    pub max_size_bytes: i64,
    pub max_size_messages: i64,
    pub max_size_bytes_reject_threshold: i64,
    pub page_size_bytes: i32,
    pub address_full_message_policy: AddressFullMessagePolicy,
    pub message_counter_history_day_limit: i32,
    pub redelivery_delay: i64,
    pub redelivery_multiplier: f64,
    pub max_redelivery_delay: i64,
    pub slow_consumer_threshold: i64,
    pub slow_consumer_threshold_measurement_unit: SlowConsumerThresholdMeasurementUnit,
    pub slow_consumer_check_period: i64,
    pub slow_consumer_policy: SlowConsumerPolicy,
    pub auto_create_queues: bool,
    pub auto_delete_queues: bool,
    pub auto_create_addresses: bool,
    pub auto_delete_addresses: bool,
    pub default_purge_on_no_consumers: bool,
    pub default_max_consumers: i32,
    pub id_cache_size: i32,
    pub prefetch_page_messages: i32,
}

impl Default for ResolvedAddressSettings {
    fn default() -> Self {
        AddressSettings::default().resolve()
    }
}
