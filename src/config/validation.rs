//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Value ranges of settings fragments
//! - Referential integrity within the topology (unique names, queue routing
//!   types allowed by their address)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BrokerConfig → Result<(), Vec<ValidationError>>
//! - Patterns are not checked here; a malformed pattern only loses its own
//!   entry when the repositories are rebuilt

use std::collections::HashSet;
use std::fmt::Display;

use thiserror::Error;

use crate::config::schema::BrokerConfig;
use crate::settings::AddressSettings;

/// A single semantic problem in a configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &BrokerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.reload.period_ms == 0 {
        errors.push(ValidationError::new("reload.period_ms", "must be greater than 0"));
    }
    if config.admin.enabled && config.admin.api_key.is_empty() {
        errors.push(ValidationError::new("admin.api_key", "required when admin is enabled"));
    }

    validate_wildcard(config, &mut errors);

    if let Some(default) = &config.default_address_settings {
        validate_settings("default_address_settings", &default.settings, &mut errors);
        reject_unknown("default_address_settings", default.unknown.keys(), &mut errors);
    }
    for (i, entry) in config.address_settings.iter().enumerate() {
        let scope = format!("address_settings[{i}]");
        validate_settings(&scope, &entry.settings, &mut errors);
        reject_unknown(&scope, entry.unknown.keys(), &mut errors);
    }

    validate_topology(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Range checks mirroring the broker's settings validators.
pub fn validate_settings(scope: &str, s: &AddressSettings, errors: &mut Vec<ValidationError>) {
    let mut check = |field: &str, ok: bool, rule: &str| {
        if !ok {
            errors.push(ValidationError::new(format!("{scope}.{field}"), rule));
        }
    };

    if let Some(v) = s.max_delivery_attempts {
        check("max_delivery_attempts", v >= -1, "must be -1 or greater");
    }
    if let Some(v) = s.redelivery_multiplier {
        check("redelivery_multiplier", v > 0.0, "must be greater than 0");
    }
    if let Some(v) = s.redelivery_delay {
        check("redelivery_delay", v >= 0, GE_ZERO);
    }
    if let Some(v) = s.max_redelivery_delay {
        check("max_redelivery_delay", v >= 0, GE_ZERO);
    }
    if let Some(v) = s.max_size_bytes {
        check("max_size_bytes", minus_one_or_ge_zero(v), MINUS_ONE_OR_GE_ZERO);
    }
    if let Some(v) = s.max_size_messages {
        check("max_size_messages", minus_one_or_ge_zero(v), MINUS_ONE_OR_GE_ZERO);
    }
    if let Some(v) = s.page_size_bytes {
        check("page_size_bytes", v > 0, "must be greater than 0");
    }
    if let Some(v) = s.message_counter_history_day_limit {
        check("message_counter_history_day_limit", v >= 0, GE_ZERO);
    }
    if let Some(v) = s.slow_consumer_threshold {
        check("slow_consumer_threshold", minus_one_or_ge_zero(v), MINUS_ONE_OR_GE_ZERO);
    }
    if let Some(v) = s.slow_consumer_check_period {
        check("slow_consumer_check_period", v > 0, "must be greater than 0");
    }
    if let Some(v) = s.default_max_consumers {
        check("default_max_consumers", v >= -1, "must be -1 or greater");
    }
}

fn reject_unknown<'a>(
    scope: &str,
    keys: impl Iterator<Item = &'a String>,
    errors: &mut Vec<ValidationError>,
) {
    for key in keys {
        errors.push(ValidationError::new(format!("{scope}.{key}"), "unknown setting"));
    }
}

fn validate_wildcard(config: &BrokerConfig, errors: &mut Vec<ValidationError>) {
    let w = &config.wildcard;
    if w.delimiter == w.single_word || w.delimiter == w.any_words || w.single_word == w.any_words {
        errors.push(ValidationError::new(
            "wildcard",
            format!(
                "delimiter '{}', single_word '{}' and any_words '{}' must all differ",
                w.delimiter, w.single_word, w.any_words
            ),
        ));
    }
}

const GE_ZERO: &str = "must be 0 or greater";
const MINUS_ONE_OR_GE_ZERO: &str = "must be -1 or 0 or greater";

fn minus_one_or_ge_zero(v: i64) -> bool {
    v == -1 || v >= 0
}

fn check_unique<'a>(
    scope: &str,
    names: impl Iterator<Item = &'a str>,
    errors: &mut Vec<ValidationError>,
) {
    let mut seen = HashSet::new();
    for (i, name) in names.enumerate() {
        if name.trim().is_empty() {
            errors.push(ValidationError::new(format!("{scope}[{i}].name"), "must not be empty"));
        } else if !seen.insert(name) {
            errors.push(ValidationError::new(
                format!("{scope}[{i}].name"),
                format!("duplicate name '{name}'"),
            ));
        }
    }
}

fn required(field: String, value: &str, errors: &mut Vec<ValidationError>) {
    if value.trim().is_empty() {
        errors.push(ValidationError::new(field, "must not be empty"));
    }
}

fn describe<T: Display>(items: impl Iterator<Item = T>) -> String {
    items.map(|t| t.to_string()).collect::<Vec<_>>().join(", ")
}

fn validate_topology(config: &BrokerConfig, errors: &mut Vec<ValidationError>) {
    check_unique("addresses", config.addresses.iter().map(|a| a.name.as_str()), errors);
    check_unique(
        "queues",
        config
            .addresses
            .iter()
            .flat_map(|a| a.queues.iter().map(|q| q.name.as_str())),
        errors,
    );
    check_unique("diverts", config.diverts.iter().map(|d| d.name.as_str()), errors);
    check_unique("bridges", config.bridges.iter().map(|b| b.name.as_str()), errors);

    for (i, address) in config.addresses.iter().enumerate() {
        for (j, queue) in address.queues.iter().enumerate() {
            if let Some(rt) = queue.routing_type {
                // An address without declared routing types takes whatever its queues need.
                if !address.routing_types.is_empty() && !address.routing_types.contains(&rt) {
                    errors.push(ValidationError::new(
                        format!("addresses[{i}].queues[{j}].routing_type"),
                        format!(
                            "{rt:?} is not one of the address routing types ({})",
                            describe(address.routing_types.iter().map(|t| format!("{t:?}")))
                        ),
                    ));
                }
            }
            if queue.max_consumers < -1 {
                errors.push(ValidationError::new(
                    format!("addresses[{i}].queues[{j}].max_consumers"),
                    "must be -1 or greater",
                ));
            }
        }
    }

    for (i, divert) in config.diverts.iter().enumerate() {
        required(format!("diverts[{i}].address"), &divert.address, errors);
        required(
            format!("diverts[{i}].forwarding_address"),
            &divert.forwarding_address,
            errors,
        );
    }

    for (i, bridge) in config.bridges.iter().enumerate() {
        required(format!("bridges[{i}].queue_name"), &bridge.queue_name, errors);
        required(
            format!("bridges[{i}].forwarding_address"),
            &bridge.forwarding_address,
            errors,
        );
        if bridge.concurrency == 0 {
            errors.push(ValidationError::new(
                format!("bridges[{i}].concurrency"),
                "must be greater than 0",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(doc: &str) -> BrokerConfig {
        toml::from_str(doc).unwrap()
    }

    #[test]
    fn test_valid_config() {
        let config = parse(
            r##"
            [[addresses]]
            name = "a"
            routing_types = ["anycast"]
            queues = [{ name = "q", routing_type = "anycast" }]
        "##,
        );
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let config = parse(
            r##"
            [reload]
            period_ms = 0

            [[address_settings]]
            match = "#"
            redelivery_multiplier = 0.0
            max_size_bytes = -2
            page_size_bytes = 0
        "##,
        );
        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "reload.period_ms",
                "address_settings[0].redelivery_multiplier",
                "address_settings[0].max_size_bytes",
                "address_settings[0].page_size_bytes",
            ]
        );
    }

    #[test]
    fn test_minus_one_allowed_where_unlimited() {
        let config = parse(
            r##"
            [default_address_settings]
            max_size_bytes = -1
            max_delivery_attempts = -1
            slow_consumer_threshold = -1
        "##,
        );
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_topology_rules() {
        let config = parse(
            r##"
            [[addresses]]
            name = "a"
            routing_types = ["anycast"]
            queues = [
                { name = "q", routing_type = "multicast" },
                { name = "q", max_consumers = -5 },
            ]

            [[bridges]]
            name = "b"
            queue_name = "q"
            concurrency = 0
        "##,
        );
        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"queues[1].name"));
        assert!(fields.contains(&"addresses[0].queues[0].routing_type"));
        assert!(fields.contains(&"addresses[0].queues[1].max_consumers"));
        assert!(fields.contains(&"bridges[0].forwarding_address"));
        assert!(fields.contains(&"bridges[0].concurrency"));
    }

    #[test]
    fn test_queue_checks_apply_without_address_routing_types() {
        let config = parse(
            r##"
            [[addresses]]
            name = "a"

            [[addresses.queues]]
            name = "q"
            routing_type = "multicast"
            max_consumers = -5
        "##,
        );
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "addresses[0].queues[0].max_consumers");
    }

    #[test]
    fn test_rejects_unknown_settings_keys() {
        let config = parse(
            r##"
            [default_address_settings]
            max_delivery_atempts = 3

            [[address_settings]]
            match = "#"
            dead_leter_address = "DLQ"
        "##,
        );
        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "default_address_settings.max_delivery_atempts",
                "address_settings[0].dead_leter_address",
            ]
        );
    }

    #[test]
    fn test_wildcard_characters_must_differ() {
        let config = parse(
            r##"
            [wildcard]
            delimiter = "."
            single_word = "*"
            any_words = "*"
        "##,
        );
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "wildcard");

        let config = parse(
            r##"
            [wildcard]
            delimiter = "/"
            single_word = "+"
            any_words = "#"
        "##,
        );
        assert!(validate_config(&config).is_ok());
    }
}
