//! NIP-11 relay information document (spec §6.2).

use crate::common::config::RelayConfig;
use crate::common::consts;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Limitation {
    pub max_message_length: usize,
    pub max_subscriptions: usize,
    pub max_filters: usize,
    pub max_limit: usize,
    pub max_event_tags: usize,
    pub max_content_length: usize,
    pub min_pow_difficulty: u8,
    pub auth_required: bool,
    pub payment_required: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayInfo {
    pub name: String,
    pub description: String,
    pub pubkey: String,
    pub contact: String,
    pub supported_nips: Vec<u32>,
    pub software: String,
    pub version: String,
    pub limitation: Limitation,
}

const SUPPORTED_NIPS: &[u32] = &[1, 2, 3, 4, 9, 11, 12, 13, 15, 16, 20, 22, 28, 33, 40, 42, 45, 70];

impl RelayInfo {
    pub fn from_config(config: &RelayConfig, pubkey: String) -> Self {
        Self {
            name: config.name.clone(),
            description: config.description.clone(),
            pubkey,
            contact: config.contact.clone(),
            supported_nips: SUPPORTED_NIPS.to_vec(),
            software: consts::SOFTWARE_NAME.to_string(),
            version: consts::CLI_VERSION.to_string(),
            limitation: Limitation {
                max_message_length: config.send_buffer_size,
                max_subscriptions: config.max_subscriptions,
                max_filters: config.max_filters,
                max_limit: config.max_limit,
                max_event_tags: config.max_event_tags,
                max_content_length: config.throttling.max_content_length,
                min_pow_difficulty: config.min_pow_difficulty,
                auth_required: config.auth_required,
                payment_required: false,
            },
        }
    }
}
