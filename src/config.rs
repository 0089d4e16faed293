//! Stack-wide settings

use std::time::Duration;

use crate::layer::ethernet::DEFAULT_POLL_TIMEOUT;
use crate::layer::ip::{DEFAULT_TOS, DEFAULT_TTL};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackConfig {
    /// Interface the stack runs on
    pub interface: String,
    /// Options appended to every outbound IP header, padded by the IP level
    pub ip_options: Option<Vec<u8>>,
    pub type_of_service: u8,
    pub ttl: u8,
    /// How often the capture loop checks for a stop request
    pub poll_timeout: Duration,
}

impl StackConfig {
    pub fn new(interface: impl Into<String>) -> Self {
        StackConfig {
            interface: interface.into(),
            ..Self::default()
        }
    }
}

impl Default for StackConfig {
    fn default() -> Self {
        StackConfig {
            interface: "tap0".to_string(),
            ip_options: None,
            type_of_service: DEFAULT_TOS,
            ttl: DEFAULT_TTL,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}
