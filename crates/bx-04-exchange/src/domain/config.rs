//! Exchange tunables.

use std::time::Duration;

use super::errors::ConfigError;

/// Configuration for the exchange and its workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeConfig {
    /// Decision-engine workers and transport send workers, each.
    pub task_workers: usize,
    /// Envelopes buffered between the engine and the send workers.
    pub outbox_capacity: usize,
    /// Parallel provide calls.
    pub provide_workers: usize,
    /// Newly added CIDs waiting to be provided.
    pub provide_buffer: usize,
    pub provide_timeout: Duration,
    /// Announce new blocks to the routing system.
    pub provide_enabled: bool,
    pub provider_search_timeout: Duration,
    pub max_providers_per_request: usize,
    /// Full wantlist resend period.
    pub rebroadcast_interval: Duration,
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
    /// Outstanding wants per session.
    pub active_wants_limit: usize,
    pub session_base_tick: Duration,
    /// First session tick, used before any latency sample exists.
    pub session_search_delay: Duration,
    /// CIDs remembered per session for routing inbound blocks.
    pub session_interest_size: usize,
    /// Providers requested by a session tick.
    pub session_max_providers: usize,
    /// A block sent to a peer is not queued for it again within this window.
    pub dup_suppression_window: Duration,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            task_workers: 8,
            outbox_capacity: 4,
            provide_workers: 4,
            provide_buffer: 256,
            provide_timeout: Duration::from_secs(15),
            provide_enabled: true,
            provider_search_timeout: Duration::from_secs(10),
            max_providers_per_request: 8,
            rebroadcast_interval: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10 * 60),
            send_timeout: Duration::from_secs(5 * 60),
            active_wants_limit: 16,
            session_base_tick: Duration::from_millis(500),
            session_search_delay: Duration::from_secs(10),
            session_interest_size: 2048,
            session_max_providers: 10,
            dup_suppression_window: Duration::from_secs(10),
        }
    }
}

impl ExchangeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let counts = [
            ("task_workers", self.task_workers),
            ("outbox_capacity", self.outbox_capacity),
            ("provide_workers", self.provide_workers),
            ("provide_buffer", self.provide_buffer),
            ("max_providers_per_request", self.max_providers_per_request),
            ("active_wants_limit", self.active_wants_limit),
            ("session_interest_size", self.session_interest_size),
        ];
        for (name, value) in counts {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        if self.rebroadcast_interval.is_zero() {
            return Err(ConfigError::Zero("rebroadcast_interval"));
        }
        if self.session_base_tick.is_zero() {
            return Err(ConfigError::Zero("session_base_tick"));
        }
        Ok(())
    }
}
