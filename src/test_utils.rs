use crate::config::Config;
use crate::engine::StatsEngine;
use crate::events::UsageEvent;
use chrono::{DateTime, TimeZone, Utc};

/// Test engine builder with jobs and metrics disabled by default
pub struct TestEngineBuilder {
    config: Config,
}

impl TestEngineBuilder {
    pub fn new() -> Self {
        let mut config = Config::default();
        config.jobs.enabled = false;
        config.metrics.enabled = false;
        config.storage.op_timeout_secs = 2;
        Self { config }
    }

    /// Set a custom configuration
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_write_concurrency(mut self, concurrency: usize) -> Self {
        self.config.jobs.rollups.write_concurrency = concurrency;
        self
    }

    pub fn build(self) -> StatsEngine {
        StatsEngine::new(self.config)
    }
}

impl Default for TestEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn usage_event(user: &str, resource: &str, tokens: u64, ts: DateTime<Utc>) -> UsageEvent {
    UsageEvent {
        user_id: user.to_string(),
        resource_id: resource.to_string(),
        token_count: tokens,
        timestamp: ts,
    }
}

/// Serialize an event the way the transport glue would.
pub fn encode_event(event: &UsageEvent) -> Vec<u8> {
    serde_json::to_vec(event).expect("event serializes")
}

pub fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}
