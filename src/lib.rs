pub mod aggregate;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod jobs;
pub mod metrics;
pub mod ranking;
pub mod realtime;
pub mod rollup;
pub mod storage;
pub mod test_utils;

pub use config::Config;
pub use engine::StatsEngine;
