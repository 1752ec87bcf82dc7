//! Powerplay feed listener.
//!
//! Consumes the public journal feed, keeps the latest Powerplay record per
//! star system in a key-value cache, flags anomalous reversals ("snipes") and
//! aggregates per-power cycle statistics. Frames flow through
//! [`IngestPipeline::handle_frame`]; [`run_listener`] keeps a feed connection
//! alive around it.

pub mod alerts;
pub mod cache;
pub mod config;
pub mod detector;
pub mod feed;
pub mod listener;
pub mod metrics;
pub mod ordering;
pub mod pipeline;
pub mod progress;
pub mod snapshot;
pub mod snipe_log;
pub mod stats;
pub mod store;
pub mod tick;
pub mod valkey;

pub use alerts::{alert_cutoff, is_alert, list_alerts};
pub use cache::{CacheError, KeyValueStore, MemoryStore, StateCache};
pub use config::{load_listener_config_from_env, ConfigError, ListenerConfig, SnipeThresholds};
pub use detector::detect_snipes;
pub use feed::{FeedError, FeedNormalizer, Rejection, VersionTracker};
pub use listener::{run_listener, FeedConnector, FeedSubscription, ListenerSettings, ZmqConnector};
pub use metrics::{IngestMetrics, IngestSnapshot};
pub use ordering::{admit, settle_cycle, stamp_cycle_start, Admission};
pub use pipeline::{decide_write, IngestPipeline, Outcome, WriteDecision};
pub use snapshot::SnapshotScheduler;
pub use snipe_log::{CycleSnapshotSink, MemorySnipeLog, SnipeLog};
pub use stats::{aggregate_cycle_stats, current_cycle_stats};
pub use store::{spawn_store_writer, Database, StoreError, StoreWriter};
pub use tick::{cycle_number, last_tick, next_tick, system_clock, Clock};
pub use valkey::ValkeyStore;
