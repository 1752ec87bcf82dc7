#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use flate2::{write::ZlibEncoder, Compression};
use pp_core::config::FeedConfig;
use pp_core::{IngestPipeline, MemorySnipeLog, SnipeThresholds, StateCache};
use serde_json::{json, Value};

pub const JOURNAL_SCHEMA: &str = "https://eddn.edcd.io/schemas/journal/1";
pub const LIVE_VERSION: &str = "4.2.0.0";

pub fn at(value: &str) -> DateTime<Utc> {
    value.parse().expect("valid RFC 3339 timestamp")
}

/// Compresses a JSON envelope the way the relay publishes it.
pub fn frame(envelope: &Value) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(envelope.to_string().as_bytes())
        .expect("compress frame");
    encoder.finish().expect("finish frame")
}

pub fn journal_frame(message: Value) -> Vec<u8> {
    frame(&json!({
        "$schemaRef": JOURNAL_SCHEMA,
        "header": {
            "uploaderID": "integration",
            "softwareName": "integration_tests",
            "gameversion": LIVE_VERSION,
        },
        "message": message,
    }))
}

pub fn jump(system: &str, id64: u64, timestamp: &str) -> Value {
    json!({
        "timestamp": timestamp,
        "event": "FSDJump",
        "StarSystem": system,
        "SystemAddress": id64,
        "Population": 250_000,
    })
}

pub fn controlled_frame(
    system: &str,
    id64: u64,
    timestamp: &str,
    power: &str,
    state: &str,
    progress: f64,
    reinforcement: u64,
    undermining: u64,
) -> Vec<u8> {
    let mut message = jump(system, id64, timestamp);
    message["ControllingPower"] = json!(power);
    message["Powers"] = json!([power]);
    message["PowerplayState"] = json!(state);
    message["PowerplayStateControlProgress"] = json!(progress);
    message["PowerplayStateReinforcement"] = json!(reinforcement);
    message["PowerplayStateUndermining"] = json!(undermining);
    journal_frame(message)
}

pub fn contested_frame(system: &str, id64: u64, timestamp: &str, entries: &[(&str, f64)]) -> Vec<u8> {
    let mut message = jump(system, id64, timestamp);
    message["PowerplayState"] = json!("Unoccupied");
    message["PowerplayConflictProgress"] = Value::Array(
        entries
            .iter()
            .map(|(power, progress)| json!({"Power": power, "ConflictProgress": progress}))
            .collect(),
    );
    journal_frame(message)
}

/// Pipeline over an in-memory cache with snipes captured in memory.
pub struct Harness {
    pub pipeline: IngestPipeline,
    pub log: Arc<MemorySnipeLog>,
}

impl Harness {
    pub fn new() -> Self {
        let log = Arc::new(MemorySnipeLog::new());
        let pipeline = IngestPipeline::new(
            &FeedConfig::default(),
            SnipeThresholds::default(),
            StateCache::in_memory(),
            log.clone(),
        );
        Self { pipeline, log }
    }

    pub fn cache(&self) -> &StateCache {
        self.pipeline.cache()
    }
}
