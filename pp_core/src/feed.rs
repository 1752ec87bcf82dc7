//! Raw feed frame → [`PowerplayRecord`] candidate.
//!
//! A frame is a zlib-compressed JSON envelope. The normalizer owns the game
//! version window; every other step is a pure function of the frame.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io::{self, Read};

use chrono::{DateTime, Utc};
use flate2::read::ZlibDecoder;
use pp_schema::{ConflictProgress, PowerplayRecord, SystemState, Tier};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::FeedConfig;

/// Control progress above this value has wrapped past `u32::MAX` control points.
pub const OVERFLOW_THRESHOLD: f64 = 4000.0;
const WRAP_SPAN: f64 = 4_294_967_296.0;
const EXPLOITED_OVERFLOW_SCALE: f64 = 349_999.0;
const FORTIFIED_OVERFLOW_SCALE: f64 = 650_000.0;
const STRONGHOLD_OVERFLOW_SCALE: f64 = 1_000_000.0;
const FALLBACK_OVERFLOW_SCALE: f64 = 120_000.0;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to inflate frame: {0}")]
    Inflate(#[from] io::Error),
    #[error("failed to decode frame json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("feed transport error: {0}")]
    Transport(String),
}

/// Why a frame did not produce a candidate record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    Undecodable,
    ForeignSchema,
    VersionMismatch,
    IgnoredEvent,
    Malformed,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::Undecodable => "undecodable",
            Rejection::ForeignSchema => "foreign_schema",
            Rejection::VersionMismatch => "version_mismatch",
            Rejection::IgnoredEvent => "ignored_event",
            Rejection::Malformed => "malformed",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "$schemaRef")]
    schema_ref: String,
    #[serde(default)]
    header: EnvelopeHeader,
    #[serde(default)]
    message: Value,
}

#[derive(Debug, Default, Deserialize)]
struct EnvelopeHeader {
    #[serde(default, rename = "gameversion")]
    game_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct JournalMessage {
    #[serde(rename = "timestamp")]
    timestamp: DateTime<Utc>,
    star_system: String,
    system_address: u64,
    #[serde(default)]
    controlling_power: Option<String>,
    #[serde(default)]
    powers: Option<Vec<String>>,
    #[serde(default)]
    powerplay_state: Option<String>,
    #[serde(default)]
    powerplay_state_control_progress: Option<f64>,
    #[serde(default)]
    powerplay_state_reinforcement: Option<u64>,
    #[serde(default)]
    powerplay_state_undermining: Option<u64>,
    #[serde(default)]
    powerplay_conflict_progress: Option<Vec<JournalConflict>>,
    #[serde(default)]
    population: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct JournalConflict {
    power: String,
    conflict_progress: f64,
}

/// Inflates and parses one frame into its JSON envelope.
pub fn decode_frame(frame: &[u8]) -> Result<Value, FeedError> {
    let mut decoder = ZlibDecoder::new(frame);
    let mut json = Vec::new();
    decoder.read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}

pub fn overflow_scale(tier: Option<Tier>) -> f64 {
    match tier {
        Some(Tier::Exploited) => EXPLOITED_OVERFLOW_SCALE,
        Some(Tier::Fortified) => FORTIFIED_OVERFLOW_SCALE,
        Some(Tier::Stronghold) => STRONGHOLD_OVERFLOW_SCALE,
        _ => FALLBACK_OVERFLOW_SCALE,
    }
}

/// Undoes the journal's unsigned wrap-around of negative control progress.
pub fn correct_overflow(progress: f64, tier: Option<Tier>) -> f64 {
    if progress > OVERFLOW_THRESHOLD {
        progress - WRAP_SPAN / overflow_scale(tier)
    } else {
        progress
    }
}

/// Rolling mode of recently seen live game versions.
#[derive(Debug, Clone)]
pub struct VersionTracker {
    window: VecDeque<String>,
    capacity: usize,
    live_prefix: String,
    required: String,
}

impl VersionTracker {
    pub fn new(capacity: usize, live_prefix: &str, seed_version: &str, seed_count: usize) -> Self {
        let capacity = capacity.max(1);
        let window: VecDeque<String> = std::iter::repeat(seed_version.to_string())
            .take(seed_count.min(capacity))
            .collect();
        Self {
            window,
            capacity,
            live_prefix: live_prefix.to_string(),
            required: seed_version.to_string(),
        }
    }

    pub fn from_config(config: &FeedConfig) -> Self {
        Self::new(
            config.version_window,
            &config.live_version_prefix,
            &config.seed_version,
            config.seed_count,
        )
    }

    pub fn required(&self) -> &str {
        &self.required
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Adds a live version to the window. Returns the new mode when it changed.
    pub fn observe(&mut self, version: Option<&str>) -> Option<&str> {
        let version = version.filter(|version| version.starts_with(&self.live_prefix))?;
        self.window.push_back(version.to_string());
        while self.window.len() > self.capacity {
            self.window.pop_front();
        }

        let mode = self.mode()?;
        if mode == self.required {
            return None;
        }
        self.required = mode;
        Some(&self.required)
    }

    pub fn accepts(&self, version: Option<&str>) -> bool {
        version == Some(self.required.as_str())
    }

    fn mode(&self) -> Option<String> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        let mut first_seen: Vec<&str> = Vec::new();
        for version in &self.window {
            let count = counts.entry(version.as_str()).or_insert(0);
            if *count == 0 {
                first_seen.push(version.as_str());
            }
            *count += 1;
        }

        let mut best: Option<(&str, usize)> = None;
        for version in first_seen {
            let count = counts.get(version).copied().unwrap_or(0);
            if best.map_or(true, |(_, best_count)| count > best_count) {
                best = Some((version, count));
            }
        }
        best.map(|(version, _)| version.to_string())
    }
}

pub struct FeedNormalizer {
    schema_ref: String,
    events: Vec<String>,
    versions: VersionTracker,
}

impl FeedNormalizer {
    pub fn new(config: &FeedConfig) -> Self {
        Self {
            schema_ref: config.schema_ref.clone(),
            events: config.events.clone(),
            versions: VersionTracker::from_config(config),
        }
    }

    pub fn versions(&self) -> &VersionTracker {
        &self.versions
    }

    pub fn normalize(&mut self, frame: &[u8]) -> Result<PowerplayRecord, Rejection> {
        let envelope = decode_frame(frame)
            .and_then(|value| Ok(serde_json::from_value::<Envelope>(value)?))
            .map_err(|err| {
                tracing::trace!(target: "powerplay::feed", error = %err, "frame.undecodable");
                Rejection::Undecodable
            })?;

        if envelope.schema_ref != self.schema_ref {
            return Err(Rejection::ForeignSchema);
        }

        let version = envelope.header.game_version.as_deref();
        if let Some(mode) = self.versions.observe(version) {
            tracing::info!(target: "powerplay::feed", version = mode, "feed.version_mode_changed");
        }
        if !self.versions.accepts(version) {
            return Err(Rejection::VersionMismatch);
        }

        let event = envelope
            .message
            .get("event")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if !self.events.iter().any(|accepted| accepted == event) {
            return Err(Rejection::IgnoredEvent);
        }

        let message: JournalMessage = serde_json::from_value(envelope.message).map_err(|err| {
            tracing::debug!(target: "powerplay::feed", error = %err, "frame.malformed");
            Rejection::Malformed
        })?;
        Ok(project(message))
    }
}

fn project(message: JournalMessage) -> PowerplayRecord {
    let tier = message.powerplay_state.as_deref().and_then(Tier::from_journal);
    let progress = message
        .powerplay_state_control_progress
        .map(|progress| correct_overflow(progress, tier));
    let conflicts = message.powerplay_conflict_progress.map(|entries| {
        entries
            .into_iter()
            .map(|entry| ConflictProgress {
                power: entry.power,
                progress: entry.conflict_progress,
            })
            .collect()
    });

    PowerplayRecord {
        name: message.star_system,
        id64: message.system_address,
        date: message.timestamp,
        powers: message.powers,
        population: message.population,
        state: SystemState::classify(
            conflicts,
            tier,
            message.controlling_power,
            progress,
            message.powerplay_state_reinforcement,
            message.powerplay_state_undermining,
        ),
        cycle_start: None,
        last_cycle_start: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{write::ZlibEncoder, Compression};
    use serde_json::json;
    use std::io::Write;

    fn frame(value: Value) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(value.to_string().as_bytes())
            .unwrap();
        encoder.finish().unwrap()
    }

    fn journal(version: Option<&str>, message: Value) -> Vec<u8> {
        let mut header = json!({"uploaderID": "test", "softwareName": "test"});
        if let Some(version) = version {
            header["gameversion"] = json!(version);
        }
        frame(json!({
            "$schemaRef": "https://eddn.edcd.io/schemas/journal/1",
            "header": header,
            "message": message,
        }))
    }

    fn fsd_jump() -> Value {
        json!({
            "timestamp": "2026-02-11T10:00:00Z",
            "event": "FSDJump",
            "StarSystem": "Sol",
            "SystemAddress": 10477373803u64,
            "ControllingPower": "Jerome Archer",
            "Powers": ["Jerome Archer", "Felicia Winters"],
            "PowerplayState": "Stronghold",
            "PowerplayStateControlProgress": 0.4,
            "PowerplayStateReinforcement": 1200,
            "PowerplayStateUndermining": 300,
            "Population": 22780919531u64
        })
    }

    fn normalizer() -> FeedNormalizer {
        FeedNormalizer::new(&FeedConfig::default())
    }

    #[test]
    fn projects_controlled_jump() {
        let record = normalizer()
            .normalize(&journal(Some("4.2.0.0"), fsd_jump()))
            .unwrap();
        assert_eq!(record.name, "Sol");
        assert_eq!(record.id64, 10477373803);
        assert_eq!(record.tier(), Some(Tier::Stronghold));
        assert_eq!(record.controlling_power(), Some("Jerome Archer"));
        assert_eq!(record.reinforcement(), Some(1200));
        assert_eq!(record.population, Some(22780919531));
        assert!(record.cycle_start.is_none());
    }

    #[test]
    fn projects_conflict_list_as_contested() {
        let record = normalizer()
            .normalize(&journal(
                Some("4.2.0.0"),
                json!({
                    "timestamp": "2026-02-11T10:00:00Z",
                    "event": "Location",
                    "StarSystem": "Contest",
                    "SystemAddress": 7,
                    "PowerplayState": "Unoccupied",
                    "PowerplayConflictProgress": [
                        {"Power": "Aisling Duval", "ConflictProgress": 1.11}
                    ]
                }),
            ))
            .unwrap();
        assert_eq!(record.conflict_progress_for("Aisling Duval"), Some(1.11));
    }

    #[test]
    fn rejects_in_pipeline_order() {
        let mut normalizer = normalizer();
        assert_eq!(
            normalizer.normalize(b"definitely not zlib"),
            Err(Rejection::Undecodable)
        );
        assert_eq!(
            normalizer.normalize(&frame(json!({
                "$schemaRef": "https://eddn.edcd.io/schemas/commodity/3",
                "header": {"gameversion": "4.2.0.0"},
                "message": {}
            }))),
            Err(Rejection::ForeignSchema)
        );
        assert_eq!(
            normalizer.normalize(&journal(None, fsd_jump())),
            Err(Rejection::VersionMismatch)
        );
        let mut docked = fsd_jump();
        docked["event"] = json!("Docked");
        assert_eq!(
            normalizer.normalize(&journal(Some("4.2.0.0"), docked)),
            Err(Rejection::IgnoredEvent)
        );
        assert_eq!(
            normalizer.normalize(&journal(
                Some("4.2.0.0"),
                json!({"event": "FSDJump", "StarSystem": "Nowhere"})
            )),
            Err(Rejection::Malformed)
        );
    }

    #[test]
    fn legacy_versions_never_enter_the_window() {
        let mut normalizer = normalizer();
        for _ in 0..20 {
            let _ = normalizer.normalize(&journal(Some("3.8.0.407"), fsd_jump()));
        }
        assert_eq!(normalizer.versions().required(), "4.2.0.0");
        assert_eq!(normalizer.versions().len(), 5);
    }

    #[test]
    fn mode_follows_majority_and_breaks_ties_by_first_seen() {
        let mut tracker = VersionTracker::new(200, "4.", "4.2.0.0", 5);
        for _ in 0..4 {
            assert_eq!(tracker.observe(Some("4.2.1.0")), None);
        }
        // Five apiece: the seed was seen first.
        assert_eq!(tracker.observe(Some("4.2.1.0")), None);
        assert!(tracker.accepts(Some("4.2.0.0")));
        assert_eq!(tracker.observe(Some("4.2.1.0")), Some("4.2.1.0"));
        assert!(!tracker.accepts(Some("4.2.0.0")));
        assert!(!tracker.accepts(None));
    }

    #[test]
    fn window_evicts_oldest_entries() {
        let mut tracker = VersionTracker::new(3, "4.", "4.2.0.0", 5);
        assert_eq!(tracker.len(), 3);
        tracker.observe(Some("4.3.0.0"));
        tracker.observe(Some("4.3.0.0"));
        assert_eq!(tracker.len(), 3);
        assert_eq!(tracker.required(), "4.3.0.0");
    }

    #[test]
    fn overflowed_progress_is_unwrapped() {
        let wrapped = 4_294_967_296.0 / 349_999.0 - 0.1;
        assert!((correct_overflow(wrapped, Some(Tier::Exploited)) + 0.1).abs() < 1e-9);
        assert_eq!(correct_overflow(0.7, Some(Tier::Fortified)), 0.7);

        let mut message = fsd_jump();
        message["PowerplayState"] = json!("Fortified");
        message["PowerplayStateControlProgress"] = json!(4_294_967_296.0 / 650_000.0 - 0.25);
        let record = normalizer()
            .normalize(&journal(Some("4.2.0.0"), message))
            .unwrap();
        let progress = record.control().and_then(|control| control.progress).unwrap();
        assert!((progress + 0.25).abs() < 1e-9);
    }
}
