//! Data contracts shared by the Powerplay listener and its read clients.
//!
//! In memory a system's observation is a [`PowerplayRecord`] whose control
//! fields live in the [`SystemState`] union. On the wire (the cache value and
//! the snipe log dumps) the record is flattened into [`RecordDump`], the same
//! camelCase shape the map front-end reads.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Powers the stats aggregator seeds its per-power table with.
pub const KNOWN_POWERS: [&str; 12] = [
    "Aisling Duval",
    "Archon Delaine",
    "A. Lavigny-Duval",
    "Denton Patreus",
    "Edmund Mahon",
    "Felicia Winters",
    "Jerome Archer",
    "Li Yong-Rui",
    "Nakato Kaine",
    "Pranav Antal",
    "Yuri Grom",
    "Zemina Torval",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    Unoccupied,
    Exploited,
    Fortified,
    Stronghold,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Unoccupied => "Unoccupied",
            Tier::Exploited => "Exploited",
            Tier::Fortified => "Fortified",
            Tier::Stronghold => "Stronghold",
        }
    }

    /// Parses the journal's `PowerplayState` value. Unknown states yield `None`.
    pub fn from_journal(value: &str) -> Option<Tier> {
        match value {
            "Unoccupied" => Some(Tier::Unoccupied),
            "Exploited" => Some(Tier::Exploited),
            "Fortified" => Some(Tier::Fortified),
            "Stronghold" => Some(Tier::Stronghold),
            _ => None,
        }
    }

    pub fn is_occupied(self) -> bool {
        !matches!(self, Tier::Unoccupied)
    }

    /// The tier a controlled system falls to when it loses one level.
    pub fn demoted(self) -> Option<Tier> {
        match self {
            Tier::Stronghold => Some(Tier::Fortified),
            Tier::Fortified => Some(Tier::Exploited),
            _ => None,
        }
    }

    /// The tier a controlled system rises to when it gains one level.
    pub fn promoted(self) -> Option<Tier> {
        match self {
            Tier::Exploited => Some(Tier::Fortified),
            Tier::Fortified => Some(Tier::Stronghold),
            _ => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictProgress {
    pub power: String,
    pub progress: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlState {
    pub power: Option<String>,
    pub tier: Tier,
    pub progress: Option<f64>,
    pub reinforcement: Option<u64>,
    pub undermining: Option<u64>,
}

/// Powerplay situation of a system as reported by one observation.
///
/// A system is either being acquired (with a possibly empty list of power
/// progress entries) or controlled, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum SystemState {
    Contested(Vec<ConflictProgress>),
    Controlled(ControlState),
    Unoccupied,
    /// The observation carried no Powerplay fields.
    Unreported,
}

impl SystemState {
    /// Classifies flat, optional Powerplay fields into a state.
    pub fn classify(
        conflicts: Option<Vec<ConflictProgress>>,
        tier: Option<Tier>,
        power: Option<String>,
        progress: Option<f64>,
        reinforcement: Option<u64>,
        undermining: Option<u64>,
    ) -> SystemState {
        if let Some(conflicts) = conflicts {
            return SystemState::Contested(conflicts);
        }
        match tier {
            Some(tier) if tier.is_occupied() => SystemState::Controlled(ControlState {
                power,
                tier,
                progress,
                reinforcement,
                undermining,
            }),
            Some(_) => SystemState::Unoccupied,
            None => SystemState::Unreported,
        }
    }

    /// Reported tier; contested systems are unoccupied by definition.
    pub fn tier(&self) -> Option<Tier> {
        match self {
            SystemState::Contested(_) | SystemState::Unoccupied => Some(Tier::Unoccupied),
            SystemState::Controlled(control) => Some(control.tier),
            SystemState::Unreported => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleStart {
    pub start_progress: f64,
    pub start_bar: f64,
    pub start_tier: Tier,
}

impl CycleStart {
    /// Marker snapshot used when the previous cycle had no control state.
    pub fn unoccupied() -> Self {
        Self {
            start_progress: 0.0,
            start_bar: 0.0,
            start_tier: Tier::Unoccupied,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RecordDump", into = "RecordDump")]
pub struct PowerplayRecord {
    pub name: String,
    pub id64: u64,
    pub date: DateTime<Utc>,
    pub powers: Option<Vec<String>>,
    pub population: Option<u64>,
    pub state: SystemState,
    pub cycle_start: Option<CycleStart>,
    pub last_cycle_start: Option<CycleStart>,
}

impl PowerplayRecord {
    pub fn control(&self) -> Option<&ControlState> {
        match &self.state {
            SystemState::Controlled(control) => Some(control),
            _ => None,
        }
    }

    pub fn conflicts(&self) -> Option<&[ConflictProgress]> {
        match &self.state {
            SystemState::Contested(conflicts) => Some(conflicts),
            _ => None,
        }
    }

    pub fn tier(&self) -> Option<Tier> {
        self.state.tier()
    }

    pub fn controlling_power(&self) -> Option<&str> {
        self.control().and_then(|control| control.power.as_deref())
    }

    pub fn reinforcement(&self) -> Option<u64> {
        self.control().and_then(|control| control.reinforcement)
    }

    pub fn undermining(&self) -> Option<u64> {
        self.control().and_then(|control| control.undermining)
    }

    /// Acquisition progress reported for `power`, if this is a contested record.
    pub fn conflict_progress_for(&self, power: &str) -> Option<f64> {
        self.conflicts()?
            .iter()
            .find(|entry| entry.power == power)
            .map(|entry| entry.progress)
    }

    pub fn conflict_progress_sum(&self) -> f64 {
        self.conflicts()
            .map(|conflicts| conflicts.iter().map(|entry| entry.progress).sum())
            .unwrap_or(0.0)
    }

    /// True when the observation was made at or after `tick`.
    pub fn observed_since(&self, tick: DateTime<Utc>) -> bool {
        self.date >= tick
    }
}

/// Flat wire shape of a [`PowerplayRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordDump {
    pub date: DateTime<Utc>,
    pub name: String,
    pub id64: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controlling_power: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_conflict_progress: Option<Vec<ConflictProgress>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_state: Option<Tier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_state_control_progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_state_reinforcement: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_state_undermining: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub powers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub population: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_start: Option<CycleStart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cycle_start: Option<CycleStart>,
}

impl From<RecordDump> for PowerplayRecord {
    fn from(dump: RecordDump) -> Self {
        let state = SystemState::classify(
            dump.power_conflict_progress,
            dump.power_state,
            dump.controlling_power,
            dump.power_state_control_progress,
            dump.power_state_reinforcement,
            dump.power_state_undermining,
        );
        Self {
            name: dump.name,
            id64: dump.id64,
            date: dump.date,
            powers: dump.powers,
            population: dump.population,
            state,
            cycle_start: dump.cycle_start,
            last_cycle_start: dump.last_cycle_start,
        }
    }
}

impl From<PowerplayRecord> for RecordDump {
    fn from(record: PowerplayRecord) -> Self {
        let mut dump = RecordDump {
            date: record.date,
            name: record.name,
            id64: record.id64,
            controlling_power: None,
            power_conflict_progress: None,
            power_state: record.state.tier(),
            power_state_control_progress: None,
            power_state_reinforcement: None,
            power_state_undermining: None,
            powers: record.powers,
            population: record.population,
            cycle_start: record.cycle_start,
            last_cycle_start: record.last_cycle_start,
        };
        match record.state {
            SystemState::Contested(conflicts) => dump.power_conflict_progress = Some(conflicts),
            SystemState::Controlled(control) => {
                dump.controlling_power = control.power;
                dump.power_state_control_progress = control.progress;
                dump.power_state_reinforcement = control.reinforcement;
                dump.power_state_undermining = control.undermining;
            }
            SystemState::Unoccupied | SystemState::Unreported => {}
        }
        dump
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SnipeCategory {
    #[serde(rename = "Acquisition")]
    Acquisition,
    #[serde(rename = "EOC Acquisition")]
    EocAcquisition,
    #[serde(rename = "Undermining")]
    Undermining,
    #[serde(rename = "Reinforcement")]
    Reinforcement,
    #[serde(rename = "EOC Undermining")]
    EocUndermining,
    #[serde(rename = "EOC Reinforcement")]
    EocReinforcement,
}

impl SnipeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnipeCategory::Acquisition => "Acquisition",
            SnipeCategory::EocAcquisition => "EOC Acquisition",
            SnipeCategory::Undermining => "Undermining",
            SnipeCategory::Reinforcement => "Reinforcement",
            SnipeCategory::EocUndermining => "EOC Undermining",
            SnipeCategory::EocReinforcement => "EOC Reinforcement",
        }
    }

    pub fn is_end_of_cycle(&self) -> bool {
        matches!(
            self,
            SnipeCategory::EocAcquisition
                | SnipeCategory::EocUndermining
                | SnipeCategory::EocReinforcement
        )
    }
}

impl fmt::Display for SnipeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnipeEvent {
    pub system: String,
    pub category: SnipeCategory,
    pub power: String,
    pub amount: i64,
    pub previous: Option<PowerplayRecord>,
    pub current: PowerplayRecord,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerStats {
    pub reinforcement_cp: u64,
    pub undermining_cp: u64,
    pub undermining_after_decay_cp: u64,
    pub acquisition_cp: i64,
    pub progress_cp: i64,
    pub systems: u64,
    pub exploited: u64,
    pub fortified: u64,
    pub stronghold: u64,
    pub population: u64,
    pub updated_systems: u64,
    pub expected_acquisitions: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleStats {
    pub cycle: i64,
    pub all_powers: PowerStats,
    pub powers: BTreeMap<String, PowerStats>,
}

impl CycleStats {
    /// Empty stats for `cycle` with every known power present.
    pub fn seeded(cycle: i64) -> Self {
        Self {
            cycle,
            all_powers: PowerStats::default(),
            powers: KNOWN_POWERS
                .iter()
                .map(|power| (power.to_string(), PowerStats::default()))
                .collect(),
        }
    }

    pub fn power_mut(&mut self, power: &str) -> &mut PowerStats {
        self.powers.entry(power.to_string()).or_default()
    }
}
