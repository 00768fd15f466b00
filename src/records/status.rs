// MIT License - Copyright (c) 2021 TJForc
// Area and zone status records

use std::collections::BTreeMap;

use serde::Serialize;

use super::{char_slice, char_tail};
use crate::constants::{
    AREA_STATE_ARMED_AWAY, AREA_STATE_ARMED_STAY, AREA_STATE_DISARMED, ZONE_STATE_BYPASSED,
    ZONE_STATE_LOW_BATTERY, ZONE_STATE_MISSING, ZONE_STATE_NORMAL, ZONE_STATE_OPEN,
    ZONE_STATE_SHORT,
};

/// Status records shorter than this carry no state character.
const MIN_STATUS_RECORD_LEN: usize = 5;

/// Area arming state from a status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AreaState {
    #[serde(rename = "A")]
    ArmedAway,
    #[serde(rename = "D")]
    Disarmed,
    #[serde(rename = "S")]
    ArmedStay,
    #[serde(rename = "unknown")]
    Unknown,
}

impl AreaState {
    pub fn from_char(c: char) -> Self {
        match c {
            AREA_STATE_ARMED_AWAY => AreaState::ArmedAway,
            AREA_STATE_DISARMED => AreaState::Disarmed,
            AREA_STATE_ARMED_STAY => AreaState::ArmedStay,
            _ => AreaState::Unknown,
        }
    }

    pub fn is_armed(&self) -> bool {
        matches!(self, AreaState::ArmedAway | AreaState::ArmedStay)
    }
}

/// Zone state from a status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ZoneState {
    #[serde(rename = "N")]
    Normal,
    #[serde(rename = "O")]
    Open,
    #[serde(rename = "S")]
    Short,
    #[serde(rename = "X")]
    Bypassed,
    #[serde(rename = "L")]
    LowBattery,
    #[serde(rename = "M")]
    Missing,
    #[serde(rename = "unknown")]
    Unknown,
}

impl ZoneState {
    pub fn from_char(c: char) -> Self {
        match c {
            ZONE_STATE_NORMAL => ZoneState::Normal,
            ZONE_STATE_OPEN => ZoneState::Open,
            ZONE_STATE_SHORT => ZoneState::Short,
            ZONE_STATE_BYPASSED => ZoneState::Bypassed,
            ZONE_STATE_LOW_BATTERY => ZoneState::LowBattery,
            ZONE_STATE_MISSING => ZoneState::Missing,
            _ => ZoneState::Unknown,
        }
    }

    /// Open or shorted zones are faulted.
    pub fn is_faulted(&self) -> bool {
        matches!(self, ZoneState::Open | ZoneState::Short)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AreaStatus {
    /// Area number, trimmed ("1")
    pub number: String,
    pub state: AreaState,
    pub name: String,
}

impl AreaStatus {
    /// Parse an `A<nnn><state><name>` record. Returns `None` if too short or unnumbered.
    pub fn parse(record: &str) -> Option<Self> {
        if record.chars().count() < MIN_STATUS_RECORD_LEN {
            return None;
        }
        let number = char_slice(record, 1, 4).trim();
        if number.is_empty() {
            return None;
        }
        let state = char_slice(record, 4, 5).chars().next().map(AreaState::from_char)?;
        Some(Self {
            number: number.to_string(),
            state,
            name: char_tail(record, 5).trim().to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneStatus {
    /// Zone number as sent by the panel ("001")
    pub number: String,
    pub state: ZoneState,
    pub name: String,
}

impl ZoneStatus {
    /// Parse an `L<zzz><state><name>` record.
    pub fn parse(record: &str) -> Option<Self> {
        if record.chars().count() < MIN_STATUS_RECORD_LEN {
            return None;
        }
        let state = char_slice(record, 4, 5).chars().next().map(ZoneState::from_char)?;
        Some(Self {
            number: char_slice(record, 1, 4).to_string(),
            state,
            name: char_tail(record, 5).trim().to_string(),
        })
    }
}

/// Merged view of all area and zone states seen across status pages.
///
/// Later records overwrite earlier ones with the same number; nothing is
/// ever removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub areas: BTreeMap<String, AreaStatus>,
    pub zones: BTreeMap<String, ZoneStatus>,
}

impl StatusSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty() && self.zones.is_empty()
    }

    pub fn upsert_area(&mut self, area: AreaStatus) {
        self.areas.insert(area.number.clone(), area);
    }

    pub fn upsert_zone(&mut self, zone: ZoneStatus) {
        self.zones.insert(zone.number.clone(), zone);
    }

    /// Merge another snapshot into this one; `other` wins on overlapping keys.
    pub fn merge(&mut self, other: StatusSnapshot) {
        self.areas.extend(other.areas);
        self.zones.extend(other.zones);
    }

    pub fn area(&self, number: &str) -> Option<&AreaStatus> {
        self.areas.get(number)
    }

    pub fn zone(&self, number: &str) -> Option<&ZoneStatus> {
        self.zones.get(number)
    }
}
