// MIT License - Copyright (c) 2021 TJForc
// Command set and account field for the DMP wire protocol

use std::fmt;

use serde::Serialize;

use crate::constants::ACCOUNT_FIELD_WIDTH;
use crate::error::{DmpError, Result};

/// Panel account number.
///
/// Holds the trimmed, unpadded value. Padding to the 5-character wire field
/// happens only in [`AccountId::wire_field`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(account: &str) -> Result<Self> {
        let trimmed = account.trim();
        if trimmed.is_empty() || trimmed.chars().count() > ACCOUNT_FIELD_WIDTH {
            return Err(DmpError::Protocol(format!(
                "Account must be 1-{} characters, got {:?}",
                ACCOUNT_FIELD_WIDTH, account
            )));
        }
        if !trimmed.chars().all(|c| c.is_ascii_graphic()) {
            return Err(DmpError::Protocol(format!(
                "Account contains non-printable characters: {:?}",
                account
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The account right-justified and space-padded to the wire width.
    pub fn wire_field(&self) -> String {
        format!("{:>width$}", self.0, width = ACCOUNT_FIELD_WIDTH)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Output control modes for `!Q`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OutputMode {
    On,
    Off,
    Pulse,
    Momentary,
}

impl OutputMode {
    pub fn as_char(&self) -> char {
        match self {
            OutputMode::On => 'S',
            OutputMode::Off => 'O',
            OutputMode::Pulse => 'P',
            OutputMode::Momentary => 'M',
        }
    }

    /// Parse a user-facing mode name ("on", "off", "pulse", "momentary").
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "on" | "s" => Some(OutputMode::On),
            "off" | "o" => Some(OutputMode::Off),
            "pulse" | "p" => Some(OutputMode::Pulse),
            "momentary" | "m" => Some(OutputMode::Momentary),
            _ => None,
        }
    }
}

/// Flags carried by an arm command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArmOptions {
    /// Bypass zones that are faulted at arming time
    pub bypass_faulted: bool,
    /// Force arm bad zones
    pub force_arm: bool,
    /// Instant arming; `None` omits the flag from the frame
    pub instant: Option<bool>,
}

/// Commands that can be sent to a DMP panel.
///
/// Build these through the validating constructors ([`Command::arm`],
/// [`Command::bypass_zone`], ...). The codec re-validates before encoding, so
/// a hand-built variant with out-of-range values fails there instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `!V2<key>`: authenticate with the remote key.
    Auth { key: String },
    /// `!V0`: end the session.
    Disconnect,
    /// `!H`: keep-alive.
    KeepAlive,
    /// `!C<areas>,<bypass><force>[<instant>]`: arm the given areas.
    Arm { areas: Vec<u8>, options: ArmOptions },
    /// `!O<areas>`: disarm the given areas.
    Disarm { areas: Vec<u8> },
    /// `!X<zzz>`: bypass a zone.
    BypassZone { zone: u16 },
    /// `!Y<zzz>`: restore a bypassed zone.
    RestoreZone { zone: u16 },
    /// `!Q<ooo><mode>`: drive an output.
    Output { output: u16, mode: OutputMode },
    /// `!E001`: reset latched sensors.
    SensorReset,
    /// `?WA<aa>`: area status starting at an area.
    AreaStatus { area: u8 },
    /// `?WA`: next area status page.
    AreaStatusContinue,
    /// `?WB**Y<zzz>`: zone status starting at a zone.
    ZoneStatus { zone: u16 },
    /// `?WB`: next zone status page.
    ZoneStatusContinue,
    /// `?WQ<ooo>`: output status starting at an output.
    OutputStatus { output: u16 },
    /// `?WQ`: next output status page.
    OutputStatusContinue,
    /// `?WS`
    SystemStatus,
    /// `?P=<nnnn>`: user codes page starting at a user number.
    UserCodes { start: u16 },
    /// `?U<nnn>`: user profiles page starting at a profile number.
    UserProfiles { start: u16 },
    /// `?ZX1`
    MacSerial,
    /// `? `
    SoftwareVersion,
}

impl Command {
    pub fn auth(key: impl Into<String>) -> Result<Self> {
        Self::Auth { key: key.into() }.validated()
    }

    pub fn arm(areas: &[u8], options: ArmOptions) -> Result<Self> {
        Self::Arm {
            areas: areas.to_vec(),
            options,
        }
        .validated()
    }

    pub fn disarm(areas: &[u8]) -> Result<Self> {
        Self::Disarm {
            areas: areas.to_vec(),
        }
        .validated()
    }

    pub fn bypass_zone(zone: u16) -> Result<Self> {
        Self::BypassZone { zone }.validated()
    }

    pub fn restore_zone(zone: u16) -> Result<Self> {
        Self::RestoreZone { zone }.validated()
    }

    pub fn output(output: u16, mode: OutputMode) -> Result<Self> {
        Self::Output { output, mode }.validated()
    }

    pub fn area_status(area: u8) -> Result<Self> {
        Self::AreaStatus { area }.validated()
    }

    pub fn zone_status(zone: u16) -> Result<Self> {
        Self::ZoneStatus { zone }.validated()
    }

    pub fn output_status(output: u16) -> Result<Self> {
        Self::OutputStatus { output }.validated()
    }

    pub fn user_codes(start: u16) -> Result<Self> {
        Self::UserCodes { start }.validated()
    }

    pub fn user_profiles(start: u16) -> Result<Self> {
        Self::UserProfiles { start }.validated()
    }

    fn validated(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }

    /// Check every parameter against the ranges the panel accepts.
    pub fn validate(&self) -> Result<()> {
        match self {
            Command::Auth { key } => {
                if key.chars().any(|c| c.is_control()) {
                    return Err(DmpError::Protocol(
                        "Remote key must not contain control characters".into(),
                    ));
                }
                Ok(())
            }
            Command::Arm { areas, .. } | Command::Disarm { areas } => {
                if areas.is_empty() {
                    return Err(DmpError::Protocol("Area list must not be empty".into()));
                }
                if let Some(bad) = areas.iter().find(|&&a| a > 99) {
                    return Err(DmpError::Protocol(format!("Invalid area number: {}", bad)));
                }
                Ok(())
            }
            Command::AreaStatus { area } => check_range("area", *area as u32, 0, 99),
            Command::BypassZone { zone }
            | Command::RestoreZone { zone }
            | Command::ZoneStatus { zone } => check_range("zone", *zone as u32, 1, 999),
            Command::Output { output, .. } | Command::OutputStatus { output } => {
                check_range("output", *output as u32, 1, 999)
            }
            Command::UserCodes { start } => check_range("user", *start as u32, 0, 9999),
            Command::UserProfiles { start } => check_range("profile", *start as u32, 0, 999),
            _ => Ok(()),
        }
    }

    /// Two-character opcode, as echoed back after the ack character.
    pub fn code(&self) -> &'static str {
        match self {
            Command::Auth { .. } | Command::Disconnect => "!V",
            Command::KeepAlive => "!H",
            Command::Arm { .. } => "!C",
            Command::Disarm { .. } => "!O",
            Command::BypassZone { .. } => "!X",
            Command::RestoreZone { .. } => "!Y",
            Command::Output { .. } => "!Q",
            Command::SensorReset => "!E",
            Command::AreaStatus { .. } | Command::AreaStatusContinue => "?WA",
            Command::ZoneStatus { .. } | Command::ZoneStatusContinue => "?WB",
            Command::OutputStatus { .. } | Command::OutputStatusContinue => "?WQ",
            Command::SystemStatus => "?WS",
            Command::UserCodes { .. } => "?P=",
            Command::UserProfiles { .. } => "?U",
            Command::MacSerial => "?ZX1",
            Command::SoftwareVersion => "? ",
        }
    }

    /// Convert the command to its wire body (without account or terminator).
    pub fn to_wire_string(&self) -> String {
        match self {
            Command::Auth { key } => format!("!V2{}", key),
            Command::Disconnect => "!V0".to_string(),
            Command::KeepAlive => "!H".to_string(),
            Command::Arm { areas, options } => {
                let instant = match options.instant {
                    Some(true) => "Y",
                    Some(false) => "N",
                    None => "",
                };
                format!(
                    "!C{},{}{}{}",
                    join_areas(areas),
                    yes_no(options.bypass_faulted),
                    yes_no(options.force_arm),
                    instant
                )
            }
            Command::Disarm { areas } => format!("!O{}", join_areas(areas)),
            Command::BypassZone { zone } => format!("!X{:03}", zone),
            Command::RestoreZone { zone } => format!("!Y{:03}", zone),
            Command::Output { output, mode } => format!("!Q{:03}{}", output, mode.as_char()),
            Command::SensorReset => "!E001".to_string(),
            Command::AreaStatus { area } => format!("?WA{:02}", area),
            Command::AreaStatusContinue => "?WA".to_string(),
            Command::ZoneStatus { zone } => format!("?WB**Y{:03}", zone),
            Command::ZoneStatusContinue => "?WB".to_string(),
            Command::OutputStatus { output } => format!("?WQ{:03}", output),
            Command::OutputStatusContinue => "?WQ".to_string(),
            Command::SystemStatus => "?WS".to_string(),
            Command::UserCodes { start } => format!("?P={:04}", start),
            Command::UserProfiles { start } => format!("?U{:03}", start),
            Command::MacSerial => "?ZX1".to_string(),
            Command::SoftwareVersion => "? ".to_string(),
        }
    }

    /// Log-safe form of the wire body; the remote key is masked.
    pub fn redacted(&self) -> String {
        match self {
            Command::Auth { .. } => "!V2****".to_string(),
            other => other.to_wire_string(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

fn check_range(what: &str, value: u32, min: u32, max: u32) -> Result<()> {
    if value < min || value > max {
        return Err(DmpError::Protocol(format!(
            "Invalid {} number: {} (expected {}-{})",
            what, value, min, max
        )));
    }
    Ok(())
}

fn join_areas(areas: &[u8]) -> String {
    areas.iter().map(|a| format!("{:02}", a)).collect()
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "Y" } else { "N" }
}
