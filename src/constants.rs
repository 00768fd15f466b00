// MIT License - Copyright (c) 2021 TJForc
// DMP protocol constants and event vocabularies

use std::time::Duration;

/// Protocol framing bytes.
pub const STX: u8 = 0x02; // Start of frame (separates frames within one read)
pub const ACK: u8 = 0x06; // Acknowledgement sent back for push messages
pub const CR: u8 = 0x0D; // Line terminator
pub const LF: u8 = 0x0A;
pub const RS: u8 = 0x1E; // Record separator inside status / page payloads

/// Every outbound message starts with this prefix, followed by the account field.
pub const MESSAGE_PREFIX: char = '@';
/// Width of the right-justified account field on the wire.
pub const ACCOUNT_FIELD_WIDTH: usize = 5;

/// Default TCP port for the outbound command session.
pub const DEFAULT_PORT: u16 = 2011;
/// Default TCP port the realtime listener binds to.
pub const DEFAULT_LISTEN_PORT: u16 = 5001;
pub const DEFAULT_LISTEN_HOST: &str = "0.0.0.0";

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Minimum spacing between two commands sent to the same panel.
pub const DEFAULT_COMMAND_INTERVAL: Duration = Duration::from_millis(300);
/// Delay between writing a command and starting to drain the reply.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(300);
/// A reply is considered complete once no byte arrived within this window.
pub const DEFAULT_READ_IDLE_TIMEOUT: Duration = Duration::from_secs(1);
/// Upper bound on draining a single reply.
pub const DEFAULT_MAX_RESPONSE_TIME: Duration = Duration::from_secs(15);
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);
pub const MIN_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_LISTENER_POLL_INTERVAL: Duration = Duration::from_millis(250);
pub const DEFAULT_MAX_LINE_LEN: usize = 4096;

/// Number of `?WB` continuation requests issued after the initial zone query.
pub const STATUS_CONTINUATIONS: usize = 10;

/// Decrypted user-code records shorter than this are discarded.
pub const MIN_USER_CODE_RECORD_LEN: usize = 44;
/// User-profile records at least this long carry the rearm delay and a late name.
pub const LONG_PROFILE_RECORD_LEN: usize = 49;
/// A page record starting with this marker means more pages follow.
pub const MORE_PAGES_MARKER: &str = "----";

/// Response acknowledgement characters.
pub const ACK_CHAR: char = '+';
pub const NAK_CHAR: char = '-';

/// Offset of the acknowledgement character inside a frame (after `@` + account).
pub const ACK_OFFSET: usize = 6;
/// Offset of the two-character command code that follows the ack character.
pub const COMMAND_CODE_OFFSET: usize = 7;
/// Fragments shorter than this carry no decodable command.
pub const MIN_FRAME_LEN: usize = 8;

/// Command codes whose reply is only an ack/nak.
pub const CONTROL_COMMAND_CODES: [&str; 5] = ["!C", "!O", "!X", "!Y", "!Q"];
/// Authentication / disconnect replies carry no payload.
pub const AUTH_COMMAND_CODE: &str = "!V";

/// Status markers that may precede a status payload.
pub const STATUS_MARKERS: [&str; 12] = [
    "*WA", "!WA", "?WA", "*WB", "!WB", "?WB", "*WQ", "!WQ", "?WQ", "*WS", "!WS", "?WS",
];
pub const USER_CODES_MARKER: &str = "*P=";
pub const USER_PROFILES_MARKER: &str = "*U";

/// Area state literals found in status payloads.
pub const AREA_STATE_ARMED_AWAY: char = 'A';
pub const AREA_STATE_DISARMED: char = 'D';
pub const AREA_STATE_ARMED_STAY: char = 'S';

/// Zone state literals found in status payloads.
pub const ZONE_STATE_NORMAL: char = 'N';
pub const ZONE_STATE_OPEN: char = 'O';
pub const ZONE_STATE_SHORT: char = 'S';
pub const ZONE_STATE_BYPASSED: char = 'X';
pub const ZONE_STATE_LOW_BATTERY: char = 'L';
pub const ZONE_STATE_MISSING: char = 'M';

/// Declares a two-letter wire code enum with `from_code` / `as_str` / `description`.
macro_rules! wire_codes {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($variant:ident => $code:literal, $desc:literal;)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
        pub enum $name {
            $(
                #[doc = $desc]
                #[serde(rename = $code)]
                $variant,
            )+
        }

        impl $name {
            /// Parse the wire code, returning `None` for codes outside this vocabulary.
            pub fn from_code(code: &str) -> Option<Self> {
                match code {
                    $($code => Some(Self::$variant),)+
                    _ => None,
                }
            }

            /// The wire representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $code,)+
                }
            }

            pub fn description(&self) -> &'static str {
                match self {
                    $(Self::$variant => $desc,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_codes! {
    /// Event definition categories (the `Zx` field of a push message).
    EventCategory {
        ZoneAlarm => "Za", "Zone alarm";
        ZoneForceArm => "Zb", "Zone force armed";
        RealTimeStatus => "Zc", "Real-time status";
        WirelessLowBattery => "Zd", "Wireless low battery";
        Equipment => "Ze", "Equipment";
        ZoneFail => "Zf", "Zone fail";
        Holidays => "Zg", "Holidays";
        WirelessZoneMissing => "Zh", "Wireless zone missing";
        ZoneTamper => "Zi", "Zone tamper";
        DoorAccess => "Zj", "Door access";
        WalkTestVerify => "Zk", "Walk test verify";
        Schedules => "Zl", "Schedules";
        ServiceCode => "Zm", "Service code";
        ZoneTripCount => "Zp", "Zone trip count";
        ArmingStatus => "Zq", "Arming status";
        ZoneRestore => "Zr", "Zone restore";
        SystemMessage => "Zs", "System message";
        ZoneTrouble => "Zt", "Zone trouble";
        UserCodes => "Zu", "User codes";
        ZoneFault => "Zw", "Zone fault";
        ZoneBypass => "Zx", "Zone bypass";
        ZoneReset => "Zy", "Zone reset";
        Reserved => "Zz", "Reserved";
    }
}

impl EventCategory {
    /// Categories whose type code is a zone type.
    pub fn uses_zone_codes(&self) -> bool {
        matches!(
            self,
            Self::ZoneAlarm
                | Self::ZoneRestore
                | Self::ZoneTrouble
                | Self::ZoneFault
                | Self::ZoneBypass
                | Self::ZoneReset
        )
    }
}

wire_codes! {
    /// Zone type codes carried by zone-related categories.
    ZoneEventCode {
        Blank => "BL", "Blank";
        Fire => "FI", "Fire";
        Burglary => "BU", "Burglary";
        Supervisory => "SV", "Supervisory";
        Panic => "PN", "Panic";
        Emergency => "EM", "Emergency";
        Auxiliary1 => "A1", "Auxiliary 1";
        Auxiliary2 => "A2", "Auxiliary 2";
        CarbonMonoxide => "CO", "Carbon monoxide";
        VideoAlarm => "VA", "Video alarm";
    }
}

wire_codes! {
    ArmingEventCode {
        Disarmed => "OP", "Area disarmed";
        Armed => "CL", "Area armed";
        LateToArm => "LA", "Late to arm";
    }
}

wire_codes! {
    AccessEventCode {
        Granted => "DA", "Door access granted";
        DeniedArmed => "AA", "Denied: area armed";
        DeniedInvalidArea => "IA", "Denied: invalid area";
        DeniedInvalidTime => "IT", "Denied: invalid time";
        DeniedPrevious => "AP", "Denied: anti-passback";
        DeniedInvalidCode => "IC", "Denied: invalid code";
        DeniedInvalidLevel => "IL", "Denied: invalid level";
        DeniedWrongPin => "WP", "Denied: wrong PIN";
        DeniedInactiveUser => "IN", "Denied: inactive user";
    }
}

wire_codes! {
    RealTimeEventCode {
        DoorOpen => "DO", "Door open";
        DoorClosed => "DC", "Door closed";
        DoorHeldOpen => "HO", "Door held open";
        DoorForcedOpen => "FO", "Door forced open";
        OutputOn => "ON", "Output on";
        OutputOff => "OF", "Output off";
        OutputPulse => "PL", "Output pulse";
        OutputTemporal => "TP", "Output temporal";
        OutputMomentary => "MO", "Output momentary";
    }
}

wire_codes! {
    UserCodeEventCode {
        Added => "AD", "User code added";
        Changed => "CH", "User code changed";
        Deleted => "DE", "User code deleted";
        Inactive => "IN", "User code inactive";
    }
}

wire_codes! {
    ScheduleEventCode {
        Permanent => "PE", "Permanent schedule";
        Temporary => "TE", "Temporary schedule";
        Primary => "PR", "Primary schedule";
        Secondary => "SE", "Secondary schedule";
        ShiftOne => "S1", "Shift one";
        ShiftTwo => "S2", "Shift two";
        ShiftThree => "S3", "Shift three";
        ShiftFour => "S4", "Shift four";
    }
}

wire_codes! {
    HolidayEventCode {
        HolidayA => "HA", "Holiday A";
        HolidayB => "HB", "Holiday B";
        HolidayC => "HC", "Holiday C";
    }
}

wire_codes! {
    EquipmentEventCode {
        Repair => "RP", "Repair";
        Replace => "RL", "Replace";
        Add => "AD", "Add";
        Remove => "RM", "Remove";
        Adjust => "AJ", "Adjust";
        Test => "TS", "Test";
        SystemOptionsEeprom => "SO", "System options EEPROM";
        PrinterEeprom => "PR", "Printer EEPROM";
        LineCardEeprom => "LC", "Line card EEPROM";
        HostPort1Eeprom => "H1", "Host port 1 EEPROM";
        HostPort2Eeprom => "H2", "Host port 2 EEPROM";
        SerialPortEeprom => "SP", "Serial port EEPROM";
        Log => "LG", "Log";
        EntireEeprom => "EE", "Entire EEPROM";
        ContactId => "CD", "Contact ID";
    }
}

wire_codes! {
    ServiceUserEventCode {
        Start => "ST", "Service user start";
        Stop => "SP", "Service user stop";
    }
}

wire_codes! {
    /// Qualifiers that may ride along in frames of other categories.
    QualifierEventCode {
        Service => "DT", "Service";
        AllAreasArmed => "AC", "All areas armed";
        LocalAlarmOrRestore => "LC", "Local alarm or restore";
    }
}

/// Resolve a three-digit system message code (category `Zs`) to its text.
pub fn system_message_text(code: &str) -> Option<&'static str> {
    let text = match code {
        "000" => "AC Power Restored",
        "001" => "Standby Battery Restored",
        "002" => "Communications Line Restored",
        "003" => "Panel Tamper Restored",
        "004" => "Backup Communications Restored",
        "005" => "Panel Ground Restored",
        "006" => "System Not Armed by Scheduled Time",
        "007" => "Automatic Communication Test",
        "008" => "AC Power Failure",
        "009" => "Low Standby Battery",
        "010" => "Low Communications Signal",
        "011" => "Panel Tamper",
        "012" => "Backup Communications Failure",
        "013" => "Panel Ground Fault",
        "014" => "Non-Alarm Message Overflow",
        "015" => "Ambush/Silent Alarm",
        "018" => "Alarm Message Overflow",
        "023" => "Local Panel Test",
        "026" => "Auxiliary Fuse Trouble",
        "027" => "Auxiliary Fuse Restored",
        "028" => "Telephone Line 1 Fault",
        "029" => "Telephone Line 1 Restore",
        "030" => "Telephone Line 2 Fault",
        "031" => "Telephone Line 2 Restore",
        "032" => "Supervised Wireless Interference",
        "033" => "Early Morning Ambush",
        "034" => "Alarm Silenced",
        "035" => "Alarm Bell Normal",
        "038" => "Bell Circuit Trouble",
        "039" => "Bell Circuit Restored",
        "040" => "Fire Alarm Message Overflow",
        "041" => "Panic Zone Alarm Overflow",
        "042" => "Burglary Zone Alarm Overflow",
        "043" => "Bell Fuse Trouble",
        "044" => "Fire/Burglary Trouble Overflow",
        "045" => "Abort Signal Received",
        "046" => "Zone Swinger Automatically Bypassed",
        "047" => "Zone Swinger Automatically Reset",
        "048" => "Backup Battery Critical - Last Message Before Poweroff",
        "049" => "Cancel Signal Received",
        "050" => "Supervised Wireless Trouble",
        "051" => "Remote Programming",
        "053" => "Bell Fuse Restored",
        "054" => "Unsuccessful Remote Connect",
        "071" => "Time Request",
        "072" => "Network Trouble",
        "073" => "Network Restoral",
        "074" => "Panel Tamper During Armed State",
        "077" => "Unauthorized Entry",
        "078" => "System Recently Armed",
        "079" => "Signal During Opened Period",
        "080" => "Exit Error",
        "083" => "Remote Programming Complete",
        "084" => "Remote Command Received",
        "086" => "Local Programming",
        "087" => "Transmit Failed - Messages Not Sent",
        "088" => "Automatic Test - Troubled System",
        "089" => "Supervised Wireless Restored",
        "091" => "Services Requested",
        "092" => "No Arm/Disarm Activity",
        "093" => "User Activity Not Detected",
        "094" => "Activity Check Enabled",
        "095" => "Activity Check Disabled",
        "096" => "Alarm Verified",
        "097" => "Network Test OK",
        "101" => "Device Missing",
        "102" => "Device Restored",
        "121" => "Excessive Cellular Communication",
        "122" => "Cell Communication Suppressed: Excessive Data",
        _ => return None,
    };
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_category_codes() {
        assert_eq!(EventCategory::from_code("Zq"), Some(EventCategory::ArmingStatus));
        assert_eq!(EventCategory::from_code("Zs"), Some(EventCategory::SystemMessage));
        assert_eq!(EventCategory::from_code("ZZ"), None);
        assert_eq!(EventCategory::DoorAccess.as_str(), "Zj");
        assert!(EventCategory::ZoneBypass.uses_zone_codes());
        assert!(!EventCategory::ArmingStatus.uses_zone_codes());
    }

    #[test]
    fn test_codes_are_scoped_per_vocabulary() {
        // "AD" means different things depending on the category
        assert_eq!(UserCodeEventCode::from_code("AD"), Some(UserCodeEventCode::Added));
        assert_eq!(EquipmentEventCode::from_code("AD"), Some(EquipmentEventCode::Add));
        assert_eq!(ArmingEventCode::from_code("AD"), None);
    }

    #[test]
    fn test_system_message_lookup() {
        assert_eq!(system_message_text("008"), Some("AC Power Failure"));
        assert_eq!(system_message_text("122"), Some("Cell Communication Suppressed: Excessive Data"));
        assert_eq!(system_message_text("016"), None);
        assert_eq!(system_message_text(""), None);
    }
}
