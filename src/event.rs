// MIT License - Copyright (c) 2021 TJForc
// Realtime push messages and their classification

use serde::Serialize;

use crate::constants::{
    AccessEventCode, ArmingEventCode, EquipmentEventCode, EventCategory, HolidayEventCode,
    QualifierEventCode, RealTimeEventCode, ScheduleEventCode, ServiceUserEventCode,
    UserCodeEventCode, ZoneEventCode, system_message_text,
};

/// Separates the header and the fields of a push message.
const FIELD_SEPARATOR: char = '\\';
/// Splits a field value into number and name.
const NAME_QUOTE: char = '"';

/// A push line split into header and fields, before any vocabulary lookup.
///
/// Layout: `<account> <definition>\<key> <value>\<key> <value>\...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    pub account: String,
    /// Two-letter event definition (`Zq`, `Za`, ...), empty if absent
    pub definition: String,
    /// Two-letter type code from the `t` field
    pub type_code: Option<String>,
    pub fields: Vec<String>,
    pub raw: String,
}

impl PushMessage {
    pub fn parse(line: &str) -> Self {
        let raw = line.trim_matches(|c| c == '\r' || c == '\n').to_string();
        let (header, rest) = raw.split_once(FIELD_SEPARATOR).unwrap_or((raw.as_str(), ""));

        let tokens: Vec<&str> = header.split_whitespace().collect();
        let (account, definition) = match tokens.split_last() {
            Some((last, before)) if is_definition(last) => (before.concat(), last.to_string()),
            _ => (tokens.concat(), String::new()),
        };

        let fields: Vec<String> = rest
            .split(FIELD_SEPARATOR)
            .map(str::trim_start)
            .filter(|f| !f.trim().is_empty())
            .map(String::from)
            .collect();

        let type_code = field_value(&fields, "t")
            .map(|v| v.trim_start_matches(NAME_QUOTE).chars().take(2).collect::<String>())
            .filter(|code| !code.is_empty());

        Self {
            account,
            definition,
            type_code,
            fields,
            raw,
        }
    }

    /// Value of the first field introduced by `key` and a space, trimmed.
    pub fn field(&self, key: &str) -> Option<&str> {
        field_value(&self.fields, key)
    }
}

fn is_definition(token: &str) -> bool {
    let mut chars = token.chars();
    matches!(
        (chars.next(), chars.next(), chars.next()),
        (Some('Z'), Some(c), None) if c.is_ascii_lowercase()
    )
}

fn field_value<'a>(fields: &'a [String], key: &str) -> Option<&'a str> {
    fields.iter().find_map(|f| {
        f.strip_prefix(key)
            .and_then(|rest| rest.strip_prefix(' '))
            .map(str::trim)
    })
}

/// Split `001"Front Door` into `("001", Some("Front Door"))`.
fn split_number_name(value: &str) -> (String, Option<String>) {
    match value.split_once(NAME_QUOTE) {
        Some((number, name)) => (number.trim().to_string(), Some(name.trim().to_string())),
        None => (value.trim().to_string(), None),
    }
}

/// Type code resolved against the vocabulary its category selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "vocabulary", content = "code", rename_all = "snake_case")]
pub enum EventCode {
    Zone(ZoneEventCode),
    Arming(ArmingEventCode),
    Access(AccessEventCode),
    RealTime(RealTimeEventCode),
    UserCode(UserCodeEventCode),
    Schedule(ScheduleEventCode),
    Holiday(HolidayEventCode),
    Equipment(EquipmentEventCode),
    ServiceUser(ServiceUserEventCode),
    Qualifier(QualifierEventCode),
}

impl EventCode {
    /// Look up `code` in the vocabulary of `category`.
    pub fn resolve(category: EventCategory, code: &str) -> Option<Self> {
        if category.uses_zone_codes() {
            return ZoneEventCode::from_code(code).map(EventCode::Zone);
        }
        match category {
            EventCategory::ArmingStatus => ArmingEventCode::from_code(code).map(EventCode::Arming),
            EventCategory::RealTimeStatus => {
                RealTimeEventCode::from_code(code).map(EventCode::RealTime)
            }
            EventCategory::DoorAccess => AccessEventCode::from_code(code).map(EventCode::Access),
            EventCategory::UserCodes => {
                UserCodeEventCode::from_code(code).map(EventCode::UserCode)
            }
            EventCategory::Schedules => {
                ScheduleEventCode::from_code(code).map(EventCode::Schedule)
            }
            EventCategory::Holidays => HolidayEventCode::from_code(code).map(EventCode::Holiday),
            EventCategory::Equipment => {
                EquipmentEventCode::from_code(code).map(EventCode::Equipment)
            }
            EventCategory::ServiceCode => {
                ServiceUserEventCode::from_code(code).map(EventCode::ServiceUser)
            }
            // qualifiers sometimes ride along in other frames
            _ => QualifierEventCode::from_code(code).map(EventCode::Qualifier),
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            EventCode::Zone(c) => c.description(),
            EventCode::Arming(c) => c.description(),
            EventCode::Access(c) => c.description(),
            EventCode::RealTime(c) => c.description(),
            EventCode::UserCode(c) => c.description(),
            EventCode::Schedule(c) => c.description(),
            EventCode::Holiday(c) => c.description(),
            EventCode::Equipment(c) => c.description(),
            EventCode::ServiceUser(c) => c.description(),
            EventCode::Qualifier(c) => c.description(),
        }
    }
}

/// A classified panel-initiated event.
///
/// Unknown categories or type codes leave `category` / `code` empty; the raw
/// fields and line are always kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushEvent {
    pub account: String,
    pub definition: String,
    pub category: Option<EventCategory>,
    pub type_code: Option<String>,
    pub code: Option<EventCode>,
    pub area: Option<String>,
    pub area_name: Option<String>,
    pub zone: Option<String>,
    pub zone_name: Option<String>,
    pub device: Option<String>,
    pub device_name: Option<String>,
    pub user: Option<String>,
    pub user_name: Option<String>,
    pub system_code: Option<String>,
    pub system_text: Option<&'static str>,
    pub fields: Vec<String>,
    pub raw: String,
}

/// Classify one raw push line. Never fails.
pub fn classify(line: &str) -> PushEvent {
    PushEvent::from(PushMessage::parse(line))
}

impl From<PushMessage> for PushEvent {
    fn from(msg: PushMessage) -> Self {
        let category = EventCategory::from_code(&msg.definition);
        let code = match (category, msg.type_code.as_deref()) {
            (Some(category), Some(code)) => EventCode::resolve(category, code),
            _ => None,
        };

        let pair = |key: &str| match msg.field(key).map(split_number_name) {
            Some((number, name)) => (Some(number), name),
            None => (None, None),
        };
        let (area, area_name) = pair("a");
        let (zone, zone_name) = pair("z");
        let (device, device_name) = pair("v");
        let (user, user_name) = pair("u");

        let system_code = msg.field("s").map(String::from);
        let system_text = match (category, system_code.as_deref()) {
            (Some(EventCategory::SystemMessage), Some(code)) => system_message_text(code),
            _ => None,
        };

        Self {
            account: msg.account,
            definition: msg.definition,
            category,
            type_code: msg.type_code,
            code,
            area,
            area_name,
            zone,
            zone_name,
            device,
            device_name,
            user,
            user_name,
            system_code,
            system_text,
            fields: msg.fields,
            raw: msg.raw,
        }
    }
}

/// Type alias for the broadcast sender.
pub type EventSender = tokio::sync::broadcast::Sender<PushEvent>;

/// Type alias for the broadcast receiver.
pub type EventReceiver = tokio::sync::broadcast::Receiver<PushEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(capacity.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header_and_fields() {
        let msg = PushMessage::parse("    1 Zq\\t \"OP\\u 00001\"JOHN\\a 001\"Main Floor\\\r");
        assert_eq!(msg.account, "1");
        assert_eq!(msg.definition, "Zq");
        assert_eq!(msg.type_code.as_deref(), Some("OP"));
        assert_eq!(msg.fields.len(), 3);
        assert_eq!(msg.field("a"), Some("001\"Main Floor"));
        assert_eq!(msg.field("x"), None);
    }

    #[test]
    fn test_classify_arming_event() {
        let event = classify("12345 Zq\\t \"CL\\a 002\"Upstairs\\u 0007\"ANNA\\");
        assert_eq!(event.account, "12345");
        assert_eq!(event.category, Some(EventCategory::ArmingStatus));
        assert_eq!(event.code, Some(EventCode::Arming(ArmingEventCode::Armed)));
        assert_eq!(event.area.as_deref(), Some("002"));
        assert_eq!(event.area_name.as_deref(), Some("Upstairs"));
        assert_eq!(event.user.as_deref(), Some("0007"));
        assert_eq!(event.user_name.as_deref(), Some("ANNA"));
        assert_eq!(event.system_text, None);
    }

    #[test]
    fn test_classify_zone_event() {
        let event = classify("    1 Za\\t \"BU\\z 004\"Front Door\\a 1\\");
        assert_eq!(event.category, Some(EventCategory::ZoneAlarm));
        assert_eq!(event.code, Some(EventCode::Zone(ZoneEventCode::Burglary)));
        assert_eq!(event.zone.as_deref(), Some("004"));
        assert_eq!(event.zone_name.as_deref(), Some("Front Door"));
        // area without a quoted name
        assert_eq!(event.area.as_deref(), Some("1"));
        assert_eq!(event.area_name, None);
    }

    #[test]
    fn test_category_scopes_vocabulary() {
        // "AD" is valid for user codes and equipment, not for arming
        let user = classify("1 Zu\\t \"AD\\u 0003\"BOB\\");
        assert_eq!(user.code, Some(EventCode::UserCode(UserCodeEventCode::Added)));
        let equipment = classify("1 Ze\\t \"AD\\");
        assert_eq!(equipment.code, Some(EventCode::Equipment(EquipmentEventCode::Add)));
        let arming = classify("1 Zq\\t \"AD\\");
        assert_eq!(arming.code, None);
        assert_eq!(arming.type_code.as_deref(), Some("AD"));
        assert_eq!(arming.fields, vec!["t \"AD".to_string()]);
    }

    #[test]
    fn test_door_access_and_realtime() {
        let access = classify("1 Zj\\t \"DA\\v 001\"Lobby\\u 0002\"CARL\\");
        assert_eq!(access.code, Some(EventCode::Access(AccessEventCode::Granted)));
        assert_eq!(access.device.as_deref(), Some("001"));
        assert_eq!(access.device_name.as_deref(), Some("Lobby"));

        let realtime = classify("1 Zc\\t \"DO\\v 001\"Lobby\\");
        assert_eq!(realtime.code, Some(EventCode::RealTime(RealTimeEventCode::DoorOpen)));
    }

    #[test]
    fn test_qualifier_fallback() {
        let event = classify("1 Zb\\t \"AC\\");
        assert_eq!(
            event.code,
            Some(EventCode::Qualifier(QualifierEventCode::AllAreasArmed))
        );
    }

    #[test]
    fn test_system_message_text() {
        let event = classify("    1 Zs\\s 008\\");
        assert_eq!(event.category, Some(EventCategory::SystemMessage));
        assert_eq!(event.system_code.as_deref(), Some("008"));
        assert_eq!(event.system_text, Some("AC Power Failure"));

        let unknown = classify("    1 Zs\\s 999\\");
        assert_eq!(unknown.system_code.as_deref(), Some("999"));
        assert_eq!(unknown.system_text, None);

        // system text is only resolved for system messages
        let other = classify("    1 Zq\\s 008\\");
        assert_eq!(other.system_text, None);
    }

    #[test]
    fn test_unknown_category_keeps_raw() {
        let event = classify("1 Zn\\t \"XX\\a 1\\");
        assert_eq!(event.category, None);
        assert_eq!(event.definition, "Zn");
        assert_eq!(event.code, None);
        assert_eq!(event.area.as_deref(), Some("1"));
        assert_eq!(event.raw, "1 Zn\\t \"XX\\a 1\\");
    }

    #[test]
    fn test_garbage_never_fails() {
        let event = classify("");
        assert_eq!(event.account, "");
        assert_eq!(event.category, None);
        assert!(event.fields.is_empty());

        let event = classify("no separators at all");
        assert_eq!(event.definition, "");
        assert_eq!(event.account, "noseparatorsatall");
    }

    #[test]
    fn test_event_serializes() {
        let event = classify("1 Zq\\t \"OP\\a 1\"House\\");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["category"], "Zq");
        assert_eq!(json["code"]["vocabulary"], "arming");
        assert_eq!(json["code"]["code"], "OP");
        assert_eq!(json["area_name"], "House");
    }
}
