// MIT License - Copyright (c) 2021 TJForc
// Frame encoder and reply decoder

use serde::Serialize;
use tracing::{debug, trace};

use crate::constants::{
    ACK_CHAR, ACK_OFFSET, AUTH_COMMAND_CODE, COMMAND_CODE_OFFSET, CONTROL_COMMAND_CODES, CR,
    MESSAGE_PREFIX, MIN_FRAME_LEN, MORE_PAGES_MARKER, NAK_CHAR, RS, STATUS_MARKERS, STX,
    USER_CODES_MARKER, USER_PROFILES_MARKER,
};
use crate::crypto::UserCodeCipher;
use crate::error::{DmpError, Result};
use crate::protocol::{AccountId, Command};
use crate::records::{
    AreaStatus, RecordPage, StatusSnapshot, UserCodePage, UserCodeRecord, UserProfilePage,
    UserProfileRecord, ZoneStatus, char_slice,
};

/// Outcome of decoding one reply buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Response {
    Ack,
    Nak,
    Status(StatusSnapshot),
    UserCodes(UserCodePage),
    UserProfiles(UserProfilePage),
    /// Nothing decodable, the normal reply to auth and keep-alive.
    NoData,
}

impl Response {
    pub fn is_ack(&self) -> bool {
        matches!(self, Response::Ack)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Response::Ack => "ack",
            Response::Nak => "nak",
            Response::Status(_) => "status",
            Response::UserCodes(_) => "user_codes",
            Response::UserProfiles(_) => "user_profiles",
            Response::NoData => "no_data",
        }
    }
}

/// Encodes commands for one account and decodes the panel's replies.
#[derive(Debug, Clone)]
pub struct DmpCodec {
    account: AccountId,
    cipher: UserCodeCipher,
}

impl DmpCodec {
    pub fn new(account: AccountId, remote_key: &str) -> Self {
        let cipher = UserCodeCipher::new(account.as_str(), remote_key);
        Self { account, cipher }
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    /// Build `@<account field><body>\r` for a command.
    pub fn encode(&self, command: &Command) -> Result<Vec<u8>> {
        command.validate()?;
        let frame = format!(
            "{}{}{}{}",
            MESSAGE_PREFIX,
            self.account.wire_field(),
            command.to_wire_string(),
            CR as char
        );
        debug!("Encoded command: {}{}{}", MESSAGE_PREFIX, self.account.wire_field(), command);
        Ok(frame.into_bytes())
    }

    /// Decode everything read for one command.
    ///
    /// Control acknowledgements and user pages return on the first frame
    /// that carries them. Status frames are merged across the whole buffer.
    pub fn decode(&self, data: &[u8]) -> Result<Response> {
        if data.is_empty() {
            return Ok(Response::NoData);
        }

        let text = std::str::from_utf8(data).map_err(|e| DmpError::InvalidResponse {
            details: format!("reply is not valid text: {}", e),
        })?;
        debug!("Decoding reply ({} bytes)", data.len());

        let mut snapshot = StatusSnapshot::new();
        let mut has_status = false;

        for frame in text.split(STX as char) {
            if frame.chars().count() < MIN_FRAME_LEN {
                continue;
            }
            trace!("Frame: {:?}", frame);

            let ack = frame.chars().nth(ACK_OFFSET);
            let code = char_slice(frame, COMMAND_CODE_OFFSET, COMMAND_CODE_OFFSET + 2);

            if code == AUTH_COMMAND_CODE {
                continue;
            }

            if CONTROL_COMMAND_CODES.contains(&code) {
                match ack {
                    Some(ACK_CHAR) => return Ok(Response::Ack),
                    Some(NAK_CHAR) => return Ok(Response::Nak),
                    _ => {}
                }
            }

            if let Some(pos) = earliest_status_marker(frame) {
                let payload = &frame[pos + 3..];
                if !payload.is_empty() {
                    parse_status_payload(payload, &mut snapshot);
                    has_status = true;
                }
            }

            if let Some((_, rest)) = frame.split_once(USER_CODES_MARKER) {
                return Ok(Response::UserCodes(self.parse_user_codes(rest)));
            }

            if let Some((_, rest)) = frame.split_once(USER_PROFILES_MARKER) {
                return Ok(Response::UserProfiles(parse_user_profiles(rest)));
            }
        }

        if has_status {
            debug!(
                "Parsed status: {} areas, {} zones",
                snapshot.areas.len(),
                snapshot.zones.len()
            );
            return Ok(Response::Status(snapshot));
        }

        Ok(Response::NoData)
    }

    fn parse_user_codes(&self, data: &str) -> UserCodePage {
        let page = parse_page(data, |item| UserCodeRecord::parse(&self.cipher.decrypt(item)));
        debug!("Parsed {} user codes (more: {})", page.records.len(), page.has_more);
        page
    }
}

/// Byte position of the first status marker in a frame, whichever marker it is.
fn earliest_status_marker(frame: &str) -> Option<usize> {
    STATUS_MARKERS
        .iter()
        .filter_map(|marker| frame.find(marker))
        .min()
}

/// Parse `A`/`L` records separated by 0x1E into the snapshot.
fn parse_status_payload(payload: &str, snapshot: &mut StatusSnapshot) {
    if payload.starts_with("-\r") {
        return;
    }

    for item in payload.split(RS as char) {
        match item.chars().next() {
            Some('A') => {
                if let Some(area) = AreaStatus::parse(item) {
                    snapshot.upsert_area(area);
                }
            }
            Some('L') => {
                if let Some(zone) = ZoneStatus::parse(item) {
                    snapshot.upsert_zone(zone);
                }
            }
            _ => {}
        }
    }
}

fn parse_user_profiles(data: &str) -> UserProfilePage {
    parse_page(data, |item| Some(UserProfileRecord::parse(item)))
}

/// Split a page payload, honouring the `----` continuation marker.
///
/// The cursor tracks the last record that parsed; dropped records leave it
/// and the continuation flag untouched.
fn parse_page<T, F>(data: &str, mut parse: F) -> RecordPage<T>
where
    F: FnMut(&str) -> Option<T>,
    T: NumberedRecord,
{
    let mut page = RecordPage::default();
    for item in data.split(RS as char) {
        let item = item.trim_end_matches(CR as char);
        if item.is_empty() {
            continue;
        }
        if item.starts_with(MORE_PAGES_MARKER) {
            page.has_more = true;
            continue;
        }
        if let Some(record) = parse(item) {
            page.last_number = Some(record.number().to_string());
            page.records.push(record);
        }
    }
    page
}

trait NumberedRecord {
    fn number(&self) -> &str;
}

impl NumberedRecord for UserCodeRecord {
    fn number(&self) -> &str {
        &self.number
    }
}

impl NumberedRecord for UserProfileRecord {
    fn number(&self) -> &str {
        &self.number
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ArmOptions;
    use crate::records::{AreaState, ZoneState};

    fn codec() -> DmpCodec {
        DmpCodec::new(AccountId::new("1").unwrap(), "TESTKEY")
    }

    #[test]
    fn test_encode_auth() {
        let frame = codec().encode(&Command::auth("TESTKEY").unwrap()).unwrap();
        assert_eq!(frame, b"@    1!V2TESTKEY\r");
    }

    #[test]
    fn test_encode_arm() {
        let options = ArmOptions {
            bypass_faulted: true,
            force_arm: false,
            instant: None,
        };
        let frame = codec().encode(&Command::arm(&[1], options).unwrap()).unwrap();
        assert_eq!(frame, b"@    1!C01,YN\r");
    }

    #[test]
    fn test_encode_five_char_account() {
        let codec = DmpCodec::new(AccountId::new("12345").unwrap(), "");
        assert_eq!(codec.encode(&Command::KeepAlive).unwrap(), b"@12345!H\r");
    }

    #[test]
    fn test_encode_rejects_invalid_command() {
        let result = codec().encode(&Command::BypassZone { zone: 0 });
        assert!(matches!(result, Err(DmpError::Protocol(_))));
    }

    #[test]
    fn test_decode_empty() {
        assert_eq!(codec().decode(b"").unwrap(), Response::NoData);
    }

    #[test]
    fn test_decode_ack_and_nak() {
        assert_eq!(codec().decode(b"\x02@    1+!C\r").unwrap(), Response::Ack);
        assert_eq!(codec().decode(b"\x02@    1-!O\r").unwrap(), Response::Nak);
        assert_eq!(codec().decode(b"\x02@    1+!Xgarbage\r").unwrap(), Response::Ack);
        assert_eq!(codec().decode(b"\x02@    1-!Q002S\r").unwrap(), Response::Nak);
    }

    #[test]
    fn test_decode_auth_reply_is_no_data() {
        assert_eq!(codec().decode(b"\x02@    1!V2\r").unwrap(), Response::NoData);
        assert_eq!(codec().decode(b"\x02@    1+!V2\r").unwrap(), Response::NoData);
        assert_eq!(codec().decode(b"\x02@    1+!H\r").unwrap(), Response::NoData);
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        let result = codec().decode(b"\x02@    1+!WB\xff\xfe\r");
        assert!(matches!(result, Err(DmpError::InvalidResponse { .. })));
    }

    #[test]
    fn test_decode_status_page() {
        let data = b"\x02@    1+!WBA  1DArea 1\x1eL001NFront\x1eL002OBack\x1e-\r";
        let Response::Status(snapshot) = codec().decode(data).unwrap() else {
            panic!("expected status");
        };
        assert_eq!(snapshot.areas.len(), 1);
        let area = snapshot.area("1").unwrap();
        assert_eq!(area.state, AreaState::Disarmed);
        assert_eq!(area.name, "Area 1");
        assert_eq!(snapshot.zone("001").unwrap().state, ZoneState::Normal);
        assert_eq!(snapshot.zone("001").unwrap().name, "Front");
        assert_eq!(snapshot.zone("002").unwrap().state, ZoneState::Open);
        assert_eq!(snapshot.zone("002").unwrap().name, "Back");
    }

    #[test]
    fn test_decode_status_merges_frames() {
        let data = b"\x02@    1*WBL001NFront\x1e-\r\x02@    1*WBL001OFront\x1eL003XAttic\x1e-\r";
        let Response::Status(snapshot) = codec().decode(data).unwrap() else {
            panic!("expected status");
        };
        assert_eq!(snapshot.zones.len(), 2);
        assert_eq!(snapshot.zone("001").unwrap().state, ZoneState::Open);
        assert_eq!(snapshot.zone("003").unwrap().state, ZoneState::Bypassed);
    }

    #[test]
    fn test_decode_earliest_marker_wins() {
        // the name contains a later marker that must not be used
        let data = b"\x02@    1+?WAA  2SUpstairs *WB\x1e-\r";
        let Response::Status(snapshot) = codec().decode(data).unwrap() else {
            panic!("expected status");
        };
        assert_eq!(snapshot.area("2").unwrap().state, AreaState::ArmedStay);
        assert_eq!(snapshot.area("2").unwrap().name, "Upstairs *WB");
    }

    #[test]
    fn test_decode_unknown_record_tags_skipped() {
        let data = b"\x02@    1*WBQ001NFoo\x1eL004LPorch\x1e-\r";
        let Response::Status(snapshot) = codec().decode(data).unwrap() else {
            panic!("expected status");
        };
        assert_eq!(snapshot.zones.len(), 1);
        assert_eq!(snapshot.zone("004").unwrap().state, ZoneState::LowBattery);
    }

    #[test]
    fn test_decode_empty_status_payload() {
        let Response::Status(snapshot) = codec().decode(b"\x02@    1*WB-\r").unwrap() else {
            panic!("expected status");
        };
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_decode_user_codes_page() {
        let codec = codec();
        let cipher = UserCodeCipher::new("1", "TESTKEY");
        let alice = cipher.encrypt("0001123456FFFFFF9876FF0010020030040000000000ALICE");
        let short = cipher.encrypt("0002SHORT");
        let bob = cipher.encrypt("00034321FFFFFFFFFFFFFF0010000000000000000000BOB");
        let data = format!(
            "\x02@    1*P={}\x1e{}\x1e{}\x1e----\r",
            alice, bob, short
        );

        let Response::UserCodes(page) = codec.decode(data.as_bytes()).unwrap() else {
            panic!("expected user codes");
        };
        assert_eq!(page.records.len(), 2);
        assert!(page.has_more);
        assert_eq!(page.last_number.as_deref(), Some("0003"));
        assert_eq!(page.records[0].code, "123456");
        assert_eq!(page.records[0].name, "ALICE");
        assert_eq!(page.records[1].code, "4321");
        assert_eq!(page.records[1].pin, "");
        assert_eq!(page.next_start(), Some(4));
    }

    #[test]
    fn test_decode_user_profiles_page() {
        let data = b"\x02@    1*U0011234567800000000002YYNNYYNNMASTER\x1e0021000000000000000001YYYYYYYYGUEST\r";
        let Response::UserProfiles(page) = codec().decode(data).unwrap() else {
            panic!("expected profiles");
        };
        assert_eq!(page.records.len(), 2);
        assert!(!page.has_more);
        assert_eq!(page.last_number.as_deref(), Some("002"));
        assert_eq!(page.records[0].name, "MASTER");
        assert_eq!(page.records[1].name, "GUEST");
    }

    #[test]
    fn test_decode_short_fragments_ignored() {
        assert_eq!(codec().decode(b"\x02@  1+\r\x02\r").unwrap(), Response::NoData);
    }
}
