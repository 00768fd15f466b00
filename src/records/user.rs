// MIT License - Copyright (c) 2021 TJForc
// User code and user profile records

use serde::Serialize;

use super::{char_slice, char_tail};
use crate::constants::{LONG_PROFILE_RECORD_LEN, MIN_USER_CODE_RECORD_LEN};

/// One page of a paginated record listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordPage<T> {
    pub records: Vec<T>,
    /// The panel signalled that another page follows.
    pub has_more: bool,
    /// Number of the last record on this page, the resume cursor.
    pub last_number: Option<String>,
}

impl<T> Default for RecordPage<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            has_more: false,
            last_number: None,
        }
    }
}

impl<T> RecordPage<T> {
    /// Number to request for the next page (`last_number + 1`), if any.
    pub fn next_start(&self) -> Option<u16> {
        if !self.has_more {
            return None;
        }
        let last = self.last_number.as_deref()?.trim().parse::<u16>().ok()?;
        last.checked_add(1)
    }
}

pub type UserCodePage = RecordPage<UserCodeRecord>;
pub type UserProfilePage = RecordPage<UserProfileRecord>;

/// A decrypted user code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserCodeRecord {
    pub number: String,
    pub code: String,
    pub pin: String,
    pub profiles: [String; 4],
    pub temp_date: String,
    pub exp_date: String,
    pub name: String,
}

impl UserCodeRecord {
    /// Parse a decrypted record; records under 44 characters are dropped.
    ///
    /// Layout: number 0..4, code 4..16, PIN 16..22 (both `F`-padded), four
    /// profile numbers of 3 characters, temporary date 34..40, expiry 40..44,
    /// then the name.
    pub fn parse(plain: &str) -> Option<Self> {
        if plain.chars().count() < MIN_USER_CODE_RECORD_LEN {
            return None;
        }
        Some(Self {
            number: char_slice(plain, 0, 4).to_string(),
            code: strip_padding(char_slice(plain, 4, 16)).to_string(),
            pin: strip_padding(char_slice(plain, 16, 22)).to_string(),
            profiles: [
                char_slice(plain, 22, 25).to_string(),
                char_slice(plain, 25, 28).to_string(),
                char_slice(plain, 28, 31).to_string(),
                char_slice(plain, 31, 34).to_string(),
            ],
            temp_date: char_slice(plain, 34, 40).to_string(),
            exp_date: char_slice(plain, 40, 44).to_string(),
            name: char_tail(plain, 44).trim_end().to_string(),
        })
    }
}

fn strip_padding(field: &str) -> &str {
    field.split('F').next().unwrap_or_default()
}

/// A user profile. Sent in clear text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfileRecord {
    pub number: String,
    pub areas_mask: String,
    pub access_areas_mask: String,
    pub output_group: String,
    pub menu_options: String,
    /// Empty for the short layout
    pub rearm_delay: String,
    pub name: String,
}

impl UserProfileRecord {
    /// Parse a profile record. Records of 49+ characters carry a rearm delay
    /// at 46..49 and the name from 49; shorter ones have the name from 30.
    pub fn parse(record: &str) -> Self {
        let long = record.chars().count() >= LONG_PROFILE_RECORD_LEN;
        let (rearm_delay, name) = if long {
            (char_slice(record, 46, 49), char_tail(record, 49))
        } else {
            ("", char_tail(record, 30))
        };
        Self {
            number: char_slice(record, 0, 3).to_string(),
            areas_mask: char_slice(record, 3, 11).to_string(),
            access_areas_mask: char_slice(record, 11, 19).to_string(),
            output_group: char_slice(record, 19, 22).to_string(),
            menu_options: char_slice(record, 22, 30).to_string(),
            rearm_delay: rearm_delay.to_string(),
            name: name.trim_end().to_string(),
        }
    }
}
