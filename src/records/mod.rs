// MIT License - Copyright (c) 2021 TJForc
// Transient records decoded from panel replies

pub mod status;
pub mod user;

pub use status::{AreaState, AreaStatus, StatusSnapshot, ZoneState, ZoneStatus};
pub use user::{RecordPage, UserCodePage, UserCodeRecord, UserProfilePage, UserProfileRecord};

fn byte_offset(s: &str, chars: usize) -> usize {
    s.char_indices().nth(chars).map(|(i, _)| i).unwrap_or(s.len())
}

/// Character-indexed substring that clamps instead of panicking.
pub(crate) fn char_slice(s: &str, start: usize, end: usize) -> &str {
    let from = byte_offset(s, start);
    let to = byte_offset(s, end).max(from);
    &s[from..to]
}

/// Everything from a character index to the end, or "" past the end.
pub(crate) fn char_tail(s: &str, start: usize) -> &str {
    &s[byte_offset(s, start)..]
}
