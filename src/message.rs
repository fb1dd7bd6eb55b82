//! FIX message representation: header/body/trailer fields, encoding, and
//! the `BodyLength`/`CheckSum` arithmetic of spec invariant 4.
//!
//! Grounded on the teacher's `protocol::FixMessage`/`encode`/`decode`
//! (sorted-tag re-encode, `Write`-based serialization), generalized from a
//! fixed `HashMap<u32, String>` of admin fields to an ordered field list
//! that also carries repeating groups.

use crate::error::{FixError, Result};
use bytes::{Bytes, BytesMut};
use std::collections::BTreeMap;
use std::fmt::Write as _;

pub const SOH: u8 = 0x01;

/// One repeating-group entry: the fields that follow the group's delimiter
/// tag, up to (but excluding) the next delimiter or the end of the group.
pub type GroupEntry = Vec<(u32, String)>;

/// A decoded, typed-by-position FIX message.
///
/// `fields` holds every field in wire order, including header and trailer
/// tags (8, 9, 35, 49, 56, 34, 52, ..., 10) so that re-encoding can
/// reproduce byte-identical output for invariant 2 (round-trip fidelity).
/// `groups` holds the repeating-group entries keyed by their count tag,
/// pulled out of the flat `fields` list at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub fields: Vec<(u32, String)>,
    pub groups: BTreeMap<u32, Vec<GroupEntry>>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_string(&self) -> Option<&str> {
        self.get(8)
    }

    pub fn msg_type(&self) -> Option<&str> {
        self.get(35)
    }

    pub fn msg_seq_num(&self) -> Option<u64> {
        self.get(34)?.parse().ok()
    }

    pub fn sender_comp_id(&self) -> Option<&str> {
        self.get(49)
    }

    pub fn target_comp_id(&self) -> Option<&str> {
        self.get(56)
    }

    pub fn poss_dup(&self) -> bool {
        self.get(43) == Some("Y")
    }

    /// First value stored under `tag`, in wire order.
    pub fn get(&self, tag: u32) -> Option<&str> {
        self.fields
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_int(&self, tag: u32) -> Option<i64> {
        self.get(tag)?.parse().ok()
    }

    pub fn set(&mut self, tag: u32, value: impl Into<String>) -> &mut Self {
        if let Some(existing) = self.fields.iter_mut().find(|(t, _)| *t == tag) {
            existing.1 = value.into();
        } else {
            self.fields.push((tag, value.into()));
        }
        self
    }

    pub fn push(&mut self, tag: u32, value: impl Into<String>) -> &mut Self {
        self.fields.push((tag, value.into()));
        self
    }

    pub fn remove(&mut self, tag: u32) {
        self.fields.retain(|(t, _)| *t != tag);
    }

    /// Append a repeating group under `count_tag`, also recording the
    /// `NumInGroup` field itself so `encode` emits it without a second pass.
    pub fn set_group(&mut self, count_tag: u32, entries: Vec<GroupEntry>) -> &mut Self {
        self.set(count_tag, entries.len().to_string());
        self.groups.insert(count_tag, entries);
        self
    }

    pub fn group(&self, count_tag: u32) -> Option<&[GroupEntry]> {
        self.groups.get(&count_tag).map(|v| v.as_slice())
    }

    /// Encode to the wire form, computing `BodyLength` (9) and `CheckSum`
    /// (10) fresh. Any existing 8/9/10 entries in `fields` are ignored —
    /// callers set only `35` onward; `begin_string` supplies tag 8.
    pub fn encode(&self, begin_string: &str) -> Bytes {
        let mut body = BytesMut::new();
        for (tag, value) in &self.fields {
            if matches!(tag, 8 | 9 | 10) {
                continue;
            }
            write_field(&mut body, *tag, value);
            if let Some(entries) = self.groups.get(tag) {
                for entry in entries {
                    for (t, v) in entry {
                        write_field(&mut body, *t, v);
                    }
                }
            }
        }

        let mut out = BytesMut::with_capacity(body.len() + 32);
        write_field(&mut out, 8, begin_string);
        write_field(&mut out, 9, body.len());
        out.extend_from_slice(&body);

        let checksum = checksum_of(&out);
        write!(out, "10={:03}{}", checksum, SOH as char).ok();
        out.freeze()
    }

    /// Parse a fully-framed message (the exact byte range `Parser::parse`
    /// returns) into header/body/trailer fields plus repeating groups.
    ///
    /// `groups` describes each group the caller's data dictionary (§4.3)
    /// knows about, keyed by `NumInGroup` count tag; pass an empty map to
    /// get a flat field list with no group extraction.
    pub fn decode(buf: &[u8], groups: &BTreeMap<u32, GroupSpec>) -> Result<Message> {
        if !buf.ends_with(&[SOH]) {
            return Err(FixError::Malformed("message must end with SOH".into()));
        }
        let body = &buf[..buf.len() - 1];
        let raw_fields: Vec<&[u8]> = body.split(|b| *b == SOH).collect();

        let trailer = raw_fields
            .last()
            .ok_or_else(|| FixError::Malformed("empty message".into()))?;
        let trailer_str =
            std::str::from_utf8(trailer).map_err(|_| FixError::Malformed("non-utf8 trailer".into()))?;
        if !trailer_str.starts_with("10=") {
            return Err(FixError::Malformed("missing 10= trailer".into()));
        }

        let mut flat: Vec<(u32, String)> = Vec::with_capacity(raw_fields.len());
        for raw in &raw_fields[..raw_fields.len() - 1] {
            let s =
                std::str::from_utf8(raw).map_err(|_| FixError::Malformed("non-utf8 field".into()))?;
            let mut it = s.splitn(2, '=');
            let tag = it
                .next()
                .ok_or_else(|| FixError::Malformed("missing tag".into()))?;
            let value = it
                .next()
                .ok_or_else(|| FixError::Malformed("missing value".into()))?;
            let tag_num: u32 = tag
                .parse()
                .map_err(|_| FixError::Malformed(format!("non-numeric tag: {tag}")))?;
            flat.push((tag_num, value.to_string()));
        }

        let (groups, fields) = extract_groups(flat, groups);
        Ok(Message { fields, groups })
    }

    /// Re-run repeating-group extraction now that the caller knows which
    /// groups apply (e.g. once `msg_type()` is known and the right
    /// dictionary has been picked). Used by the session, which decodes
    /// once group-agnostically to read the header, then re-extracts with
    /// the dictionary's groups for that specific message type.
    pub fn with_groups(self, groups: &BTreeMap<u32, GroupSpec>) -> Message {
        if groups.is_empty() {
            return self;
        }
        let flat: Vec<(u32, String)> =
            self.fields.into_iter().chain(self.groups.into_values().flatten().flatten()).collect();
        let (groups, fields) = extract_groups(flat, groups);
        Message { fields, groups }
    }
}

/// A repeating group as known to a data dictionary: the tag that starts each
/// entry, and the full set of tags (including the delimiter) that belong to
/// an entry rather than to the surrounding message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSpec {
    pub delimiter: u32,
    pub members: std::collections::BTreeSet<u32>,
}

impl GroupSpec {
    pub fn new(delimiter: u32, members: impl IntoIterator<Item = u32>) -> Self {
        let mut members: std::collections::BTreeSet<u32> = members.into_iter().collect();
        members.insert(delimiter);
        Self { delimiter, members }
    }
}

/// Checksum of `data`: the sum of all bytes modulo 256, invariant 4.
pub fn checksum_of(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Verify a fully-framed message's `10=nnn` trailer against invariant 4:
/// the sum of all prior bytes, modulo 256, rendered as three decimal
/// digits. Used when `ValidateLengthAndChecksum` is enabled (spec §4.1).
pub fn verify_checksum(buf: &[u8]) -> bool {
    let Some(trailer_rel) = buf.windows(4).rposition(|w| w == [SOH, b'1', b'0', b'=']) else {
        return false;
    };
    let trailer_start = trailer_rel + 1;
    if buf.len() < trailer_start + 7 || buf[buf.len() - 1] != SOH {
        return false;
    }
    let Ok(declared) = std::str::from_utf8(&buf[trailer_start + 3..trailer_start + 6]).unwrap_or("").parse::<u32>()
    else {
        return false;
    };
    checksum_of(&buf[..trailer_start]) as u32 == declared
}

fn write_field(out: &mut BytesMut, tag: u32, value: impl std::fmt::Display) {
    write!(out, "{tag}={value}{}", SOH as char).ok();
}

/// Split the flat field list back into top-level fields plus grouped
/// entries, using the dictionary's [`GroupSpec`] per count tag.
///
/// An entry runs from its delimiter tag up to (but excluding) the next
/// field that is either the delimiter again or not a member of the group;
/// at most `NumInGroup` entries are collected per group, matching the
/// dictionary-bounded parsing `SessionDictionary`/`DataDictionary` do in
/// the original engine rather than guessing the boundary from recurrence
/// alone.
fn extract_groups(
    flat: Vec<(u32, String)>,
    groups: &BTreeMap<u32, GroupSpec>,
) -> (BTreeMap<u32, Vec<GroupEntry>>, Vec<(u32, String)>) {
    if groups.is_empty() {
        return (BTreeMap::new(), flat);
    }

    let mut out_groups: BTreeMap<u32, Vec<GroupEntry>> = BTreeMap::new();
    let mut top_level: Vec<(u32, String)> = Vec::with_capacity(flat.len());
    let mut iter = flat.into_iter().peekable();

    while let Some((tag, value)) = iter.next() {
        let Some(spec) = groups.get(&tag) else {
            top_level.push((tag, value));
            continue;
        };

        let count: usize = value.parse().unwrap_or(0);
        top_level.push((tag, value));
        let entries = out_groups.entry(tag).or_default();

        for _ in 0..count {
            match iter.peek() {
                Some((t, _)) if *t == spec.delimiter => {}
                _ => break,
            }
            let mut entry: GroupEntry = Vec::new();
            entry.push(iter.next().expect("peeked Some above"));
            while let Some((t, _)) = iter.peek() {
                if *t == spec.delimiter || !spec.members.contains(t) {
                    break;
                }
                entry.push(iter.next().expect("peeked Some above"));
            }
            entries.push(entry);
        }
    }

    (out_groups, top_level)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_message() -> Message {
        let mut m = Message::new();
        m.set(35, "A").set(49, "INITIATOR").set(56, "ACCEPTOR").set(34, "1").set(108, "30");
        m
    }

    #[test]
    fn encode_produces_valid_checksum() {
        let msg = simple_message();
        let bytes = msg.encode("FIX.4.4");
        let s = std::str::from_utf8(&bytes).unwrap();
        assert!(s.starts_with("8=FIX.4.4\x01"));
        assert!(s.contains("9="));
        assert!(s.ends_with('\x01'));

        let trailer_pos = s.rfind("10=").unwrap();
        let without_trailer = &bytes[..trailer_pos];
        let expected: u32 = checksum_of(without_trailer) as u32;
        let trailer_value: u32 = s[trailer_pos + 3..trailer_pos + 6].parse().unwrap();
        assert_eq!(expected, trailer_value);
    }

    #[test]
    fn decode_round_trips_through_encode() {
        let msg = simple_message();
        let bytes = msg.encode("FIX.4.4");
        let decoded = Message::decode(&bytes, &BTreeMap::new()).unwrap();
        assert_eq!(decoded.msg_type(), Some("A"));
        assert_eq!(decoded.sender_comp_id(), Some("INITIATOR"));
        assert_eq!(decoded.msg_seq_num(), Some(1));
    }

    #[test]
    fn decode_rejects_missing_trailer() {
        let bad = b"8=FIX.4.4\x019=5\x0135=A\x01";
        let err = Message::decode(bad, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, FixError::Malformed(_)));
    }

    #[test]
    fn decode_splits_repeating_group_entries() {
        // NoPartyIDs(453) group: delimiter PartyID(448), member PartyIDSource(447).
        let raw = b"35=D\x01453=2\x01448=ALICE\x01447=D\x01448=BOB\x01447=D\x0155=BTCUSD\x0110=000\x01";
        let mut groups = BTreeMap::new();
        groups.insert(453, GroupSpec::new(448, [447]));
        let decoded = Message::decode(raw, &groups).unwrap();
        assert_eq!(decoded.get(35), Some("D"));
        assert_eq!(decoded.get(453), Some("2"));
        assert_eq!(decoded.get(55), Some("BTCUSD"));
        let entries = decoded.group(453).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0][0], (448, "ALICE".to_string()));
        assert_eq!(entries[1][0], (448, "BOB".to_string()));
    }

    #[test]
    fn encode_reproduces_group_entries_inline() {
        let mut msg = Message::new();
        msg.set(35, "D");
        msg.set_group(
            453,
            vec![
                vec![(448, "ALICE".to_string()), (447, "D".to_string())],
                vec![(448, "BOB".to_string()), (447, "D".to_string())],
            ],
        );
        msg.set(55, "BTCUSD");
        let bytes = msg.encode("FIX.4.4");

        let mut groups = BTreeMap::new();
        groups.insert(453, GroupSpec::new(448, [447]));
        let decoded = Message::decode(&bytes, &groups).unwrap();
        assert_eq!(decoded.get(453), Some("2"));
        assert_eq!(decoded.get(55), Some("BTCUSD"));
        assert_eq!(decoded.group(453).unwrap().len(), 2);
    }

    #[test]
    fn verify_checksum_accepts_a_correctly_encoded_message() {
        let bytes = simple_message().encode("FIX.4.4");
        assert!(verify_checksum(&bytes));
    }

    #[test]
    fn verify_checksum_rejects_a_corrupted_digit() {
        let mut bytes = simple_message().encode("FIX.4.4").to_vec();
        let len = bytes.len();
        bytes[len - 4] = if bytes[len - 4] == b'9' { b'8' } else { b'9' };
        assert!(!verify_checksum(&bytes));
    }

    #[test]
    fn checksum_matches_invariant() {
        let msg = simple_message();
        let bytes = msg.encode("FIX.4.4");
        let s = std::str::from_utf8(&bytes).unwrap();
        let trailer_idx = s.rfind("\x0110=").unwrap() + 1;
        let sum = checksum_of(&bytes[..trailer_idx]) as u32 % 256;
        let declared: u32 = s[trailer_idx + 3..trailer_idx + 6].parse().unwrap();
        assert_eq!(sum, declared);
    }
}
