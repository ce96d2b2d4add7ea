//! GTID (Global Transaction ID) tracking.
//!
//! GTID format: `uuid:sequence`. A set of transactions executed on a
//! server is tracked as ranges per source UUID: `"uuid1:1-100,uuid2:1-50"`.

use crate::error::{CdcError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A contiguous sequence-number range within one UUID's GTID stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GtidRange {
    pub start: u64,
    pub end: u64,
}

impl GtidRange {
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(CdcError::Protocol(format!(
                "invalid gtid range: start {start} > end {end}"
            )));
        }
        Ok(GtidRange { start, end })
    }

    pub fn contains(&self, value: u64) -> bool {
        value >= self.start && value <= self.end
    }

    /// Merges with `other` if the two ranges are adjacent or overlapping.
    pub fn merge(&self, other: &GtidRange) -> Option<GtidRange> {
        if self.end + 1 >= other.start && other.end + 1 >= self.start {
            Some(GtidRange {
                start: self.start.min(other.start),
                end: self.end.max(other.end),
            })
        } else {
            None
        }
    }
}

/// Ranges of executed transactions for a single source UUID.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UUIDGtidSet {
    pub uuid: String,
    pub ranges: Vec<GtidRange>,
}

impl UUIDGtidSet {
    pub fn new(uuid: String) -> Self {
        UUIDGtidSet {
            uuid,
            ranges: Vec::new(),
        }
    }

    pub fn add_gtid(&mut self, sequence: u64) -> Result<()> {
        let range = GtidRange::new(sequence, sequence)?;

        for i in 0..self.ranges.len() {
            if let Some(merged) = self.ranges[i].merge(&range) {
                self.ranges[i] = merged;
                if i + 1 < self.ranges.len() {
                    if let Some(merged_again) = self.ranges[i].merge(&self.ranges[i + 1]) {
                        self.ranges[i] = merged_again;
                        self.ranges.remove(i + 1);
                    }
                }
                return Ok(());
            }
        }

        self.ranges.push(range);
        self.ranges.sort();
        Ok(())
    }

    pub fn contains(&self, sequence: u64) -> bool {
        self.ranges.iter().any(|r| r.contains(sequence))
    }

}

impl std::fmt::Display for UUIDGtidSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let range_strs: Vec<String> = self
            .ranges
            .iter()
            .map(|r| {
                if r.start == r.end {
                    r.start.to_string()
                } else {
                    format!("{}-{}", r.start, r.end)
                }
            })
            .collect();
        write!(f, "{}", range_strs.join(","))
    }
}

/// The full executed-GTID set, keyed by source UUID.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GtidSet {
    pub sets: BTreeMap<String, UUIDGtidSet>,
}

impl GtidSet {
    pub fn new() -> Self {
        GtidSet {
            sets: BTreeMap::new(),
        }
    }

    /// Parses `"uuid1:1-100,200,uuid2:1-50"` into a `GtidSet`.
    pub fn parse(gtid_str: &str) -> Result<Self> {
        let mut gtid_set = GtidSet::new();

        if gtid_str.is_empty() || gtid_str == "NULL" {
            return Ok(gtid_set);
        }

        let mut i = 0;
        let chars: Vec<char> = gtid_str.chars().collect();

        while i < chars.len() {
            let uuid_start = i;
            while i < chars.len() && chars[i] != ':' {
                i += 1;
            }

            if i >= chars.len() {
                break;
            }

            let uuid = chars[uuid_start..i].iter().collect::<String>();
            i += 1; // skip ':'

            let ranges_start = i;
            while i < chars.len() && chars[i] != ',' || (i > 0 && i + 1 < chars.len() && is_uuid_start(&chars, i + 1)) {
                if chars[i] == ',' && is_uuid_start(&chars, i + 1) {
                    break;
                }
                i += 1;
            }

            let ranges_str = chars[ranges_start..i].iter().collect::<String>();
            let mut uuid_gtid_set = UUIDGtidSet::new(uuid);

            for range_part in ranges_str.split(',') {
                let range_part = range_part.trim();
                if range_part.is_empty() {
                    continue;
                }
                if range_part.contains('-') && !range_part.starts_with('-') {
                    let parts: Vec<&str> = range_part.split('-').collect();
                    if parts.len() == 2 {
                        let start = parts[0]
                            .parse::<u64>()
                            .map_err(|_| CdcError::Protocol(format!("invalid gtid range: {range_part}")))?;
                        let end = parts[1]
                            .parse::<u64>()
                            .map_err(|_| CdcError::Protocol(format!("invalid gtid range: {range_part}")))?;
                        uuid_gtid_set.ranges.push(GtidRange::new(start, end)?);
                    }
                } else {
                    let seq = range_part
                        .parse::<u64>()
                        .map_err(|_| CdcError::Protocol(format!("invalid gtid sequence: {range_part}")))?;
                    uuid_gtid_set.add_gtid(seq)?;
                }
            }

            gtid_set.sets.insert(uuid_gtid_set.uuid.clone(), uuid_gtid_set);

            if i < chars.len() && chars[i] == ',' {
                i += 1;
            }
        }

        Ok(gtid_set)
    }

    pub fn add_gtid(&mut self, gtid: &str) -> Result<()> {
        let parts: Vec<&str> = gtid.split(':').collect();
        if parts.len() != 2 {
            return Err(CdcError::Protocol(format!("invalid gtid format: {gtid}")));
        }

        let uuid = parts[0].to_string();
        let sequence = parts[1]
            .parse::<u64>()
            .map_err(|_| CdcError::Protocol(format!("invalid gtid sequence: {}", parts[1])))?;

        let uuid_set = self
            .sets
            .entry(uuid.clone())
            .or_insert_with(|| UUIDGtidSet::new(uuid.clone()));
        uuid_set.add_gtid(sequence)
    }

    pub fn contains(&self, gtid: &str) -> bool {
        let parts: Vec<&str> = gtid.split(':').collect();
        if parts.len() != 2 {
            return false;
        }

        let uuid = parts[0];
        if let Ok(sequence) = parts[1].parse::<u64>() {
            if let Some(uuid_set) = self.sets.get(uuid) {
                return uuid_set.contains(sequence);
            }
        }
        false
    }

    pub fn subtract(&self, other: &GtidSet) -> GtidSet {
        let mut result = self.clone();

        for (uuid, other_set) in &other.sets {
            if let Some(result_set) = result.sets.get_mut(uuid) {
                for other_range in &other_set.ranges {
                    let mut new_ranges = Vec::new();
                    for range in &result_set.ranges {
                        if range.end < other_range.start || range.start > other_range.end {
                            new_ranges.push(*range);
                        } else {
                            if range.start < other_range.start {
                                new_ranges.push(GtidRange::new(range.start, other_range.start - 1).unwrap());
                            }
                            if range.end > other_range.end {
                                new_ranges.push(GtidRange::new(other_range.end + 1, range.end).unwrap());
                            }
                        }
                    }
                    result_set.ranges = new_ranges;
                }
            }
        }

        result
    }

    pub fn is_empty(&self) -> bool {
        self.sets.iter().all(|(_, set)| set.ranges.is_empty())
    }
}

impl std::fmt::Display for GtidSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.sets.is_empty() {
            return Ok(());
        }

        let mut parts = Vec::new();
        for (uuid, uuid_set) in &self.sets {
            let ranges_str = uuid_set.to_string();
            if !ranges_str.is_empty() {
                parts.push(format!("{}:{}", uuid, ranges_str));
            }
        }
        write!(f, "{}", parts.join(","))
    }
}

/// Heuristic: does the text at `pos` look like the start of a UUID
/// (hex digits and dashes followed eventually by a `:`)?
fn is_uuid_start(chars: &[char], pos: usize) -> bool {
    if pos + 3 >= chars.len() {
        return false;
    }

    let mut hex_count = 0;
    for &c in &chars[pos..pos.saturating_add(10).min(chars.len())] {
        if c.is_ascii_hexdigit() || c == '-' {
            hex_count += 1;
        } else if c == ':' {
            return hex_count > 8;
        } else {
            return false;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_multi_range_gtid_set() {
        let gtid_str = "550e8400-e29b-41d4-a716-446655440000:1-100,200,300-400";
        let gtid_set = GtidSet::parse(gtid_str).unwrap();
        assert!(!gtid_set.sets.is_empty());
    }

    #[test]
    fn contains_checks_sequence_membership() {
        let mut gtid_set = GtidSet::new();
        gtid_set.add_gtid("550e8400-e29b-41d4-a716-446655440000:50").unwrap();
        assert!(gtid_set.contains("550e8400-e29b-41d4-a716-446655440000:50"));
        assert!(!gtid_set.contains("550e8400-e29b-41d4-a716-446655440000:51"));
    }

    #[test]
    fn adjacent_gtids_merge_into_one_range() {
        let mut set = UUIDGtidSet::new("u".into());
        set.add_gtid(1).unwrap();
        set.add_gtid(2).unwrap();
        set.add_gtid(3).unwrap();
        assert_eq!(set.ranges.len(), 1);
        assert_eq!(set.to_string(), "1-3");
    }

    #[test]
    fn subtract_removes_overlapping_range() {
        let mut a = GtidSet::new();
        a.add_gtid("u:1").unwrap();
        a.add_gtid("u:2").unwrap();
        a.add_gtid("u:3").unwrap();
        let mut b = GtidSet::new();
        b.add_gtid("u:2").unwrap();
        let result = a.subtract(&b);
        assert!(result.contains("u:1"));
        assert!(!result.contains("u:2"));
        assert!(result.contains("u:3"));
    }
}
