//! Binlog position tracking.
//!
//! A `Position` identifies a point in the primary's binlog stream: the
//! file currently being read, the byte offset within it, and — when GTID
//! mode is enabled — the executed GTID set as of that point. It is the
//! unit of durable progress the Meta Store persists and the Canal
//! Instance resumes from.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// A point in the primary's binlog stream.
///
/// Ordering is file-discovery order (the order `file` values were first
/// seen), then numeric `offset` within a file. `offset` only resets to a
/// smaller value when `file` changes, which happens on a Rotate event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    #[serde(rename = "name")]
    pub file: String,
    #[serde(rename = "pos")]
    pub offset: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gtid_set: Option<String>,
}

impl Position {
    pub fn new(file: impl Into<String>, offset: u32) -> Self {
        Position {
            file: file.into(),
            offset,
            gtid_set: None,
        }
    }

    pub fn with_gtid_set(mut self, gtid_set: impl Into<String>) -> Self {
        self.gtid_set = Some(gtid_set.into());
        self
    }

    /// Starting position for an instance that has never checkpointed:
    /// "start from the primary's current position" is resolved by the
    /// binlog client against `SHOW BINARY LOG STATUS` at connect time,
    /// this value is just the sentinel the Meta Store returns until then.
    pub fn initial() -> Self {
        Position::new("", 4)
    }

    pub fn is_initial(&self) -> bool {
        self.file.is_empty() && self.offset == 4
    }
}

impl Default for Position {
    fn default() -> Self {
        Position::initial()
    }
}

/// Tracks the discovery order of binlog file names so `Position` ordering
/// can be file-discovery-order rather than lexicographic-by-string (which
/// breaks once a file counter rolls over past 6 digits, or the prefix
/// changes across a primary failover).
#[derive(Debug, Default, Clone)]
pub struct FileOrder {
    seen: HashMap<String, usize>,
    next: usize,
}

impl FileOrder {
    pub fn new() -> Self {
        FileOrder::default()
    }

    /// Returns this file's discovery rank, assigning it the next rank if
    /// it has not been seen before.
    pub fn rank(&mut self, file: &str) -> usize {
        if let Some(&r) = self.seen.get(file) {
            return r;
        }
        let r = self.next;
        self.seen.insert(file.to_string(), r);
        self.next += 1;
        r
    }

    /// Compares two positions using discovery order for the file
    /// component, recording either file if not already seen.
    pub fn compare(&mut self, a: &Position, b: &Position) -> Ordering {
        if a.file == b.file {
            return a.offset.cmp(&b.offset);
        }
        self.rank(&a.file).cmp(&self.rank(&b.file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_position_is_sentinel() {
        let p = Position::initial();
        assert!(p.is_initial());
        assert_eq!(p, Position::new("", 4));
    }

    #[test]
    fn ordering_is_numeric_within_same_file() {
        let mut order = FileOrder::new();
        let a = Position::new("mysql-bin.000001", 100);
        let b = Position::new("mysql-bin.000001", 200);
        assert_eq!(order.compare(&a, &b), Ordering::Less);
        assert_eq!(order.compare(&b, &a), Ordering::Greater);
    }

    #[test]
    fn ordering_follows_discovery_order_across_files() {
        let mut order = FileOrder::new();
        let a = Position::new("mysql-bin.000001", 4096);
        let b = Position::new("mysql-bin.000002", 100);
        // file 000001 discovered first
        assert_eq!(order.compare(&a, &b), Ordering::Less);
        // even though 000002 has a smaller offset, it ranks after once
        // rotate has moved discovery forward
        assert_eq!(order.compare(&b, &a), Ordering::Greater);
    }

    #[test]
    fn rotate_resets_offset_but_advances_file_rank() {
        let mut order = FileOrder::new();
        let before_rotate = Position::new("mysql-bin.000001", 99999);
        let after_rotate = Position::new("mysql-bin.000002", 4);
        assert_eq!(order.compare(&before_rotate, &after_rotate), Ordering::Less);
    }
}
