//! One-sided differences between two coverage measurements
//!
//! Works on opcode dumps and on line reports alike: an entry is kept when
//! its key (opcode index, or file and line) appears in one measurement and
//! not the other. Hit counts never matter. Entries keep the order in which
//! their own measurement lists them.

use std::collections::HashSet;
use std::fmt::Write;
use std::hash::Hash;

use super::{op_label, CoverageDump};

/// Entries reached by only one of two measurements
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CoverageDiff<T> {
    pub only_first: Vec<T>,
    pub only_second: Vec<T>,
}

impl<T> CoverageDiff<T> {
    /// Both measurements reached the same keys
    pub fn is_empty(&self) -> bool {
        self.only_first.is_empty() && self.only_second.is_empty()
    }
}

fn one_sided<T: Clone, K: Eq + Hash>(
    first: &[T],
    second: &[T],
    key: impl Fn(&T) -> K,
) -> CoverageDiff<T> {
    let first_keys: HashSet<K> = first.iter().map(&key).collect();
    let second_keys: HashSet<K> = second.iter().map(&key).collect();
    CoverageDiff {
        only_first: first
            .iter()
            .filter(|e| !second_keys.contains(&key(*e)))
            .cloned()
            .collect(),
        only_second: second
            .iter()
            .filter(|e| !first_keys.contains(&key(*e)))
            .cloned()
            .collect(),
    }
}

/// Opcode sites hit by one dump only, with that dump's count
pub fn diff_dumps(first: &CoverageDump, second: &CoverageDump) -> CoverageDiff<(usize, u32)> {
    let first: Vec<_> = first.iter().map(|(i, c)| (*i, *c)).collect();
    let second: Vec<_> = second.iter().map(|(i, c)| (*i, *c)).collect();
    one_sided(&first, &second, |(index, _)| *index)
}

/// Records (`<file> <line> <count>`) of one report whose file and line the
/// other lacks; the header and malformed lines are skipped
pub fn diff_reports<'a>(first: &'a str, second: &'a str) -> CoverageDiff<&'a str> {
    let records = |text: &'a str| -> Vec<&'a str> {
        text.lines()
            .map(str::trim)
            .filter(|line| record_key(line).is_some())
            .collect()
    };
    one_sided(&records(first), &records(second), |line: &&'a str| record_key(*line))
}

fn record_key(line: &str) -> Option<(&str, u64)> {
    let mut fields = line.split_whitespace();
    let (file, line_no, count) = (fields.next()?, fields.next()?, fields.next()?);
    if fields.next().is_some() || count.parse::<u64>().is_err() {
        return None;
    }
    Some((file, line_no.parse().ok()?))
}

impl CoverageDiff<(usize, u32)> {
    /// Bitmap-style listing of both sides
    pub fn render(&self, first: &str, second: &str) -> String {
        let mut out = String::new();
        let sides = [
            (first, second, &self.only_first),
            (second, first, &self.only_second),
        ];
        for (from, to, entries) in sides {
            let _ = writeln!(out, "In {} but not in {}:", from, to);
            for (idx, count) in entries {
                let label = op_label(*idx).unwrap_or("unknown op");
                let _ = writeln!(out, "  - index={} ({}), count={}", idx, label, count);
            }
        }
        out
    }
}

impl CoverageDiff<&str> {
    /// Line-report listing of both sides
    pub fn render(&self, first: &str, second: &str) -> String {
        let mut out = String::new();
        let sides = [
            (first, second, &self.only_first),
            (second, first, &self.only_second),
        ];
        for (from, to, entries) in sides {
            let _ = writeln!(out, "In {} but not in {}:", from, to);
            for record in entries {
                let _ = writeln!(out, "  {}", record);
            }
        }
        out
    }
}
