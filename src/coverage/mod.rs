//! In-process branch coverage
//!
//! [`CoverageBitmap`] is the counter array the interpreter writes to. It is
//! owned by whoever runs a measurement (usually a
//! [`Harness`](crate::harness::Harness)) and handed to each machine as an
//! `Arc`, so separate sessions never share counters.

pub mod bitmap;
pub mod diff;
pub mod labels;

pub use bitmap::{render, CoverageBitmap, CoverageDump, COVERAGE_BITMAP_SIZE};
pub use diff::{diff_dumps, diff_reports, CoverageDiff};
pub use labels::op_label;
