//! Line profile format
//!
//! ```text
//! mode: count
//! src/machine/exec.rs 42 7
//! src/machine/exec.rs 43 0
//! ```
//!
//! One record per instrumented line: source file, line number, execution
//! count. Whitespace and `%` in the file field are percent-escaped, so the
//! count is always the third field. The header has fewer than three fields
//! and never survives filtering.

use std::fmt::Write as _;
use std::path::Path;

/// First line of every profile
pub const PROFILE_HEADER: &str = "mode: count";

/// Convert `llvm-cov export -format=lcov` output into the line profile.
///
/// Source paths under `base` are made relative to it.
pub fn lcov_to_profile(lcov: &str, base: &Path) -> String {
    let mut profile = String::from(PROFILE_HEADER);
    profile.push('\n');

    let mut file: Option<String> = None;
    for line in lcov.lines() {
        let line = line.trim();
        if let Some(path) = line.strip_prefix("SF:") {
            file = Some(escape_path(&relative_to(Path::new(path), base)));
        } else if let Some(data) = line.strip_prefix("DA:") {
            let Some(file) = file.as_deref() else {
                continue;
            };
            let mut fields = data.split(',');
            let (Some(line_no), Some(count)) = (fields.next(), fields.next()) else {
                continue;
            };
            let (Ok(line_no), Ok(count)) = (line_no.parse::<u64>(), count.parse::<u64>()) else {
                continue;
            };
            let _ = writeln!(profile, "{} {} {}", file, line_no, count);
        } else if line == "end_of_record" {
            file = None;
        }
    }
    profile
}

fn relative_to(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

/// Percent-escape `%` and whitespace so a path stays one field
pub fn escape_path(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    for c in path.chars() {
        if c == '%' || c.is_whitespace() {
            let mut buf = [0u8; 4];
            for b in c.encode_utf8(&mut buf).bytes() {
                let _ = write!(escaped, "%{:02X}", b);
            }
        } else {
            escaped.push(c);
        }
    }
    escaped
}

/// Records whose count (third field) is not zero
pub fn filter_nonzero(lines: &[&str]) -> Vec<String> {
    lines
        .iter()
        .filter(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            fields.len() >= 3 && fields[2] != "0"
        })
        .map(|line| line.to_string())
        .collect()
}

/// Records whose source field is `target`.
///
/// A target ending in `/` selects every file below that directory.
pub fn filter_target(lines: &[String], target: &str) -> Vec<String> {
    let target = escape_path(target);
    let matches = |file: &str| {
        if target.ends_with('/') {
            file.starts_with(&target)
        } else {
            file == target
        }
    };
    lines
        .iter()
        .filter(|line| line.split_whitespace().next().is_some_and(|file| matches(file)))
        .cloned()
        .collect()
}

/// Executed lines of `target`, newline-joined in profile order
pub fn extract(profile: &str, target: &str) -> String {
    let lines: Vec<&str> = profile.lines().filter(|l| !l.trim().is_empty()).collect();
    filter_target(&filter_nonzero(&lines), target).join("\n")
}
