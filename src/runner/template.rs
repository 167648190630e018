//! Wrapper test source
//!
//! The wrapper is an ordinary integration test of the instrumented crate that
//! runs one snippet through the in-process harness. It is regenerated per
//! snippet, so it embeds the snippet text literally.

use std::fs;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

/// Hex digits of the content hash kept in binary names
pub const HASH_LEN: usize = 16;

const WRAPPER_TEMPLATE: &str = r##"// Generated by `snipcov cov`. Overwritten on every run.

use snipcov::harness::{Harness, HarnessConfig};

const ENTRY: &str = {{ENTRY}};

const SNIPPET: &str = {{SNIPPET}};

#[test]
fn cov_snippet() {
    let harness = Harness::new(HarnessConfig::default());
    match harness.run(SNIPPET, ENTRY) {
        Ok(output) => println!("{}", output),
        Err(err) => println!("error: {}", err),
    }
    print!("{}", harness.render());
}
"##;

/// Render the wrapper for `snippet`, calling `entry`
pub fn render_wrapper(snippet: &str, entry: &str) -> String {
    WRAPPER_TEMPLATE
        .replace("{{ENTRY}}", &format!("{:?}", entry))
        .replace("{{SNIPPET}}", &raw_string_literal(snippet))
}

/// `text` as a raw string literal with enough `#`s that `text` cannot close it
pub fn raw_string_literal(text: &str) -> String {
    let hashes = "#".repeat(delimiter_hashes(text));
    format!("r{hashes}\"{text}\"{hashes}")
}

/// One more `#` than the longest run following a `"` in `text`
fn delimiter_hashes(text: &str) -> usize {
    let mut longest = 0;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '"' {
            continue;
        }
        let mut run = 0;
        while chars.peek() == Some(&'#') {
            chars.next();
            run += 1;
        }
        longest = longest.max(run);
    }
    longest + 1
}

/// Write `content` to `path` unless the file already holds exactly that.
///
/// Returns whether the file was written.
pub fn write_if_changed(path: &Path, content: &str) -> io::Result<bool> {
    match fs::read(path) {
        Ok(existing) if existing == content.as_bytes() => return Ok(false),
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, content)?;
    Ok(true)
}

/// SHA-256 prefix identifying a wrapper's content
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(HASH_LEN);
    hash
}
