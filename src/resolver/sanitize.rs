//! File name sanitization
//!
//! Titles and channel names become path components verbatim where possible.
//! Characters that are illegal on common filesystems are swapped for their
//! fullwidth lookalikes rather than dropped, so `A/B` and `AB` stay distinct
//! names. The mapping is a pure function of its input.

use std::path::{Path, PathBuf};

/// Longest component in bytes, leaving room for the extension and the
/// temp-file marker under the usual 255-byte limit
pub const MAX_COMPONENT_BYTES: usize = 200;

/// Component used when nothing usable is left
const PLACEHOLDER: &str = "_";

fn replacement(c: char) -> Option<char> {
    Some(match c {
        '/' => '／',
        '\\' => '＼',
        ':' => '：',
        '*' => '＊',
        '?' => '？',
        '"' => '＂',
        '<' => '＜',
        '>' => '＞',
        '|' => '｜',
        _ => return None,
    })
}

/// Make `name` safe to use as a single path component
///
/// - filesystem-reserved characters map to fullwidth equivalents
/// - NUL and other control characters become spaces, and whitespace runs
///   collapse to one space
/// - leading dots and spaces are removed (no hidden files, no `..`), as are
///   trailing dots and spaces
/// - the result is cut to [`MAX_COMPONENT_BYTES`] on a character boundary
/// - an empty result becomes `_`
pub fn sanitize_component(name: &str) -> String {
    let mapped: String = name
        .chars()
        .map(|c| match replacement(c) {
            Some(r) => r,
            None if c.is_control() => ' ',
            None => c,
        })
        .collect();

    let collapsed = mapped.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = trim_edges(&collapsed);

    let mut end = trimmed.len().min(MAX_COMPONENT_BYTES);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    let cut = trim_edges(&trimmed[..end]);

    if cut.is_empty() {
        PLACEHOLDER.to_string()
    } else {
        cut.to_string()
    }
}

fn trim_edges(s: &str) -> &str {
    s.trim_start_matches(['.', ' '])
        .trim_end_matches(['.', ' '])
}

/// `root/<artist>/<stem>.<extension>` with both components sanitized
pub fn library_path(root: &Path, artist: &str, stem: &str, extension: &str) -> PathBuf {
    root.join(sanitize_component(artist))
        .join(format!("{}.{}", sanitize_component(stem), extension))
}
