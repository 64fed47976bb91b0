//! Output file naming

use std::path::{Path, PathBuf};

/// Longest file stem we produce, in UTF-8 bytes.
///
/// NAME_MAX is 255 bytes on Linux and macOS; the rest is left for the
/// `.f<id>.<ext>.<tag>.part` suffixes added during a transfer.
pub const MAX_STEM_BYTES: usize = 150;

/// Characters invalid on Windows/macOS/Linux filesystems
const INVALID_CHARS: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Suffix of in-flight transfer files
pub const PART_SUFFIX: &str = "part";

/// Turns an untrusted title into a single safe path component.
///
/// # Security
/// - Removes path traversal sequences (`..`) and path separators
/// - Removes control characters (including NUL and newlines)
/// - Removes leading dots (prevents hidden files)
/// - Handles empty strings
/// - Limits the result to 150 bytes, on a char boundary
///
/// # Examples
/// ```
/// use tubeloader::utils::filename::sanitize_filename;
/// assert_eq!(sanitize_filename("../../etc/passwd"), "_etc_passwd");
/// assert_eq!(sanitize_filename(".hidden"), "hidden");
/// assert_eq!(sanitize_filename("Live at 5: part 1"), "Live at 5_ part 1");
/// ```
pub fn sanitize_filename(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .filter_map(|c| {
            if INVALID_CHARS.contains(&c) {
                Some('_')
            } else if c.is_control() {
                // tabs and newlines read as spaces in a title, the rest is dropped
                c.is_whitespace().then_some(' ')
            } else {
                Some(c)
            }
        })
        .collect();

    // Collapse whitespace runs left behind by removed characters
    sanitized = sanitized.split_whitespace().collect::<Vec<_>>().join(" ");

    while sanitized.contains("..") {
        sanitized = sanitized.replace("..", "");
    }

    sanitized = sanitized
        .trim_start_matches(|c: char| c == '.' || c.is_whitespace())
        .to_string();

    // Trailing dots and spaces are rejected on Windows
    sanitized = sanitized.trim_end_matches('.').trim_end().to_string();

    while sanitized.contains("__") {
        sanitized = sanitized.replace("__", "_");
    }

    if sanitized.is_empty() {
        return "unnamed_file".to_string();
    }

    if sanitized.len() > MAX_STEM_BYTES {
        let mut end = MAX_STEM_BYTES;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized.truncate(end);
        sanitized = sanitized.trim_end_matches('.').trim_end().to_string();
    }

    sanitized
}

/// `<dir>/<stem>.<ext>`
pub fn output_path(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    dir.join(format!("{}.{}", stem, extension))
}

/// Temporary sibling of `destination` used while bytes are still arriving.
///
/// `tag` distinguishes concurrent writers aiming at the same directory
/// (item id and format id), so two transfers never share a part file.
pub fn part_path(destination: &Path, tag: &str) -> PathBuf {
    let file_name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    let tag = sanitize_filename(tag);
    destination.with_file_name(format!("{}.{}.{}", file_name, tag, PART_SUFFIX))
}
