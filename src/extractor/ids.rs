//! Video and playlist identifier parsing

use crate::utils::error::{Result, TubeloaderError};
use regex::Regex;
use std::sync::OnceLock;
use url::Url;

fn video_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9A-Za-z_-]{11}$").expect("static regex"))
}

fn playlist_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9A-Za-z_-]{10,64}$").expect("static regex"))
}

/// Extract the 11 character video id from a bare id or any watch/short/embed URL
pub fn parse_video_id(identifier: &str) -> Result<String> {
    let identifier = identifier.trim();
    if video_id_regex().is_match(identifier) {
        return Ok(identifier.to_string());
    }

    let invalid = || TubeloaderError::NotFound(format!("not a video identifier: {}", identifier));
    let url = Url::parse(identifier).map_err(|_| invalid())?;
    let host = url.host_str().unwrap_or_default();

    let candidate = if host.ends_with("youtu.be") {
        url.path_segments().and_then(|mut s| s.next()).map(str::to_string)
    } else if let Some((_, v)) = url.query_pairs().find(|(k, _)| k == "v") {
        Some(v.into_owned())
    } else {
        let segments: Vec<&str> = url.path_segments().map(|s| s.collect()).unwrap_or_default();
        match segments.as_slice() {
            ["shorts" | "embed" | "live" | "v", id, ..] => Some(id.to_string()),
            _ => None,
        }
    };

    candidate
        .filter(|id| video_id_regex().is_match(id))
        .ok_or_else(invalid)
}

/// Extract the playlist id from a bare id or a URL carrying a `list` parameter
pub fn parse_playlist_id(identifier: &str) -> Result<String> {
    let identifier = identifier.trim();
    let invalid =
        || TubeloaderError::NotFound(format!("not a playlist identifier: {}", identifier));

    let candidate = match Url::parse(identifier) {
        Ok(url) => url
            .query_pairs()
            .find(|(k, _)| k == "list")
            .map(|(_, v)| v.into_owned()),
        Err(_) => Some(identifier.to_string()),
    };

    candidate
        .filter(|id| playlist_id_regex().is_match(id))
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::ErrorKind;

    #[test]
    fn test_parse_video_id_forms() {
        let id = "dQw4w9WgXcQ";
        for input in [
            "dQw4w9WgXcQ",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ&t=42",
            "https://youtu.be/dQw4w9WgXcQ?si=abc",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "  dQw4w9WgXcQ  ",
        ] {
            assert_eq!(parse_video_id(input).unwrap(), id, "input: {}", input);
        }
    }

    #[test]
    fn test_parse_video_id_rejects_garbage() {
        for input in ["", "short", "https://www.youtube.com/watch", "not a url at all!", "https://example.com/a/b"] {
            let err = parse_video_id(input).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotFound, "input: {}", input);
        }
    }

    #[test]
    fn test_parse_playlist_id() {
        assert_eq!(
            parse_playlist_id("https://www.youtube.com/playlist?list=PLrAXtmErZgOeiKm4sgNOknGvNjby9efdf").unwrap(),
            "PLrAXtmErZgOeiKm4sgNOknGvNjby9efdf"
        );
        assert_eq!(
            parse_playlist_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PL1234567890").unwrap(),
            "PL1234567890"
        );
        assert_eq!(parse_playlist_id("PL1234567890").unwrap(), "PL1234567890");
        assert!(parse_playlist_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ").is_err());
        assert!(parse_playlist_id("bad id!").is_err());
    }
}
