//! Caption track choice and timed-text conversion

use crate::extractor::models::{CaptionTrack, StreamCatalog};
use crate::utils::error::{Result, TubeloaderError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info};

/// Output format of a subtitle file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleFormat {
    #[default]
    Srt,
    Vtt,
    /// The timed-text document as served
    Xml,
    /// Cue list as JSON
    Json,
}

impl SubtitleFormat {
    pub fn extension(self) -> &'static str {
        match self {
            SubtitleFormat::Srt => "srt",
            SubtitleFormat::Vtt => "vtt",
            SubtitleFormat::Xml => "xml",
            SubtitleFormat::Json => "json",
        }
    }
}

impl FromStr for SubtitleFormat {
    type Err = TubeloaderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "srt" => Ok(SubtitleFormat::Srt),
            "vtt" => Ok(SubtitleFormat::Vtt),
            "xml" => Ok(SubtitleFormat::Xml),
            "json" => Ok(SubtitleFormat::Json),
            other => Err(TubeloaderError::Configuration(format!(
                "unknown subtitle format '{}'",
                other
            ))),
        }
    }
}

/// Subtitle part of a download request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleRequest {
    /// Language code such as `en` or `pt-BR`
    pub language: String,
    pub format: SubtitleFormat,
    /// Take the first available track when nothing matches the language
    pub allow_fallback: bool,
}

impl SubtitleRequest {
    pub fn new(language: impl Into<String>, format: SubtitleFormat) -> Self {
        Self {
            language: language.into(),
            format,
            allow_fallback: false,
        }
    }
}

/// One timed caption
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cue {
    #[serde(serialize_with = "serialize_millis")]
    pub start: Duration,
    #[serde(serialize_with = "serialize_millis")]
    pub duration: Duration,
    pub text: String,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

pub struct SubtitleResolver;

impl SubtitleResolver {
    pub fn available(catalog: &StreamCatalog) -> &[CaptionTrack] {
        &catalog.caption_tracks
    }

    /// Manual track for the language, then a regional variant, then an
    /// auto-generated one, then (with `allow_fallback`) whatever comes first.
    pub fn choose<'a>(
        tracks: &'a [CaptionTrack],
        language: &str,
        allow_fallback: bool,
    ) -> Option<&'a CaptionTrack> {
        let language = language.to_ascii_lowercase();
        let exact = |t: &CaptionTrack| t.language_code.to_ascii_lowercase() == language;
        let related = |t: &CaptionTrack| {
            let code = t.language_code.to_ascii_lowercase();
            code.starts_with(&language) || language.starts_with(&code)
        };

        let chosen = tracks
            .iter()
            .find(|t| !t.is_auto_generated && exact(t))
            .or_else(|| tracks.iter().find(|t| !t.is_auto_generated && related(t)))
            .or_else(|| tracks.iter().find(|t| t.is_auto_generated && related(t)))
            .or_else(|| allow_fallback.then(|| tracks.first()).flatten());

        if let Some(track) = chosen {
            if track.language_code.to_ascii_lowercase() != language {
                info!(
                    "Using caption track {} ({}) for requested language {}",
                    track.language_code, track.language_name, language
                );
            }
        }
        chosen
    }

    /// URL serving the track in a form `render` accepts for `format`
    pub fn track_url(track: &CaptionTrack, format: SubtitleFormat) -> String {
        match format {
            SubtitleFormat::Vtt => {
                let separator = if track.source_url.contains('?') { '&' } else { '?' };
                format!("{}{}fmt=vtt", track.source_url, separator)
            }
            _ => track.source_url.clone(),
        }
    }

    /// Convert a fetched document to the requested format
    pub fn render(raw: &str, format: SubtitleFormat) -> Result<String> {
        match format {
            SubtitleFormat::Xml | SubtitleFormat::Vtt => Ok(raw.to_string()),
            SubtitleFormat::Srt => Ok(to_srt(&parse_timed_text(raw)?)),
            SubtitleFormat::Json => Ok(serde_json::to_string_pretty(&parse_timed_text(raw)?)?),
        }
    }
}

fn cue_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<(text|p)\b([^>]*)>(.*?)</(?:text|p)>").expect("static regex")
    })
}

fn attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"([\w:-]+)="([^"]*)""#).expect("static regex"))
}

fn inner_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("static regex"))
}

/// Parse a timed-text document.
///
/// Handles both `<text start="1.5" dur="2">` (seconds) and the newer
/// `<p t="1500" d="2000">` (milliseconds) layouts.
pub fn parse_timed_text(xml: &str) -> Result<Vec<Cue>> {
    if !xml.trim_start().starts_with('<') {
        return Err(TubeloaderError::Extraction(
            "caption document is not timed-text XML".to_string(),
        ));
    }

    let mut cues = Vec::new();
    for caps in cue_regex().captures_iter(xml) {
        let in_millis = &caps[1] == "p";
        let mut start = None;
        let mut duration = None;
        for attr in attr_regex().captures_iter(&caps[2]) {
            match (&attr[1], in_millis) {
                ("start", false) => start = parse_seconds(&attr[2]),
                ("dur", false) => duration = parse_seconds(&attr[2]),
                ("t", true) => start = attr[2].parse().ok().map(Duration::from_millis),
                ("d", true) => duration = attr[2].parse().ok().map(Duration::from_millis),
                _ => {}
            }
        }

        let Some(start) = start else {
            continue;
        };
        let text = decode_entities(&decode_entities(&inner_tag_regex().replace_all(&caps[3], "")));
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        cues.push(Cue {
            start,
            duration: duration.unwrap_or_default(),
            text: text.to_string(),
        });
    }

    debug!("Parsed {} caption cues", cues.len());
    Ok(cues)
}

/// `12.5` → 12s 500ms, without float rounding
fn parse_seconds(raw: &str) -> Option<Duration> {
    let (whole, frac) = raw.trim().split_once('.').unwrap_or((raw.trim(), ""));
    let secs: u64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let millis: u64 = if frac.is_empty() {
        0
    } else {
        let digits: String = frac.chars().chain("000".chars()).take(3).collect();
        digits.parse().ok()?
    };
    Duration::from_secs(secs).checked_add(Duration::from_millis(millis))
}

fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').filter(|end| *end <= 10).and_then(|end| {
            let entity = &tail[1..end];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|c| (c, end))
        });

        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn srt_timestamp(d: Duration) -> String {
    let ms = d.as_millis();
    format!(
        "{:02}:{:02}:{:02},{:03}",
        ms / 3_600_000,
        (ms / 60_000) % 60,
        (ms / 1000) % 60,
        ms % 1000
    )
}

pub fn to_srt(cues: &[Cue]) -> String {
    let mut out = String::new();
    for (i, cue) in cues.iter().enumerate() {
        let _ = write!(
            out,
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            srt_timestamp(cue.start),
            srt_timestamp(cue.start.saturating_add(cue.duration)),
            cue.text
        );
    }
    out
}
