//! Page-backed resolver: scrapes the public watch and playlist pages
//!
//! The watch page embeds the player data as a JS assignment
//! (`ytInitialPlayerResponse = {...};`). That object carries the item
//! metadata, the playability verdict, every stream variant and the caption
//! track list. Playlist pages embed `ytInitialData` the same way.

use crate::extractor::cipher::{CipheredUrl, SignatureDecipher};
use crate::extractor::fetch::Fetcher;
use crate::extractor::ids::{parse_playlist_id, parse_video_id};
use crate::extractor::models::{
    CaptionTrack, PlaylistEntry, PlaylistListing, QualityTag, StreamCatalog, StreamDescriptor,
    ThumbnailVariant,
};
use crate::extractor::traits::MetadataResolver;
use crate::utils::error::{Result, TubeloaderError};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const PLAYER_RESPONSE_MARKER: &str = "ytInitialPlayerResponse";
const INITIAL_DATA_MARKER: &str = "ytInitialData";

const VIDEO_CODEC_PREFIXES: [&str; 7] = ["avc1", "av01", "vp09", "vp9", "vp8", "hev1", "hvc1"];
const AUDIO_CODEC_PREFIXES: [&str; 5] = ["mp4a", "opus", "vorbis", "ac-3", "ec-3"];

/// Image-host variants synthesized when the player data lists no thumbnails
const SYNTHESIZED_THUMBNAILS: [(&str, QualityTag, u32, u32); 5] = [
    ("default", QualityTag::Low, 120, 90),
    ("mqdefault", QualityTag::Medium, 320, 180),
    ("hqdefault", QualityTag::High, 480, 360),
    ("sddefault", QualityTag::High, 640, 480),
    ("maxresdefault", QualityTag::Max, 1280, 720),
];

pub struct PageResolver {
    fetcher: Fetcher,
    web_base_url: String,
    decipher: Arc<dyn SignatureDecipher>,
}

impl PageResolver {
    pub fn new(fetcher: Fetcher, web_base_url: &str, decipher: Arc<dyn SignatureDecipher>) -> Self {
        Self {
            fetcher,
            web_base_url: web_base_url.trim_end_matches('/').to_string(),
            decipher,
        }
    }

    /// Fetch and parse the player data object of one video
    pub async fn player_data(&self, video_id: &str) -> Result<Value> {
        let url = format!("{}/watch?v={}", self.web_base_url, video_id);
        let html = self.fetcher.get_text(&url, "watch page").await?;

        let raw = extract_json_object(&html, PLAYER_RESPONSE_MARKER).ok_or_else(|| {
            TubeloaderError::Extraction(format!("no player data on watch page of {}", video_id))
        })?;
        Ok(serde_json::from_str(raw)?)
    }

    /// Enumerate the streams of a player data object, deciphering where needed.
    ///
    /// Streams whose URL cannot be recovered are dropped; the rest of the
    /// catalog is unaffected.
    pub async fn parse_streams(&self, player: &Value) -> Vec<StreamDescriptor> {
        let formats = ["/streamingData/formats", "/streamingData/adaptiveFormats"]
            .iter()
            .filter_map(|ptr| player.pointer(ptr).and_then(Value::as_array))
            .flatten()
            .collect::<Vec<&Value>>();

        let mut streams = Vec::new();
        for format in formats {
            let Some(mut descriptor) = parse_format(format) else {
                continue;
            };

            if descriptor.source_url.is_empty() {
                match self.decipher_format(format).await {
                    Ok(url) => descriptor.source_url = url,
                    Err(e) => {
                        warn!("Dropping stream {}: {}", descriptor.format_id, e);
                        continue;
                    }
                }
            }

            if streams
                .iter()
                .any(|s: &StreamDescriptor| s.format_id == descriptor.format_id)
            {
                debug!("Skipping duplicate format {}", descriptor.format_id);
                continue;
            }
            streams.push(descriptor);
        }
        streams
    }

    async fn decipher_format(&self, format: &Value) -> Result<String> {
        let cipher = format
            .get("signatureCipher")
            .or_else(|| format.get("cipher"))
            .and_then(Value::as_str)
            .ok_or_else(|| TubeloaderError::Extraction("stream has neither url nor cipher".into()))?;
        CipheredUrl::parse(cipher)?
            .resolve(self.decipher.as_ref())
            .await
    }

    /// Build a full catalog out of a player data object
    pub async fn catalog_from_player(&self, video_id: &str, player: &Value) -> Result<StreamCatalog> {
        check_playability(player)?;

        let details = player.get("videoDetails").ok_or_else(|| {
            TubeloaderError::Extraction(format!("player data of {} has no videoDetails", video_id))
        })?;

        let id = str_at(details, "/videoId").unwrap_or(video_id).to_string();
        let mut thumbnails = parse_thumbnails(details);
        if thumbnails.is_empty() {
            thumbnails = synthesize_thumbnails(&id);
        }

        let streams = self.parse_streams(player).await;
        debug!("Page resolver found {} streams for {}", streams.len(), id);

        Ok(StreamCatalog {
            title: str_at(details, "/title").unwrap_or(&id).to_string(),
            author: str_at(details, "/author").map(str::to_string),
            description: str_at(details, "/shortDescription").map(str::to_string),
            duration: details
                .get("lengthSeconds")
                .and_then(lenient_u64)
                .map(Duration::from_secs),
            publish_date: str_at(player, "/microformat/playerMicroformatRenderer/publishDate")
                .and_then(parse_publish_date),
            view_count: details.get("viewCount").and_then(lenient_u64),
            is_live: details
                .get("isLive")
                .or_else(|| details.get("isLiveContent"))
                .and_then(Value::as_bool)
                .unwrap_or(false),
            thumbnails,
            caption_tracks: parse_caption_tracks(player),
            streams,
            resolver: self.id().to_string(),
            id,
        })
    }
}

#[async_trait]
impl MetadataResolver for PageResolver {
    fn id(&self) -> &'static str {
        "page"
    }

    async fn resolve(&self, identifier: &str) -> Result<StreamCatalog> {
        let video_id = parse_video_id(identifier)?;
        info!("Resolving {} from watch page", video_id);
        let player = self.player_data(&video_id).await?;
        self.catalog_from_player(&video_id, &player).await
    }

    async fn resolve_playlist(&self, identifier: &str) -> Result<PlaylistListing> {
        let playlist_id = parse_playlist_id(identifier)?;
        info!("Resolving playlist {} from playlist page", playlist_id);

        let url = format!("{}/playlist?list={}", self.web_base_url, playlist_id);
        let html = self.fetcher.get_text(&url, "playlist page").await?;
        let raw = extract_json_object(&html, INITIAL_DATA_MARKER).ok_or_else(|| {
            TubeloaderError::NotFound(format!("no playlist data for {}", playlist_id))
        })?;
        let data: Value = serde_json::from_str(raw)?;

        Ok(PlaylistListing {
            title: playlist_title(&data).unwrap_or(&playlist_id).to_string(),
            entries: parse_playlist_entries(&data),
            id: playlist_id,
        })
    }
}

// ============================================================
// Page parsing
// ============================================================

/// Locate `<marker> = {...}` in a page and return the object text.
///
/// The scan is string-aware, so braces inside JSON strings do not count.
pub fn extract_json_object<'a>(html: &'a str, marker: &str) -> Option<&'a str> {
    let mut search_from = 0;
    while let Some(pos) = html[search_from..].find(marker) {
        let after = search_from + pos + marker.len();
        let rest = html[after..].trim_start_matches(|c: char| c == '"' || c == ']' || c.is_whitespace());

        if let Some(rest) = rest.strip_prefix('=') {
            let rest = rest.trim_start();
            if rest.starts_with('{') {
                if let Some(len) = balanced_object_len(rest) {
                    let start = html.len() - rest.len();
                    return Some(&html[start..start + len]);
                }
            }
        }
        search_from = after;
    }
    None
}

fn balanced_object_len(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, byte) in text.bytes().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Map `playabilityStatus` to a resolution failure
pub fn check_playability(player: &Value) -> Result<()> {
    let Some(status) = player.pointer("/playabilityStatus/status").and_then(Value::as_str) else {
        return Ok(());
    };
    let reason = str_at(player, "/playabilityStatus/reason")
        .unwrap_or("no reason given")
        .to_string();

    match status {
        "OK" => Ok(()),
        "ERROR" => Err(TubeloaderError::NotFound(reason)),
        "LOGIN_REQUIRED" | "UNPLAYABLE" | "AGE_CHECK_REQUIRED" | "CONTENT_CHECK_REQUIRED" => {
            Err(TubeloaderError::Unavailable(format!("{}: {}", status, reason)))
        }
        other => {
            warn!("Unknown playability status {}", other);
            Err(TubeloaderError::Unavailable(format!("{}: {}", other, reason)))
        }
    }
}

/// Split `video/mp4; codecs="avc1.64001F, mp4a.40.2"` into its parts
pub fn parse_mime(mime: &str) -> (String, String, Vec<String>) {
    let (essence, params) = mime.split_once(';').unwrap_or((mime, ""));
    let (kind, subtype) = essence.trim().split_once('/').unwrap_or((essence.trim(), ""));

    let codecs = params
        .split(';')
        .filter_map(|p| p.trim().strip_prefix("codecs="))
        .flat_map(|list| list.trim_matches('"').split(','))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();

    (kind.to_ascii_lowercase(), subtype.to_ascii_lowercase(), codecs)
}

fn matches_any(codec: &str, prefixes: &[&str]) -> bool {
    let codec = codec.to_ascii_lowercase();
    prefixes.iter().any(|p| codec.starts_with(p))
}

/// One entry of `formats`/`adaptiveFormats`. `source_url` is left empty when
/// the stream is ciphered.
pub fn parse_format(format: &Value) -> Option<StreamDescriptor> {
    let format_id = match format.get("itag")? {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => return None,
    };
    let mime = str_at(format, "/mimeType")?;
    let (kind, container, codecs) = parse_mime(mime);

    let video_codec = codecs
        .iter()
        .find(|c| matches_any(c, &VIDEO_CODEC_PREFIXES))
        .cloned();
    let audio_codec = codecs
        .iter()
        .find(|c| matches_any(c, &AUDIO_CODEC_PREFIXES))
        .cloned();

    let has_video = kind == "video" && (video_codec.is_some() || codecs.is_empty());
    let has_audio = kind == "audio" || audio_codec.is_some();
    if !has_video && !has_audio {
        debug!("Dropping format {} without tracks ({})", format_id, mime);
        return None;
    }

    let bitrate_kbps = format
        .get("bitrate")
        .and_then(lenient_u64)
        .map(|bps| (bps / 1000) as u32);
    let audio_bitrate_kbps = if has_audio && !has_video {
        format
            .get("averageBitrate")
            .and_then(lenient_u64)
            .map(|bps| (bps / 1000) as u32)
            .or(bitrate_kbps)
    } else {
        None
    };

    Some(StreamDescriptor {
        format_id,
        container,
        mime_type: Some(mime.to_string()),
        video_codec: video_codec.filter(|_| has_video),
        audio_codec,
        width: has_video.then(|| format.get("width").and_then(lenient_u64)).flatten().map(|w| w as u32),
        height: has_video.then(|| format.get("height").and_then(lenient_u64)).flatten().map(|h| h as u32),
        fps: has_video.then(|| format.get("fps").and_then(lenient_u64)).flatten().map(|f| f as u32),
        audio_bitrate_kbps,
        bitrate_kbps,
        approx_size_bytes: format.get("contentLength").and_then(lenient_u64),
        quality_label: str_at(format, "/qualityLabel").map(str::to_string),
        has_video,
        has_audio,
        source_url: str_at(format, "/url").unwrap_or_default().to_string(),
    })
}

pub fn parse_caption_tracks(player: &Value) -> Vec<CaptionTrack> {
    let Some(tracks) = player
        .pointer("/captions/playerCaptionsTracklistRenderer/captionTracks")
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    tracks
        .iter()
        .filter_map(|track| {
            let source_url = str_at(track, "/baseUrl")?.to_string();
            let language_code = str_at(track, "/languageCode")?.to_string();
            let language_name = str_at(track, "/name/simpleText")
                .or_else(|| str_at(track, "/name/runs/0/text"))
                .unwrap_or(&language_code)
                .to_string();
            let is_auto_generated = str_at(track, "/kind") == Some("asr")
                || language_name.to_lowercase().contains("auto-generated");

            Some(CaptionTrack {
                language_code,
                language_name,
                is_auto_generated,
                source_url,
            })
        })
        .collect()
}

fn parse_thumbnails(details: &Value) -> Vec<ThumbnailVariant> {
    details
        .pointer("/thumbnail/thumbnails")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|t| {
                    let width = t.get("width").and_then(lenient_u64).unwrap_or(0) as u32;
                    Some(ThumbnailVariant {
                        quality: QualityTag::from_width(width),
                        width,
                        height: t.get("height").and_then(lenient_u64).unwrap_or(0) as u32,
                        source_url: str_at(t, "/url")?.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Standard image-host variants for an item id
pub fn synthesize_thumbnails(video_id: &str) -> Vec<ThumbnailVariant> {
    SYNTHESIZED_THUMBNAILS
        .iter()
        .map(|(name, quality, width, height)| ThumbnailVariant {
            quality: *quality,
            width: *width,
            height: *height,
            source_url: format!("https://i.ytimg.com/vi/{}/{}.jpg", video_id, name),
        })
        .collect()
}

fn playlist_title(data: &Value) -> Option<&str> {
    str_at(data, "/metadata/playlistMetadataRenderer/title")
        .or_else(|| str_at(data, "/header/playlistHeaderRenderer/title/simpleText"))
}

/// Walk tabs → sections → item sections → video list renderers
pub fn parse_playlist_entries(data: &Value) -> Vec<PlaylistEntry> {
    let mut entries = Vec::new();
    for tab in array_at(data, "/contents/twoColumnBrowseResultsRenderer/tabs") {
        for section in array_at(tab, "/tabRenderer/content/sectionListRenderer/contents") {
            for item in array_at(section, "/itemSectionRenderer/contents") {
                for video in array_at(item, "/playlistVideoListRenderer/contents") {
                    let Some(renderer) = video.get("playlistVideoRenderer") else {
                        continue;
                    };
                    let Some(id) = str_at(renderer, "/videoId") else {
                        continue;
                    };
                    entries.push(PlaylistEntry {
                        id: id.to_string(),
                        title: str_at(renderer, "/title/runs/0/text")
                            .or_else(|| str_at(renderer, "/title/simpleText"))
                            .map(str::to_string),
                    });
                }
            }
        }
    }
    entries
}

// ============================================================
// JSON helpers
// ============================================================

fn array_at<'a>(value: &'a Value, pointer: &str) -> &'a [Value] {
    value
        .pointer(pointer)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

pub(crate) fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

/// Numbers arrive both as JSON numbers and as decimal strings
pub(crate) fn lenient_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// `2009-10-25` or a full timestamp starting with a date
pub(crate) fn parse_publish_date(raw: &str) -> Option<NaiveDate> {
    raw.get(..10)
        .and_then(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d").ok())
}
