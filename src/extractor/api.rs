//! Resolver backed by the hosted metadata API
//!
//! The API returns rich metadata but, for public keys, no stream list. When
//! an item comes back without `formats`, streams and caption tracks are taken
//! from the page player data instead.

use crate::extractor::fetch::Fetcher;
use crate::extractor::ids::{parse_playlist_id, parse_video_id};
use crate::extractor::models::{
    PlaylistEntry, PlaylistListing, QualityTag, StreamCatalog, ThumbnailVariant,
};
use crate::extractor::page::{
    check_playability, lenient_u64, parse_caption_tracks, parse_format, parse_publish_date, str_at,
    synthesize_thumbnails, PageResolver,
};
use crate::extractor::traits::MetadataResolver;
use crate::utils::error::{Result, TubeloaderError};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use regex::Regex;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Page size of `playlistItems`, the API maximum
const PLAYLIST_PAGE_SIZE: &str = "50";

/// Stop following `nextPageToken` after this many pages
const MAX_PLAYLIST_PAGES: usize = 200;

pub struct ApiResolver {
    fetcher: Fetcher,
    api_base_url: String,
    api_key: String,
    page: Arc<PageResolver>,
}

impl ApiResolver {
    pub fn new(fetcher: Fetcher, api_base_url: &str, api_key: String, page: Arc<PageResolver>) -> Self {
        Self {
            fetcher,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            api_key,
            page,
        }
    }

    fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> Result<String> {
        let base = format!("{}/{}", self.api_base_url, path);
        let url = Url::parse_with_params(&base, params.iter().chain([&("key", self.api_key.as_str())]))
            .map_err(|e| TubeloaderError::Configuration(format!("bad API base URL {}: {}", base, e)))?;
        Ok(url.into())
    }

    async fn get_json(&self, url: &str, context: &str) -> Result<Value> {
        let body = self
            .fetcher
            .get_text_with(url, context, |status, body| map_api_error(status, body, context))
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// The single item of a `videos`/`playlists` response
    fn first_item(response: Value, what: &str, id: &str) -> Result<Value> {
        response
            .get("items")
            .and_then(Value::as_array)
            .and_then(|items| items.first())
            .cloned()
            .ok_or_else(|| TubeloaderError::NotFound(format!("{} {} does not exist", what, id)))
    }
}

#[async_trait]
impl MetadataResolver for ApiResolver {
    fn id(&self) -> &'static str {
        "api"
    }

    async fn resolve(&self, identifier: &str) -> Result<StreamCatalog> {
        let video_id = parse_video_id(identifier)?;
        info!("Resolving {} from metadata API", video_id);

        let url = self.endpoint(
            "videos",
            &[("id", video_id.as_str()), ("part", "snippet,contentDetails,statistics")],
        )?;
        let item = Self::first_item(self.get_json(&url, "videos").await?, "video", &video_id)?;

        let snippet = item.get("snippet").cloned().unwrap_or(Value::Null);
        let mut streams: Vec<_> = item
            .get("formats")
            .and_then(Value::as_array)
            .map(|formats| {
                formats
                    .iter()
                    .filter_map(parse_format)
                    .filter(|s| !s.source_url.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let mut caption_tracks = Vec::new();
        if streams.is_empty() {
            debug!("API returned no formats for {}, reading player data", video_id);
            let player = self.page.player_data(&video_id).await?;
            check_playability(&player)?;
            streams = self.page.parse_streams(&player).await;
            caption_tracks = parse_caption_tracks(&player);
        }

        let mut thumbnails = parse_thumbnail_map(snippet.get("thumbnails"));
        if thumbnails.is_empty() {
            thumbnails = synthesize_thumbnails(&video_id);
        }

        Ok(StreamCatalog {
            title: str_at(&snippet, "/title").unwrap_or(&video_id).to_string(),
            author: str_at(&snippet, "/channelTitle").map(str::to_string),
            description: str_at(&snippet, "/description").map(str::to_string),
            duration: str_at(&item, "/contentDetails/duration").and_then(parse_iso8601_duration),
            publish_date: str_at(&snippet, "/publishedAt").and_then(parse_rfc3339_date),
            view_count: item.pointer("/statistics/viewCount").and_then(lenient_u64),
            is_live: str_at(&snippet, "/liveBroadcastContent") == Some("live"),
            thumbnails,
            caption_tracks,
            streams,
            resolver: self.id().to_string(),
            id: video_id,
        })
    }

    async fn resolve_playlist(&self, identifier: &str) -> Result<PlaylistListing> {
        let playlist_id = parse_playlist_id(identifier)?;
        info!("Resolving playlist {} from metadata API", playlist_id);

        let url = self.endpoint("playlists", &[("id", playlist_id.as_str()), ("part", "snippet")])?;
        let playlist = Self::first_item(self.get_json(&url, "playlists").await?, "playlist", &playlist_id)?;
        let title = str_at(&playlist, "/snippet/title")
            .unwrap_or(&playlist_id)
            .to_string();

        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;
        for page in 0..MAX_PLAYLIST_PAGES {
            let mut params = vec![
                ("playlistId", playlist_id.as_str()),
                ("part", "snippet"),
                ("maxResults", PLAYLIST_PAGE_SIZE),
            ];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }
            let url = self.endpoint("playlistItems", &params)?;
            let response = self.get_json(&url, "playlistItems").await?;

            entries.extend(parse_playlist_items(&response));
            debug!("Playlist {} page {}: {} entries so far", playlist_id, page + 1, entries.len());

            page_token = str_at(&response, "/nextPageToken").map(str::to_string);
            if page_token.is_none() {
                break;
            }
        }
        if page_token.is_some() {
            warn!(
                "Playlist {} truncated after {} pages",
                playlist_id, MAX_PLAYLIST_PAGES
            );
        }

        Ok(PlaylistListing {
            id: playlist_id,
            title,
            entries,
        })
    }
}

/// Quota exhaustion arrives as a 403 with a reason in the body
fn map_api_error(status: StatusCode, body: &str, context: &str) -> TubeloaderError {
    let reason = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| str_at(&v, "/error/errors/0/reason").map(str::to_string));

    match (status.as_u16(), reason.as_deref()) {
        (403, Some("quotaExceeded" | "rateLimitExceeded" | "userRateLimitExceeded")) => {
            TubeloaderError::RateLimited(format!("{}: {}", context, reason.as_deref().unwrap_or_default()))
        }
        (400, Some("keyInvalid")) => {
            TubeloaderError::Configuration(format!("{}: API key rejected", context))
        }
        _ => TubeloaderError::from_resolver_status(status, context),
    }
}

fn parse_thumbnail_map(map: Option<&Value>) -> Vec<ThumbnailVariant> {
    let Some(map) = map.and_then(Value::as_object) else {
        return Vec::new();
    };

    let mut thumbnails: Vec<ThumbnailVariant> = map
        .iter()
        .filter_map(|(key, t)| {
            let width = t.get("width").and_then(lenient_u64).unwrap_or(0) as u32;
            Some(ThumbnailVariant {
                quality: QualityTag::from_api_key(key).unwrap_or_else(|| QualityTag::from_width(width)),
                width,
                height: t.get("height").and_then(lenient_u64).unwrap_or(0) as u32,
                source_url: str_at(t, "/url")?.to_string(),
            })
        })
        .collect();
    thumbnails.sort_by_key(|t| (t.quality, t.width));
    thumbnails
}

fn parse_playlist_items(response: &Value) -> Vec<PlaylistEntry> {
    response
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| {
                    str_at(item, "/snippet/resourceId/kind") == Some("youtube#video")
                })
                .filter_map(|item| {
                    Some(PlaylistEntry {
                        id: str_at(item, "/snippet/resourceId/videoId")?.to_string(),
                        title: str_at(item, "/snippet/title").map(str::to_string),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_rfc3339_date(raw: &str) -> Option<NaiveDate> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.date_naive())
        .ok()
        .or_else(|| parse_publish_date(raw))
}

fn iso8601_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+(?:\.\d+)?)S)?)?$")
            .expect("static regex")
    })
}

/// Parse `PT1H2M3S`-style durations (days supported, no years or months)
pub fn parse_iso8601_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw == "P" || raw.ends_with('T') {
        return None;
    }
    let caps = iso8601_regex().captures(raw)?;

    let whole = |idx: usize| -> Option<u64> {
        caps.get(idx).map_or(Some(0), |m| m.as_str().parse().ok())
    };
    let days = whole(1)?;
    let hours = whole(2)?;
    let minutes = whole(3)?;
    let seconds: f64 = caps.get(4).map_or(Some(0.0), |m| m.as_str().parse().ok())?;

    let total = days
        .checked_mul(86_400)?
        .checked_add(hours.checked_mul(3_600)?)?
        .checked_add(minutes.checked_mul(60)?)?;
    Duration::from_secs(total).checked_add(Duration::try_from_secs_f64(seconds).ok()?)
}
