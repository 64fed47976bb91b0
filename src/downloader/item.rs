//! Download of one item: primary stream(s), then optional subtitle and thumbnail

use crate::downloader::captions::{SubtitleRequest, SubtitleResolver};
use crate::downloader::engine::{TransferEngine, TransferResult};
use crate::downloader::progress::{NoProgress, ProgressSink};
use crate::downloader::thumbnail::{image_extension, ThumbnailResolver};
use crate::extractor::models::{StreamCatalog, StreamDescriptor};
use crate::extractor::traits::MetadataResolver;
use crate::extractor::{build_resolver, RequestLimiter};
use crate::selector::{FormatSelector, QualityConstraint, Selection, TrackFilter};
use crate::utils::config::Settings;
use crate::utils::error::{ErrorKind, Result, TubeloaderError};
use crate::utils::filename::{output_path, sanitize_filename};
use crate::utils::http::build_client;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What to download for one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Item id or URL
    pub identifier: String,
    pub quality: QualityConstraint,
    pub audio_only: bool,
    pub video_only: bool,
    pub output_dir: PathBuf,
    /// Used instead of the title as file stem
    pub filename_override: Option<String>,
    pub subtitles: Option<SubtitleRequest>,
    pub with_thumbnail: bool,
}

impl DownloadRequest {
    pub fn new(identifier: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            identifier: identifier.into(),
            quality: QualityConstraint::Best,
            audio_only: false,
            video_only: false,
            output_dir: output_dir.into(),
            filename_override: None,
            subtitles: None,
            with_thumbnail: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.audio_only && self.video_only {
            return Err(TubeloaderError::Configuration(
                "audio_only and video_only cannot both be set".to_string(),
            ));
        }
        if self.identifier.trim().is_empty() {
            return Err(TubeloaderError::Configuration("identifier is empty".to_string()));
        }
        Ok(())
    }

    pub fn track_filter(&self) -> TrackFilter {
        match (self.audio_only, self.video_only) {
            (true, _) => TrackFilter::AudioOnly,
            (_, true) => TrackFilter::VideoOnly,
            _ => TrackFilter::Any,
        }
    }

    /// Same options, another item; the override is dropped so playlist
    /// items keep their own titles
    pub fn for_item(&self, identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            filename_override: None,
            ..self.clone()
        }
    }
}

/// A failed transfer and the format it was for, when one had been chosen
#[derive(Debug, Error)]
#[error("{source}")]
pub struct TransferError {
    pub source: TubeloaderError,
    pub format_id: Option<String>,
}

impl TransferError {
    pub fn new(source: TubeloaderError, format_id: Option<String>) -> Self {
        Self { source, format_id }
    }

    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

impl From<TubeloaderError> for TransferError {
    fn from(source: TubeloaderError) -> Self {
        Self::new(source, None)
    }
}

/// Outcome of one item. Sub-transfers are recorded separately and never
/// fail the primary one.
#[derive(Debug)]
pub struct ItemReport {
    pub id: String,
    pub title: String,
    /// One file, or video and audio files for a pair
    pub primary: std::result::Result<Vec<TransferResult>, TransferError>,
    pub subtitle: Option<std::result::Result<TransferResult, TransferError>>,
    pub thumbnail: Option<std::result::Result<TransferResult, TransferError>>,
}

impl ItemReport {
    pub fn is_success(&self) -> bool {
        self.primary.is_ok()
    }

    /// Every file written for this item
    pub fn outputs(&self) -> Vec<&TransferResult> {
        let mut outputs: Vec<&TransferResult> = match &self.primary {
            Ok(results) => results.iter().collect(),
            Err(_) => Vec::new(),
        };
        outputs.extend(self.subtitle.iter().filter_map(|r| r.as_ref().ok()));
        outputs.extend(self.thumbnail.iter().filter_map(|r| r.as_ref().ok()));
        outputs
    }
}

pub struct ItemDownloader {
    resolver: Arc<dyn MetadataResolver>,
    engine: Arc<TransferEngine>,
    selector: FormatSelector,
}

impl ItemDownloader {
    pub fn new(
        resolver: Arc<dyn MetadataResolver>,
        engine: Arc<TransferEngine>,
        selector: FormatSelector,
    ) -> Self {
        Self {
            resolver,
            engine,
            selector,
        }
    }

    /// Wire resolver, engine and selector from settings with one shared client
    pub fn from_settings(settings: &Settings, cancel: Option<CancellationToken>) -> Result<Self> {
        settings.validate()?;
        let client = build_client(settings)?;
        let limiter = Arc::new(RequestLimiter::new(settings.request_spacing()));
        let resolver = build_resolver(settings, client.clone(), limiter)?;
        let mut engine = TransferEngine::new(client, settings.transfer_config());
        if let Some(token) = cancel {
            engine = engine.with_cancellation(token);
        }
        let engine = Arc::new(engine);
        Ok(Self::new(
            resolver,
            engine,
            FormatSelector::new(settings.codec_preference.clone()),
        ))
    }

    pub fn resolver(&self) -> &Arc<dyn MetadataResolver> {
        &self.resolver
    }

    pub async fn download(
        &self,
        request: &DownloadRequest,
        progress: &dyn ProgressSink,
    ) -> std::result::Result<ItemReport, TransferError> {
        request.validate()?;
        let catalog = self.resolver.resolve(&request.identifier).await?;
        info!("Resolved {} \"{}\" ({} streams)", catalog.id, catalog.title, catalog.streams.len());

        let stem = sanitize_filename(
            request
                .filename_override
                .as_deref()
                .unwrap_or(catalog.title.as_str()),
        );

        let primary = match self
            .selector
            .select(&catalog, &request.quality, request.track_filter())
        {
            Ok(selection) => self.transfer_selection(request, &catalog, &stem, selection, progress).await,
            Err(e) => {
                warn!("No format for {} matches {}: {}", catalog.id, request.quality, e);
                Err(TransferError::from(e))
            }
        };

        let subtitle = match &request.subtitles {
            Some(subs) => Some(self.download_subtitle(request, &catalog, &stem, subs).await),
            None => None,
        };

        let thumbnail = if request.with_thumbnail {
            Some(self.download_thumbnail(request, &catalog, &stem).await)
        } else {
            None
        };

        Ok(ItemReport {
            id: catalog.id,
            title: catalog.title,
            primary,
            subtitle,
            thumbnail,
        })
    }

    async fn transfer_selection(
        &self,
        request: &DownloadRequest,
        catalog: &StreamCatalog,
        stem: &str,
        selection: Selection,
        progress: &dyn ProgressSink,
    ) -> std::result::Result<Vec<TransferResult>, TransferError> {
        match selection {
            Selection::Single(stream) => {
                let destination = output_path(&request.output_dir, stem, stream.file_extension());
                let result = self
                    .transfer_stream(catalog, &stream, destination, progress)
                    .await?;
                Ok(vec![result])
            }
            Selection::Pair { video, audio } => {
                let mut results = Vec::with_capacity(2);
                for stream in [&video, &audio] {
                    let paired_stem = format!("{}.f{}", stem, stream.format_id);
                    let destination =
                        output_path(&request.output_dir, &paired_stem, stream.file_extension());
                    results.push(
                        self.transfer_stream(catalog, stream, destination, progress)
                            .await?,
                    );
                }
                Ok(results)
            }
        }
    }

    /// Transfer one stream; an expired URL gets one fresh catalog
    async fn transfer_stream(
        &self,
        catalog: &StreamCatalog,
        stream: &StreamDescriptor,
        destination: PathBuf,
        progress: &dyn ProgressSink,
    ) -> std::result::Result<TransferResult, TransferError> {
        let tag = format!("{}-{}", catalog.id, stream.format_id);
        let with_format = |e: TubeloaderError| TransferError::new(e, Some(stream.format_id.clone()));

        match self.engine.transfer(stream, &destination, &tag, progress).await {
            Err(TubeloaderError::SourceExpired { status }) => {
                warn!(
                    "Stream URL for {} format {} expired (HTTP {}), resolving again",
                    catalog.id, stream.format_id, status
                );
                let fresh = self.resolver.resolve(&catalog.id).await.map_err(with_format)?;
                let fresh_stream = fresh.stream(&stream.format_id).ok_or_else(|| {
                    with_format(TubeloaderError::NoMatchingFormat(format!(
                        "format {} is gone after resolving {} again",
                        stream.format_id, catalog.id
                    )))
                })?;
                self.engine
                    .transfer(fresh_stream, &destination, &tag, progress)
                    .await
                    .map_err(with_format)
            }
            other => other.map_err(with_format),
        }
    }

    async fn download_subtitle(
        &self,
        request: &DownloadRequest,
        catalog: &StreamCatalog,
        stem: &str,
        subs: &SubtitleRequest,
    ) -> std::result::Result<TransferResult, TransferError> {
        let started = Instant::now();
        let tracks = SubtitleResolver::available(catalog);
        let track = SubtitleResolver::choose(tracks, &subs.language, subs.allow_fallback)
            .ok_or_else(|| {
                TubeloaderError::NotFound(format!(
                    "no caption track for language '{}' ({} available)",
                    subs.language,
                    tracks.len()
                ))
            })?;

        let raw = self
            .engine
            .fetch_text(&SubtitleResolver::track_url(track, subs.format))
            .await?;
        let rendered = SubtitleResolver::render(&raw, subs.format)?;

        let lang_stem = format!("{}.{}", stem, sanitize_filename(&subs.language));
        let destination = output_path(&request.output_dir, &lang_stem, subs.format.extension());
        let tag = format!("{}-{}", catalog.id, track.language_code);
        let bytes_written = self
            .engine
            .write_atomically(&destination, &tag, rendered.as_bytes())
            .await?;

        debug!("Wrote {} caption track to {}", track.language_code, destination.display());
        Ok(TransferResult {
            output_path: destination,
            bytes_written,
            duration: started.elapsed(),
        })
    }

    /// Best variant first; a missing image falls through to the next one
    async fn download_thumbnail(
        &self,
        request: &DownloadRequest,
        catalog: &StreamCatalog,
        stem: &str,
    ) -> std::result::Result<TransferResult, TransferError> {
        let mut last_error =
            TubeloaderError::NotFound(format!("{} has no thumbnail", catalog.id));

        for variant in ThumbnailResolver::ranked(catalog) {
            let destination =
                output_path(&request.output_dir, stem, image_extension(&variant.source_url));
            let tag = format!("{}-thumb", catalog.id);
            match self
                .engine
                .transfer_url(&variant.source_url, &destination, &tag, &NoProgress)
                .await
            {
                Ok(result) => return Ok(result),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!("Thumbnail {:?} variant missing, trying the next one", variant.quality);
                    last_error = e;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(last_error.into())
    }
}
