mod common;

use common::{catalog, payload, stream, FixtureServer, Route, ScriptedResolver};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tubeloader::downloader::{
    DownloadRequest, ItemDownloader, NoProgress, RetryPolicy, SubtitleFormat, SubtitleRequest,
    TransferConfig, TransferEngine,
};
use tubeloader::extractor::{CaptionTrack, QualityTag, ThumbnailVariant};
use tubeloader::selector::{FormatSelector, QualityConstraint};
use tubeloader::utils::error::ErrorKind;

fn downloader(resolver: Arc<ScriptedResolver>) -> ItemDownloader {
    let config = TransferConfig {
        retry: RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(5),
            multiplier: 2,
            max_delay: Duration::from_millis(20),
        },
        ..TransferConfig::default()
    };
    ItemDownloader::new(
        resolver,
        Arc::new(TransferEngine::new(Client::new(), config)),
        FormatSelector::default(),
    )
}

/// Combined 360p plus a 720p video-only and an audio-only stream
fn mixed_catalog(server: &FixtureServer, id: &str) -> tubeloader::StreamCatalog {
    catalog(
        id,
        "Fixture Clip",
        vec![
            stream("18", server.url("/s/18"), true, true, Some(360)),
            stream("137", server.url("/s/137"), true, false, Some(720)),
            stream("251", server.url("/s/251"), false, true, None),
        ],
    )
}

fn serve_streams(server: &FixtureServer) {
    server.route("/s/18", vec![Route::ok(payload(3_000))]);
    server.route("/s/137", vec![Route::ok(payload(8_000))]);
    server.route("/s/251", vec![Route::ok(payload(2_000))]);
}

#[tokio::test]
async fn test_best_downloads_video_and_audio_pair() {
    let server = FixtureServer::start().await;
    serve_streams(&server);
    let resolver = Arc::new(ScriptedResolver::new().with_catalog(mixed_catalog(&server, "abcdefghijk")));
    let dir = TempDir::new().unwrap();

    let request = DownloadRequest::new("abcdefghijk", dir.path());
    let report = downloader(resolver).download(&request, &NoProgress).await.unwrap();

    let results = report.primary.unwrap();
    let names: Vec<String> = results
        .iter()
        .map(|r| r.output_path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["Fixture Clip.f137.mp4", "Fixture Clip.f251.webm"]);
    assert_eq!(results[0].bytes_written, 8_000);
    assert_eq!(results[1].bytes_written, 2_000);
    assert!(report.subtitle.is_none());
    assert!(report.thumbnail.is_none());
}

#[tokio::test]
async fn test_audio_only_uses_override_name() {
    let server = FixtureServer::start().await;
    serve_streams(&server);
    let resolver = Arc::new(ScriptedResolver::new().with_catalog(mixed_catalog(&server, "abcdefghijk")));
    let dir = TempDir::new().unwrap();

    let mut request = DownloadRequest::new("abcdefghijk", dir.path());
    request.audio_only = true;
    request.filename_override = Some("my: song".into());

    let report = downloader(resolver).download(&request, &NoProgress).await.unwrap();
    let results = report.primary.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].output_path, dir.path().join("my_ song.webm"));
}

#[tokio::test]
async fn test_conflicting_flags_fail_before_resolving() {
    let resolver = Arc::new(ScriptedResolver::new());
    let dir = TempDir::new().unwrap();

    let mut request = DownloadRequest::new("abcdefghijk", dir.path());
    request.audio_only = true;
    request.video_only = true;

    let err = downloader(Arc::clone(&resolver))
        .download(&request, &NoProgress)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(resolver.resolve_calls(), 0);
}

#[tokio::test]
async fn test_resolution_failure_is_the_item_error() {
    let resolver = Arc::new(ScriptedResolver::new().with_failure("privateitem", ErrorKind::Unavailable));
    let dir = TempDir::new().unwrap();

    let err = downloader(resolver)
        .download(&DownloadRequest::new("privateitem", dir.path()), &NoProgress)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
    assert!(err.format_id.is_none());
}

#[tokio::test]
async fn test_unknown_format_is_recorded_as_primary_outcome() {
    let server = FixtureServer::start().await;
    let resolver = Arc::new(ScriptedResolver::new().with_catalog(mixed_catalog(&server, "abcdefghijk")));
    let dir = TempDir::new().unwrap();

    let mut request = DownloadRequest::new("abcdefghijk", dir.path());
    request.quality = QualityConstraint::FormatId("999".into());

    let report = downloader(resolver).download(&request, &NoProgress).await.unwrap();
    assert!(!report.is_success());
    assert_eq!(report.primary.unwrap_err().kind(), ErrorKind::NoMatchingFormat);
}

#[tokio::test]
async fn test_expired_source_is_resolved_again_once() {
    let server = FixtureServer::start().await;
    server.route("/expired/18", vec![Route::status(403)]);
    server.route("/fresh/18", vec![Route::ok(payload(1_234))]);

    let stale = catalog(
        "abcdefghijk",
        "Clip",
        vec![stream("18", server.url("/expired/18"), true, true, Some(360))],
    );
    let fresh = catalog(
        "abcdefghijk",
        "Clip",
        vec![stream("18", server.url("/fresh/18"), true, true, Some(360))],
    );
    let resolver = Arc::new(ScriptedResolver::new().with_catalog(stale).with_catalog(fresh));
    let dir = TempDir::new().unwrap();

    let report = downloader(Arc::clone(&resolver))
        .download(&DownloadRequest::new("abcdefghijk", dir.path()), &NoProgress)
        .await
        .unwrap();

    let results = report.primary.unwrap();
    assert_eq!(results[0].bytes_written, 1_234);
    assert_eq!(resolver.resolve_calls(), 2);
    assert_eq!(server.seen("/expired/18").len(), 1);
}

#[tokio::test]
async fn test_expired_twice_reports_source_expired_with_format() {
    let server = FixtureServer::start().await;
    server.route("/expired/18", vec![Route::status(410)]);
    let stale = catalog(
        "abcdefghijk",
        "Clip",
        vec![stream("18", server.url("/expired/18"), true, true, Some(360))],
    );
    let resolver = Arc::new(ScriptedResolver::new().with_catalog(stale));
    let dir = TempDir::new().unwrap();

    let report = downloader(Arc::clone(&resolver))
        .download(&DownloadRequest::new("abcdefghijk", dir.path()), &NoProgress)
        .await
        .unwrap();

    let err = report.primary.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SourceExpired);
    assert_eq!(err.format_id.as_deref(), Some("18"));
    assert_eq!(resolver.resolve_calls(), 2, "only one refresh is attempted");
}

#[tokio::test]
async fn test_subtitle_failure_does_not_fail_primary() {
    let server = FixtureServer::start().await;
    serve_streams(&server);
    server.route("/tt/en", vec![Route::status(404)]);

    let mut item = mixed_catalog(&server, "abcdefghijk");
    item.caption_tracks.push(CaptionTrack {
        language_code: "en".into(),
        language_name: "English".into(),
        is_auto_generated: false,
        source_url: server.url("/tt/en"),
    });
    let resolver = Arc::new(ScriptedResolver::new().with_catalog(item));
    let dir = TempDir::new().unwrap();

    let mut request = DownloadRequest::new("abcdefghijk", dir.path());
    request.subtitles = Some(SubtitleRequest::new("en", SubtitleFormat::Srt));

    let report = downloader(resolver).download(&request, &NoProgress).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.subtitle.unwrap().unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_subtitle_written_as_srt() {
    let server = FixtureServer::start().await;
    serve_streams(&server);
    server.route(
        "/tt/en",
        vec![Route::ok(
            r#"<?xml version="1.0"?><transcript><text start="0.5" dur="1">Hi &amp;amp; bye</text></transcript>"#,
        )],
    );

    let mut item = mixed_catalog(&server, "abcdefghijk");
    item.caption_tracks.push(CaptionTrack {
        language_code: "en".into(),
        language_name: "English (auto-generated)".into(),
        is_auto_generated: true,
        source_url: server.url("/tt/en"),
    });
    let resolver = Arc::new(ScriptedResolver::new().with_catalog(item));
    let dir = TempDir::new().unwrap();

    let mut request = DownloadRequest::new("abcdefghijk", dir.path());
    request.subtitles = Some(SubtitleRequest::new("en", SubtitleFormat::Srt));

    let report = downloader(resolver).download(&request, &NoProgress).await.unwrap();
    let saved = report.subtitle.unwrap().unwrap();
    assert_eq!(saved.output_path, dir.path().join("Fixture Clip.en.srt"));
    assert_eq!(
        std::fs::read_to_string(&saved.output_path).unwrap(),
        "1\n00:00:00,500 --> 00:00:01,500\nHi & bye\n\n"
    );
}

#[tokio::test]
async fn test_missing_subtitle_language_without_fallback() {
    let server = FixtureServer::start().await;
    serve_streams(&server);
    let resolver = Arc::new(ScriptedResolver::new().with_catalog(mixed_catalog(&server, "abcdefghijk")));
    let dir = TempDir::new().unwrap();

    let mut request = DownloadRequest::new("abcdefghijk", dir.path());
    request.subtitles = Some(SubtitleRequest::new("de", SubtitleFormat::Vtt));

    let report = downloader(resolver).download(&request, &NoProgress).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.subtitle.unwrap().unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_thumbnail_falls_back_to_next_variant() {
    let server = FixtureServer::start().await;
    serve_streams(&server);
    server.route("/img/maxres.jpg", vec![Route::status(404)]);
    server.route("/img/hq.jpg", vec![Route::ok(payload(500))]);

    let mut item = mixed_catalog(&server, "abcdefghijk");
    item.thumbnails = vec![
        ThumbnailVariant {
            quality: QualityTag::High,
            width: 480,
            height: 360,
            source_url: server.url("/img/hq.jpg"),
        },
        ThumbnailVariant {
            quality: QualityTag::Max,
            width: 1280,
            height: 720,
            source_url: server.url("/img/maxres.jpg"),
        },
    ];
    let resolver = Arc::new(ScriptedResolver::new().with_catalog(item));
    let dir = TempDir::new().unwrap();

    let mut request = DownloadRequest::new("abcdefghijk", dir.path());
    request.with_thumbnail = true;

    let report = downloader(resolver).download(&request, &NoProgress).await.unwrap();
    let thumb = report.thumbnail.unwrap().unwrap();
    assert_eq!(thumb.output_path, dir.path().join("Fixture Clip.jpg"));
    assert_eq!(thumb.bytes_written, 500);
    assert_eq!(server.seen("/img/maxres.jpg").len(), 1);
}
