//! Concurrent download of a whole playlist

use crate::downloader::item::{DownloadRequest, ItemDownloader, ItemReport, TransferError};
use crate::queue::events::{emit, EventProgress, PlaylistEvent};
use crate::utils::config::validate_worker_count;
use crate::utils::error::{ErrorKind, Result, TubeloaderError};
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// One playlist item and what happened to it
#[derive(Debug)]
pub struct PlaylistItem {
    pub identifier: String,
    pub outcome: std::result::Result<ItemReport, TransferError>,
}

impl PlaylistItem {
    /// Resolved and the primary stream(s) saved
    pub fn is_success(&self) -> bool {
        matches!(&self.outcome, Ok(report) if report.is_success())
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.outcome {
            Ok(report) => report.primary.as_ref().err().map(TransferError::kind),
            Err(e) => Some(e.kind()),
        }
    }

    pub fn error(&self) -> Option<&TransferError> {
        match &self.outcome {
            Ok(report) => report.primary.as_ref().err(),
            Err(e) => Some(e),
        }
    }
}

/// Outcome of a playlist download, items in playlist order
#[derive(Debug)]
pub struct PlaylistResult {
    pub playlist_id: String,
    pub title: String,
    pub items: Vec<PlaylistItem>,
    pub success_count: usize,
    pub failure_count: usize,
    pub total: usize,
}

impl PlaylistResult {
    fn from_items(playlist_id: String, title: String, items: Vec<PlaylistItem>) -> Self {
        let success_count = items.iter().filter(|i| i.is_success()).count();
        let total = items.len();
        Self {
            playlist_id,
            title,
            items,
            success_count,
            failure_count: total - success_count,
            total,
        }
    }
}

pub struct PlaylistOrchestrator {
    downloader: Arc<ItemDownloader>,
}

impl PlaylistOrchestrator {
    pub fn new(downloader: Arc<ItemDownloader>) -> Self {
        Self { downloader }
    }

    /// Download every item of a playlist with up to `max_workers` in flight.
    ///
    /// Only a bad configuration or a playlist that cannot be listed fails the
    /// call; item failures are recorded in the result.
    pub async fn download_playlist(
        &self,
        playlist_identifier: &str,
        template: &DownloadRequest,
        max_workers: usize,
        events: Option<mpsc::Sender<PlaylistEvent>>,
    ) -> Result<PlaylistResult> {
        validate_worker_count(max_workers)?;
        template.for_item(playlist_identifier).validate()?;

        let listing = self
            .downloader
            .resolver()
            .resolve_playlist(playlist_identifier)
            .await?;
        if listing.entries.is_empty() {
            return Err(TubeloaderError::NotFound(format!(
                "playlist {} has no items",
                listing.id
            )));
        }

        let identifiers: Vec<String> = listing.entries.into_iter().map(|e| e.id).collect();
        let total = identifiers.len();
        let worker_count = max_workers.min(total);
        info!(
            "Downloading playlist \"{}\": {} items with {} workers",
            listing.title, total, worker_count
        );

        let queue: Arc<Mutex<VecDeque<(usize, String)>>> = Arc::new(Mutex::new(
            identifiers.iter().cloned().enumerate().collect(),
        ));

        // Sent per finished item, not when the worker exits
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(usize, PlaylistItem)>();

        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            let queue = Arc::clone(&queue);
            let downloader = Arc::clone(&self.downloader);
            let template = template.clone();
            let events = events.clone();
            let done_tx = done_tx.clone();

            workers.spawn(async move {
                loop {
                    let next = queue.lock().await.pop_front();
                    let Some((index, identifier)) = next else {
                        break;
                    };
                    debug!("Worker {} took item {} ({})", worker_id, index, identifier);
                    let item = download_item(&downloader, &template, index, identifier, &events).await;
                    if done_tx.send((index, item)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(done_tx);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Playlist worker stopped abnormally: {}", e);
            }
        }

        let mut slots: Vec<Option<PlaylistItem>> = (0..total).map(|_| None).collect();
        while let Some((index, item)) = done_rx.recv().await {
            slots[index] = Some(item);
        }

        let items: Vec<PlaylistItem> = slots
            .into_iter()
            .zip(identifiers)
            .map(|(slot, identifier)| {
                slot.unwrap_or_else(|| PlaylistItem {
                    outcome: Err(TubeloaderError::Internal(format!(
                        "worker handling {} stopped before reporting",
                        identifier
                    ))
                    .into()),
                    identifier,
                })
            })
            .collect();

        let result = PlaylistResult::from_items(listing.id, listing.title, items);
        if result.failure_count > 0 {
            warn!(
                "Playlist finished: {}/{} items downloaded, {} failed",
                result.success_count, result.total, result.failure_count
            );
        } else {
            info!("Playlist finished: all {} items downloaded", result.total);
        }
        Ok(result)
    }
}

async fn download_item(
    downloader: &ItemDownloader,
    template: &DownloadRequest,
    index: usize,
    identifier: String,
    events: &Option<mpsc::Sender<PlaylistEvent>>,
) -> PlaylistItem {
    emit(
        events,
        PlaylistEvent::ItemStarted {
            index,
            identifier: identifier.clone(),
            timestamp: Utc::now(),
        },
    );

    let request = template.for_item(&identifier);
    let sink = EventProgress {
        index,
        identifier: identifier.clone(),
        events: events.clone(),
    };
    let item = PlaylistItem {
        outcome: downloader.download(&request, &sink).await,
        identifier,
    };

    match item.error() {
        Some(e) => warn!("Item {} ({}) failed: [{}] {}", index, item.identifier, e.kind(), e),
        None => debug!("Item {} ({}) done", index, item.identifier),
    }

    emit(
        events,
        PlaylistEvent::ItemFinished {
            index,
            identifier: item.identifier.clone(),
            success: item.is_success(),
            error: item.error().map(|e| e.to_string()),
            timestamp: Utc::now(),
        },
    );
    item
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::engine::TransferResult;
    use std::path::PathBuf;
    use std::time::Duration;

    fn report(primary: std::result::Result<Vec<TransferResult>, TransferError>) -> ItemReport {
        ItemReport {
            id: "abc".into(),
            title: "t".into(),
            primary,
            subtitle: None,
            thumbnail: None,
        }
    }

    #[test]
    fn test_counts_follow_primary_outcome() {
        let saved = TransferResult {
            output_path: PathBuf::from("/tmp/a.mp4"),
            bytes_written: 10,
            duration: Duration::from_millis(5),
        };
        let items = vec![
            PlaylistItem {
                identifier: "a".into(),
                outcome: Ok(report(Ok(vec![saved]))),
            },
            PlaylistItem {
                identifier: "b".into(),
                outcome: Ok(report(Err(TubeloaderError::NoMatchingFormat("none".into()).into()))),
            },
            PlaylistItem {
                identifier: "c".into(),
                outcome: Err(TubeloaderError::Unavailable("private".into()).into()),
            },
        ];

        let result = PlaylistResult::from_items("PL1".into(), "list".into(), items);
        assert_eq!((result.total, result.success_count, result.failure_count), (3, 1, 2));
        assert_eq!(result.items[0].error_kind(), None);
        assert_eq!(result.items[1].error_kind(), Some(ErrorKind::NoMatchingFormat));
        assert_eq!(result.items[2].error_kind(), Some(ErrorKind::Unavailable));
    }
}
