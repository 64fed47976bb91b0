use crate::downloader::progress::{ProgressSink, TransferProgress};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Events emitted while a playlist downloads
#[derive(Debug, Clone, Serialize)]
pub enum PlaylistEvent {
    /// A worker picked up the item
    ItemStarted {
        index: usize,
        identifier: String,
        timestamp: DateTime<Utc>,
    },
    /// Bytes written for the item's current stream
    ItemProgress {
        index: usize,
        identifier: String,
        downloaded_bytes: u64,
        total_bytes: Option<u64>,
    },
    ItemFinished {
        index: usize,
        identifier: String,
        success: bool,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl PlaylistEvent {
    pub fn index(&self) -> usize {
        match self {
            PlaylistEvent::ItemStarted { index, .. }
            | PlaylistEvent::ItemProgress { index, .. }
            | PlaylistEvent::ItemFinished { index, .. } => *index,
        }
    }
}

/// Send an event without waiting on the receiver.
///
/// Workers never block on a full or closed channel; events that do not fit
/// are dropped and the download carries on.
pub(crate) fn emit(events: &Option<mpsc::Sender<PlaylistEvent>>, event: PlaylistEvent) {
    let Some(tx) = events else {
        return;
    };
    match tx.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => {
            warn!("Playlist event channel full, dropping event for item {}", event.index())
        }
        Err(TrySendError::Closed(_)) => debug!("Playlist event receiver dropped"),
    }
}

/// Forwards transfer progress of one playlist item as `ItemProgress`
pub(crate) struct EventProgress {
    pub index: usize,
    pub identifier: String,
    pub events: Option<mpsc::Sender<PlaylistEvent>>,
}

impl ProgressSink for EventProgress {
    fn on_progress(&self, progress: &TransferProgress) {
        let Some(tx) = &self.events else {
            return;
        };
        let event = PlaylistEvent::ItemProgress {
            index: self.index,
            identifier: self.identifier.clone(),
            downloaded_bytes: progress.downloaded_bytes,
            total_bytes: progress.total_bytes,
        };
        if let Err(e) = tx.try_send(event) {
            debug!("Playlist progress event dropped: {}", e);
        }
    }
}
