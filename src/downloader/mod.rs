//! Transfer engine and per-item download

pub mod captions;
pub mod engine;
pub mod item;
pub mod progress;
pub mod retry;
pub mod thumbnail;

// Re-export for convenience
pub use captions::{SubtitleFormat, SubtitleRequest, SubtitleResolver};
pub use engine::{TransferConfig, TransferEngine, TransferResult};
pub use item::{DownloadRequest, ItemDownloader, ItemReport, TransferError};
pub use progress::{NoProgress, ProgressSink, TransferProgress, TransferStatus};
pub use retry::RetryPolicy;
pub use thumbnail::ThumbnailResolver;
