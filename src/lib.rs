//! Tubeloader library

pub mod downloader;
pub mod extractor;
pub mod queue;
pub mod selector;
pub mod utils;

// Re-export main types for easier use
pub use downloader::{
    DownloadRequest, ItemDownloader, ItemReport, ProgressSink, SubtitleFormat, SubtitleRequest,
    TransferEngine, TransferError, TransferProgress, TransferResult,
};
pub use extractor::{build_resolver, MetadataResolver, PlaylistListing, StreamCatalog, StreamDescriptor};
pub use queue::{PlaylistEvent, PlaylistItem, PlaylistOrchestrator, PlaylistResult};
pub use selector::{FormatSelector, QualityConstraint, Selection, TrackFilter};
pub use utils::{ErrorKind, Settings, TubeloaderError};
