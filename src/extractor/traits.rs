use crate::extractor::models::{PlaylistListing, StreamCatalog};
use crate::utils::error::{Result, TubeloaderError};
use async_trait::async_trait;

/// Core trait for metadata resolution strategies
///
/// This trait isolates the download pipeline from how a catalog is obtained
/// (hosted API, public page scraping, test doubles). One implementation is
/// chosen when the process is configured and used for the whole run.
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    /// Returns a unique identifier for this resolver (e.g., "api", "page")
    fn id(&self) -> &'static str;

    /// Resolves a video URL or bare id into its catalog
    ///
    /// Read-only: performs outbound requests and never touches the disk.
    async fn resolve(&self, identifier: &str) -> Result<StreamCatalog>;

    /// Resolves a playlist URL or bare id into its ordered entries
    async fn resolve_playlist(&self, identifier: &str) -> Result<PlaylistListing> {
        Err(TubeloaderError::Configuration(format!(
            "Playlist resolution not supported by {} (requested {})",
            self.id(),
            identifier
        )))
    }
}
