//! Thumbnail variant choice

use crate::extractor::models::{StreamCatalog, ThumbnailVariant};
use std::cmp::Reverse;

pub struct ThumbnailResolver;

impl ThumbnailResolver {
    /// Highest quality tag, widest image among equals
    pub fn best(catalog: &StreamCatalog) -> Option<&ThumbnailVariant> {
        Self::ranked(catalog).into_iter().next()
    }

    /// All variants, best first. Ties keep source order.
    pub fn ranked(catalog: &StreamCatalog) -> Vec<&ThumbnailVariant> {
        let mut variants: Vec<&ThumbnailVariant> = catalog.thumbnails.iter().collect();
        variants.sort_by_key(|t| Reverse((t.quality, t.width)));
        variants
    }
}

/// Image extension taken from the URL path; `jpg` when it names none we know
pub fn image_extension(url: &str) -> &'static str {
    let path = url::Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_default();
    match path.rsplit_once('.').map(|(_, ext)| ext) {
        Some("webp") => "webp",
        Some("png") => "png",
        _ => "jpg",
    }
}
