pub mod api;
pub mod cipher;
pub mod fetch;
pub mod ids;
pub mod limiter;
pub mod models;
pub mod page;
pub mod strategy;
pub mod traits;

pub use api::ApiResolver;
pub use cipher::{SignatureDecipher, TransformDecipher, UnsupportedDecipher};
pub use limiter::RequestLimiter;
pub use models::{
    CaptionTrack, PlaylistEntry, PlaylistListing, QualityTag, StreamCatalog, StreamDescriptor,
    ThumbnailVariant,
};
pub use page::PageResolver;
pub use strategy::build_resolver;
pub use traits::MetadataResolver;
