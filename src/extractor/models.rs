//! Data structures for resolved items

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Everything resolved for one item: metadata plus the downloadable streams.
///
/// Built by a resolver and never mutated afterwards. Stream URLs inside are
/// signed and expire, so a catalog should not outlive the download it was
/// resolved for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamCatalog {
    pub id: String,
    pub title: String,
    pub author: Option<String>,
    pub description: Option<String>,
    pub duration: Option<Duration>,
    pub publish_date: Option<NaiveDate>,
    pub view_count: Option<u64>,
    pub is_live: bool,
    /// Ordered as delivered by the source
    pub thumbnails: Vec<ThumbnailVariant>,
    pub caption_tracks: Vec<CaptionTrack>,
    pub streams: Vec<StreamDescriptor>,
    /// Id of the resolver that produced this catalog
    pub resolver: String,
}

impl StreamCatalog {
    pub fn stream(&self, format_id: &str) -> Option<&StreamDescriptor> {
        self.streams.iter().find(|s| s.format_id == format_id)
    }
}

/// One downloadable stream variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Unique within its catalog
    pub format_id: String,
    /// Wrapper type, e.g. "mp4" or "webm"
    pub container: String,
    pub mime_type: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    pub audio_bitrate_kbps: Option<u32>,
    /// Total bitrate in kbps when the source reports it
    pub bitrate_kbps: Option<u32>,
    pub approx_size_bytes: Option<u64>,
    pub quality_label: Option<String>,
    pub has_video: bool,
    pub has_audio: bool,
    /// Signed and short-lived; re-resolve the catalog when it stops working
    pub source_url: String,
}

impl StreamDescriptor {
    /// Carries both tracks in one file
    pub fn is_combined(&self) -> bool {
        self.has_video && self.has_audio
    }

    pub fn is_video_only(&self) -> bool {
        self.has_video && !self.has_audio
    }

    pub fn is_audio_only(&self) -> bool {
        self.has_audio && !self.has_video
    }

    /// Extension for the output file
    pub fn file_extension(&self) -> &str {
        match (self.container.as_str(), self.is_audio_only()) {
            ("mp4", true) => "m4a",
            ("3gpp", _) => "3gp",
            ("", _) => "bin",
            (other, _) => other,
        }
    }

    /// Short human label such as "1080p60 vp9" or "160kbps opus"
    pub fn describe(&self) -> String {
        if self.has_video {
            let mut label = match self.height {
                Some(h) => format!("{}p", h),
                None => "video".to_string(),
            };
            if let Some(fps) = self.fps.filter(|f| *f > 30) {
                label.push_str(&fps.to_string());
            }
            if let Some(codec) = &self.video_codec {
                label.push(' ');
                label.push_str(codec);
            }
            if self.has_audio {
                label.push_str(" +audio");
            }
            label
        } else {
            let mut label = match self.audio_bitrate_kbps {
                Some(kbps) => format!("{}kbps", kbps),
                None => "audio".to_string(),
            };
            if let Some(codec) = &self.audio_codec {
                label.push(' ');
                label.push_str(codec);
            }
            label
        }
    }
}

/// One subtitle track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionTrack {
    pub language_code: String,
    pub language_name: String,
    pub is_auto_generated: bool,
    pub source_url: String,
}

/// Rank of a thumbnail image
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QualityTag {
    Low,
    Medium,
    High,
    Max,
}

impl QualityTag {
    /// Tag an image by its width when the source does not name it
    pub fn from_width(width: u32) -> Self {
        match width {
            0..=120 => QualityTag::Low,
            121..=320 => QualityTag::Medium,
            321..=640 => QualityTag::High,
            _ => QualityTag::Max,
        }
    }

    /// Keys used by the hosted API thumbnail map
    pub fn from_api_key(key: &str) -> Option<Self> {
        match key {
            "default" => Some(QualityTag::Low),
            "medium" => Some(QualityTag::Medium),
            "high" | "standard" => Some(QualityTag::High),
            "maxres" => Some(QualityTag::Max),
            _ => None,
        }
    }
}

/// One image variant of the item's thumbnail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThumbnailVariant {
    pub quality: QualityTag,
    pub width: u32,
    pub height: u32,
    pub source_url: String,
}

/// An ordered playlist, as resolved once before any item is downloaded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistListing {
    pub id: String,
    pub title: String,
    pub entries: Vec<PlaylistEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub id: String,
    pub title: Option<String>,
}
