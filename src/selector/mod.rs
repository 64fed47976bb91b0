//! Format selection
//!
//! Maps a resolved catalog plus a quality constraint to the stream (or the
//! video/audio pair) that should be downloaded. Selection is pure and fully
//! deterministic: every tie is broken, down to the format id.

use crate::extractor::models::{StreamCatalog, StreamDescriptor};
use crate::utils::error::{Result, TubeloaderError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Requested quality
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QualityConstraint {
    #[default]
    Best,
    Worst,
    /// Target height in pixels, e.g. `720` for "720p"
    Resolution(u32),
    /// A specific format id taken verbatim from the catalog
    FormatId(String),
}

impl FromStr for QualityConstraint {
    type Err = TubeloaderError;

    /// `best`, `worst`, `<height>p`; anything else is a format id
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TubeloaderError::Configuration(
                "quality must not be empty".to_string(),
            ));
        }

        match s.to_ascii_lowercase().as_str() {
            "best" => return Ok(QualityConstraint::Best),
            "worst" => return Ok(QualityConstraint::Worst),
            _ => {}
        }

        if let Some(height) = s.strip_suffix(['p', 'P']) {
            return match height.parse::<u32>() {
                Ok(h) if h > 0 => Ok(QualityConstraint::Resolution(h)),
                _ => Err(TubeloaderError::Configuration(format!(
                    "invalid resolution '{}'",
                    s
                ))),
            };
        }

        Ok(QualityConstraint::FormatId(s.to_string()))
    }
}

impl fmt::Display for QualityConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityConstraint::Best => f.write_str("best"),
            QualityConstraint::Worst => f.write_str("worst"),
            QualityConstraint::Resolution(h) => write!(f, "{}p", h),
            QualityConstraint::FormatId(id) => write!(f, "format {}", id),
        }
    }
}

/// Which tracks the caller wants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackFilter {
    /// Combined stream, or a video-only + audio-only pair
    #[default]
    Any,
    AudioOnly,
    VideoOnly,
}

/// Video codec families known to the ranking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    Av1,
    Vp9,
    H264,
    Hevc,
    Vp8,
}

impl VideoCodec {
    /// Classify a codecs-parameter entry such as `avc1.640028`
    pub fn from_codec_string(codec: &str) -> Option<Self> {
        let codec = codec.to_ascii_lowercase();
        match codec.split('.').next().unwrap_or_default() {
            "av01" => Some(VideoCodec::Av1),
            "vp9" | "vp09" => Some(VideoCodec::Vp9),
            "avc1" | "avc3" => Some(VideoCodec::H264),
            "hev1" | "hvc1" => Some(VideoCodec::Hevc),
            "vp8" | "vp08" => Some(VideoCodec::Vp8),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Opus,
    Aac,
    Vorbis,
}

impl AudioCodec {
    pub fn from_codec_string(codec: &str) -> Option<Self> {
        let codec = codec.to_ascii_lowercase();
        match codec.split('.').next().unwrap_or_default() {
            "opus" => Some(AudioCodec::Opus),
            "mp4a" => Some(AudioCodec::Aac),
            "vorbis" => Some(AudioCodec::Vorbis),
            _ => None,
        }
    }
}

/// Codec ranking used to break ties, most preferred first.
///
/// Codecs missing from a list rank below every listed one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecPreference {
    pub video: Vec<VideoCodec>,
    pub audio: Vec<AudioCodec>,
}

impl Default for CodecPreference {
    fn default() -> Self {
        Self {
            video: vec![VideoCodec::Av1, VideoCodec::Vp9, VideoCodec::H264],
            audio: vec![AudioCodec::Opus, AudioCodec::Aac, AudioCodec::Vorbis],
        }
    }
}

impl CodecPreference {
    /// Lower is better
    fn video_rank(&self, stream: &StreamDescriptor) -> usize {
        stream
            .video_codec
            .as_deref()
            .and_then(VideoCodec::from_codec_string)
            .and_then(|c| self.video.iter().position(|p| *p == c))
            .unwrap_or(self.video.len())
    }

    fn audio_rank(&self, stream: &StreamDescriptor) -> usize {
        stream
            .audio_codec
            .as_deref()
            .and_then(AudioCodec::from_codec_string)
            .and_then(|c| self.audio.iter().position(|p| *p == c))
            .unwrap_or(self.audio.len())
    }
}

/// What to download for one item
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// One stream: combined, video-only or audio-only
    Single(StreamDescriptor),
    /// Separate video-only and audio-only streams
    Pair {
        video: StreamDescriptor,
        audio: StreamDescriptor,
    },
}

impl Selection {
    pub fn streams(&self) -> Vec<&StreamDescriptor> {
        match self {
            Selection::Single(stream) => vec![stream],
            Selection::Pair { video, audio } => vec![video, audio],
        }
    }

    pub fn is_pair(&self) -> bool {
        matches!(self, Selection::Pair { .. })
    }

    pub fn format_ids(&self) -> String {
        self.streams()
            .iter()
            .map(|s| s.format_id.as_str())
            .collect::<Vec<_>>()
            .join("+")
    }
}

/// Stream ranking and selection
#[derive(Debug, Clone, Default)]
pub struct FormatSelector {
    preference: CodecPreference,
}

impl FormatSelector {
    pub fn new(preference: CodecPreference) -> Self {
        Self { preference }
    }

    pub fn preference(&self) -> &CodecPreference {
        &self.preference
    }

    /// Pick the stream(s) for `quality` under `filter`
    pub fn select(
        &self,
        catalog: &StreamCatalog,
        quality: &QualityConstraint,
        filter: TrackFilter,
    ) -> Result<Selection> {
        if let QualityConstraint::FormatId(id) = quality {
            return catalog
                .stream(id)
                .cloned()
                .map(Selection::Single)
                .ok_or_else(|| no_match(catalog, quality, "format id not in catalog"));
        }

        let streams = &catalog.streams;
        let video_only: Vec<&StreamDescriptor> = streams.iter().filter(|s| s.is_video_only()).collect();
        let audio_only: Vec<&StreamDescriptor> = streams.iter().filter(|s| s.is_audio_only()).collect();
        let combined: Vec<&StreamDescriptor> = streams.iter().filter(|s| s.is_combined()).collect();

        let picked = match filter {
            TrackFilter::AudioOnly => self.pick_audio(&audio_only, quality).map(Picked::Single),
            TrackFilter::VideoOnly => self.pick_video(&video_only, quality).map(Picked::Single),
            TrackFilter::Any => self.pick_any(&combined, &video_only, &audio_only, quality),
        };

        picked.map(Picked::into_selection).ok_or_else(|| {
            no_match(catalog, quality, match filter {
                TrackFilter::AudioOnly => "no audio-only stream",
                TrackFilter::VideoOnly => "no video-only stream",
                TrackFilter::Any => "no combined stream and no video/audio pair",
            })
        })
    }

    fn pick_any<'a>(
        &self,
        combined: &[&'a StreamDescriptor],
        video_only: &[&'a StreamDescriptor],
        audio_only: &[&'a StreamDescriptor],
        quality: &QualityConstraint,
    ) -> Option<Picked<'a>> {
        let pair = self
            .pick_video(video_only, quality)
            .zip(self.pick_audio(audio_only, quality));

        let best_combined = match quality {
            QualityConstraint::Resolution(h) => {
                // a combined stream wins only when it sits exactly at the target height
                let target = target_height(*h, combined.iter().chain(video_only).copied());
                let at_target: Vec<&StreamDescriptor> = match target {
                    Some(t) => combined.iter().copied().filter(|s| height_of(s) == t).collect(),
                    None => Vec::new(),
                };
                match self.pick_video(&at_target, &QualityConstraint::Best) {
                    Some(stream) => return Some(Picked::Single(stream)),
                    None => self.pick_video(combined, quality),
                }
            }
            _ => self.pick_video(combined, quality),
        };

        match (best_combined, pair) {
            (Some(c), Some((video, _))) if *quality == QualityConstraint::Best => {
                if height_of(c) >= height_of(video) {
                    Some(Picked::Single(c))
                } else {
                    pair.map(|(video, audio)| Picked::Pair(video, audio))
                }
            }
            (Some(c), _) if *quality == QualityConstraint::Worst => Some(Picked::Single(c)),
            (_, Some((video, audio))) => Some(Picked::Pair(video, audio)),
            (Some(c), None) => Some(Picked::Single(c)),
            (None, None) => None,
        }
    }

    fn pick_video<'a>(
        &self,
        candidates: &[&'a StreamDescriptor],
        quality: &QualityConstraint,
    ) -> Option<&'a StreamDescriptor> {
        match quality {
            QualityConstraint::Worst => candidates
                .iter()
                .copied()
                .min_by(|a, b| self.compare_video(a, b, true)),
            QualityConstraint::Resolution(h) => {
                let target = target_height(*h, candidates.iter().copied())?;
                candidates
                    .iter()
                    .copied()
                    .filter(|s| height_of(s) == target)
                    .min_by(|a, b| self.compare_video(a, b, false))
            }
            _ => candidates
                .iter()
                .copied()
                .min_by(|a, b| self.compare_video(a, b, false)),
        }
    }

    fn pick_audio<'a>(
        &self,
        candidates: &[&'a StreamDescriptor],
        quality: &QualityConstraint,
    ) -> Option<&'a StreamDescriptor> {
        let lowest_first = *quality == QualityConstraint::Worst;
        candidates
            .iter()
            .copied()
            .min_by(|a, b| self.compare_audio(a, b, lowest_first))
    }

    /// `Less` means `a` is preferred
    fn compare_video(&self, a: &StreamDescriptor, b: &StreamDescriptor, lowest_first: bool) -> Ordering {
        let by_height = if lowest_first {
            height_of(a).cmp(&height_of(b))
        } else {
            height_of(b).cmp(&height_of(a))
        };

        by_height
            .then_with(|| b.fps.unwrap_or(0).cmp(&a.fps.unwrap_or(0)))
            .then_with(|| self.preference.video_rank(a).cmp(&self.preference.video_rank(b)))
            .then_with(|| b.bitrate_kbps.unwrap_or(0).cmp(&a.bitrate_kbps.unwrap_or(0)))
            .then_with(|| a.format_id.cmp(&b.format_id))
    }

    fn compare_audio(&self, a: &StreamDescriptor, b: &StreamDescriptor, lowest_first: bool) -> Ordering {
        let by_bitrate = if lowest_first {
            audio_bitrate_of(a).cmp(&audio_bitrate_of(b))
        } else {
            audio_bitrate_of(b).cmp(&audio_bitrate_of(a))
        };

        by_bitrate
            .then_with(|| self.preference.audio_rank(a).cmp(&self.preference.audio_rank(b)))
            .then_with(|| a.format_id.cmp(&b.format_id))
    }
}

/// Borrowed selection, cloned once the choice is final
enum Picked<'a> {
    Single(&'a StreamDescriptor),
    Pair(&'a StreamDescriptor, &'a StreamDescriptor),
}

impl Picked<'_> {
    fn into_selection(self) -> Selection {
        match self {
            Picked::Single(stream) => Selection::Single(stream.clone()),
            Picked::Pair(video, audio) => Selection::Pair {
                video: video.clone(),
                audio: audio.clone(),
            },
        }
    }
}

fn height_of(stream: &StreamDescriptor) -> u32 {
    stream.height.unwrap_or(0)
}

fn audio_bitrate_of(stream: &StreamDescriptor) -> u32 {
    stream.audio_bitrate_kbps.or(stream.bitrate_kbps).unwrap_or(0)
}

/// Exact height if offered, else the highest below, else the lowest above
fn target_height<'a>(requested: u32, streams: impl Iterator<Item = &'a StreamDescriptor>) -> Option<u32> {
    let heights: Vec<u32> = streams.map(height_of).collect();
    if heights.contains(&requested) {
        return Some(requested);
    }
    heights
        .iter()
        .copied()
        .filter(|h| *h < requested)
        .max()
        .or_else(|| heights.iter().copied().filter(|h| *h > requested).min())
}

fn no_match(catalog: &StreamCatalog, quality: &QualityConstraint, reason: &str) -> TubeloaderError {
    TubeloaderError::NoMatchingFormat(format!(
        "{} for {} ({}; {} streams available)",
        quality,
        catalog.id,
        reason,
        catalog.streams.len()
    ))
}
