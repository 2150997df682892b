//! Demultiplexer module for framepump
//!
//! Parses a media container and yields compressed access units with
//! presentation timestamps, plus seeking to the nearest access point at or
//! before a target time. The concrete implementation sits on ffmpeg-next;
//! the trait exists so the playback engine can be driven by scripted media
//! in tests.

pub mod ffmpeg;
mod metadata;

pub use ffmpeg::FfmpegDemuxer;
pub use metadata::{FfmpegMetadataReader, MetadataReader, Rotation, TrackInfo};

use crate::utils::error::Result;

/// Format of one track inside a container
#[derive(Debug, Clone)]
pub struct TrackFormat {
    /// Track index inside the container
    pub index: usize,

    /// Content-type string, e.g. "video/h264" or "audio/aac"
    pub content_type: String,

    /// Frame width in pixels, 0 if unknown
    pub width: u32,

    /// Frame height in pixels, 0 if unknown
    pub height: u32,

    /// Track duration in microseconds, 0 if unknown
    pub duration_us: i64,
}

/// Demultiplexer for one open container.
///
/// Mirrors the shape of a pull-based extractor: after `select_track`, the
/// demuxer points at one access unit at a time; `sample_time` and
/// `read_sample` observe it, `advance` moves past it.
pub trait Demuxer: Send {
    /// Number of tracks in the container
    fn track_count(&self) -> usize;

    /// Format of the track at `index`
    fn track_format(&self, index: usize) -> Result<TrackFormat>;

    /// Restrict sample iteration to the given track
    fn select_track(&mut self, index: usize) -> Result<()>;

    /// Presentation timestamp of the current access unit in microseconds,
    /// or None when the source is exhausted
    fn sample_time(&mut self) -> Option<i64>;

    /// Copy the current access unit into `buf`, returning its size
    fn read_sample(&mut self, buf: &mut Vec<u8>) -> Result<usize>;

    /// Move to the next access unit. Returns false when no more data is
    /// available.
    fn advance(&mut self) -> bool;

    /// Reposition to the nearest random-access point at or before
    /// `time_us`
    fn seek_to(&mut self, time_us: i64) -> Result<()>;
}

/// Search the first track whose content-type starts with `prefix`.
///
/// Linear scan in index order, like the original extractor contract.
/// Tracks whose format cannot be read are skipped.
pub fn select_track_by_type(demuxer: &dyn Demuxer, prefix: &str) -> Option<usize> {
    for i in 0..demuxer.track_count() {
        if let Ok(format) = demuxer.track_format(i) {
            if format.content_type.starts_with(prefix) {
                log::debug!("selected track {} ({})", i, format.content_type);
                return Some(i);
            }
        }
    }
    None
}
