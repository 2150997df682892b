//! Container-level metadata probing
//!
//! Reads duration, dimensions, rotation and bitrate from a source
//! independently of the demultiplexer, so the accessors can be populated
//! before the track itself is opened. Every field defaults to zero when the
//! container does not supply it; a sparse container is never an error.

use crate::utils::error::{IntoPlayerError, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{format, media};
use std::path::Path;

/// Display rotation of the video track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Rotation in degrees: 0, 90, 180 or 270
    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Normalize an arbitrary degree value to the nearest quarter turn
    pub fn from_degrees(degrees: i32) -> Self {
        match degrees.rem_euclid(360) {
            90 => Rotation::Deg90,
            180 => Rotation::Deg180,
            270 => Rotation::Deg270,
            _ => Rotation::Deg0,
        }
    }
}

/// Properties of the playable track, populated at prepare time.
///
/// Only width, height and duration are guaranteed to be refreshed from the
/// selected track's format; the remaining fields come from the container
/// probe and stay zero when unknown.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackInfo {
    /// Frame width in pixels, 0 until known
    pub width: u32,

    /// Frame height in pixels, 0 until known
    pub height: u32,

    /// Container bitrate in bits per second
    pub bitrate: u32,

    /// Nominal frame rate in frames per second, informational only
    pub frame_rate: f32,

    /// Display rotation
    pub rotation: Rotation,

    /// Duration in microseconds
    pub duration_us: i64,
}

/// Container-level metadata source, held open for the session's lifetime
/// and released during teardown
pub trait MetadataReader: Send {
    /// Extract whatever the container can supply; missing fields are zero
    fn probe(&mut self) -> TrackInfo;
}

/// Metadata reader backed by an independent ffmpeg open of the source
pub struct FfmpegMetadataReader {
    input: format::context::Input,
}

impl FfmpegMetadataReader {
    pub fn open(path: &Path) -> Result<Self> {
        super::ffmpeg::init_ffmpeg();
        let input = format::input(&path).source_err("Unable to probe source")?;
        Ok(Self { input })
    }
}

impl MetadataReader for FfmpegMetadataReader {
    fn probe(&mut self) -> TrackInfo {
        let mut info = TrackInfo::default();

        // Container duration and bitrate arrive in AV_TIME_BASE (microsecond)
        // units; negative values mean "unknown".
        let duration = self.input.duration();
        if duration > 0 {
            info.duration_us = duration;
        }
        let bit_rate = self.input.bit_rate();
        if bit_rate > 0 {
            info.bitrate = bit_rate as u32;
        }

        if let Some(stream) = self.input.streams().best(media::Type::Video) {
            let rate = stream.avg_frame_rate();
            if rate.denominator() != 0 {
                info.frame_rate = rate.numerator() as f32 / rate.denominator() as f32;
            }

            if let Some(rotate) = stream.metadata().get("rotate") {
                if let Ok(degrees) = rotate.parse::<i32>() {
                    info.rotation = Rotation::from_degrees(degrees);
                }
            }

            if let Ok(context) =
                ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            {
                if let Ok(video) = context.decoder().video() {
                    info.width = video.width();
                    info.height = video.height();
                }
            }
        }

        log::debug!(
            "probe: {}x{} duration={}us bps={} framerate={} rotation={}",
            info.width,
            info.height,
            info.duration_us,
            info.bitrate,
            info.frame_rate,
            info.rotation.degrees()
        );
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_from_degrees() {
        assert_eq!(Rotation::from_degrees(0), Rotation::Deg0);
        assert_eq!(Rotation::from_degrees(90), Rotation::Deg90);
        assert_eq!(Rotation::from_degrees(270), Rotation::Deg270);
        assert_eq!(Rotation::from_degrees(-90), Rotation::Deg270);
        assert_eq!(Rotation::from_degrees(450), Rotation::Deg90);
        // Non-quarter values collapse to the identity
        assert_eq!(Rotation::from_degrees(45), Rotation::Deg0);
    }

    #[test]
    fn test_track_info_defaults_to_zero() {
        let info = TrackInfo::default();
        assert_eq!(info.width, 0);
        assert_eq!(info.height, 0);
        assert_eq!(info.bitrate, 0);
        assert_eq!(info.duration_us, 0);
        assert_eq!(info.rotation, Rotation::Deg0);
    }

    #[test]
    fn test_open_missing_source_fails() {
        let err = FfmpegMetadataReader::open(Path::new("/nonexistent/movie.mp4"));
        assert!(err.is_err());
    }
}
