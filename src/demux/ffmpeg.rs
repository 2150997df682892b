//! FFmpeg-based demultiplexer
//!
//! Pulls compressed packets from an ffmpeg format context one at a time and
//! exposes them through the `Demuxer` trait with timestamps normalized to
//! microseconds.

use crate::demux::{Demuxer, TrackFormat};
use crate::utils::error::{IntoPlayerError, PlayerError, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{format, media};
use once_cell::sync::Lazy;
use std::path::Path;

static FFMPEG_INIT: Lazy<()> = Lazy::new(|| {
    ffmpeg::init().unwrap();
    ffmpeg::log::set_level(ffmpeg::log::Level::Warning);
});

/// Initialize the FFmpeg library, once per process
pub(crate) fn init_ffmpeg() {
    Lazy::force(&FFMPEG_INIT);
}

/// Demultiplexer backed by an ffmpeg input context
pub struct FfmpegDemuxer {
    input: format::context::Input,

    /// Track restriction set by select_track
    selected: Option<usize>,

    /// The access unit currently pointed at, with its track index
    current: Option<(usize, ffmpeg::Packet)>,

    /// True once the packet iterator has reported end of file
    exhausted: bool,
}

impl FfmpegDemuxer {
    pub fn open(path: &Path) -> Result<Self> {
        init_ffmpeg();
        let input = format::input(&path).source_err("Unable to open source")?;
        Ok(Self {
            input,
            selected: None,
            current: None,
            exhausted: false,
        })
    }

    /// Pull packets until one belongs to the selected track
    fn ensure_current(&mut self) {
        while self.current.is_none() && !self.exhausted {
            match self.input.packets().next() {
                Some((stream, packet)) => {
                    let index = stream.index();
                    if self.selected.map_or(true, |track| index == track) {
                        self.current = Some((index, packet));
                    }
                }
                None => self.exhausted = true,
            }
        }
    }

    /// Convert a timestamp in the given stream's time base to microseconds
    fn to_micros(&self, stream_index: usize, ts: i64) -> i64 {
        let time_base = self
            .input
            .stream(stream_index)
            .map(|s| s.time_base())
            .unwrap_or_else(|| ffmpeg::Rational::new(1, 1_000_000));
        let seconds =
            ts as f64 * time_base.numerator() as f64 / time_base.denominator() as f64;
        (seconds * 1_000_000.0) as i64
    }
}

/// Content-type string for one set of codec parameters, e.g. "video/h264"
fn content_type_of(parameters: &ffmpeg::codec::Parameters) -> String {
    let medium = match parameters.medium() {
        media::Type::Video => "video",
        media::Type::Audio => "audio",
        media::Type::Subtitle => "subtitle",
        _ => "application",
    };
    let codec = ffmpeg::codec::decoder::find(parameters.id())
        .map(|c| c.name().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{}/{}", medium, codec)
}

impl Demuxer for FfmpegDemuxer {
    fn track_count(&self) -> usize {
        self.input.streams().count()
    }

    fn track_format(&self, index: usize) -> Result<TrackFormat> {
        let stream = self
            .input
            .stream(index)
            .ok_or_else(|| PlayerError::Internal(format!("no track {}", index)))?;
        let parameters = stream.parameters();

        let mut format = TrackFormat {
            index,
            content_type: content_type_of(&parameters),
            width: 0,
            height: 0,
            duration_us: 0,
        };

        let duration = stream.duration();
        if duration > 0 {
            format.duration_us = self.to_micros(index, duration);
        } else if self.input.duration() > 0 {
            format.duration_us = self.input.duration();
        }

        if parameters.medium() == media::Type::Video {
            if let Ok(context) = ffmpeg::codec::context::Context::from_parameters(parameters) {
                if let Ok(video) = context.decoder().video() {
                    format.width = video.width();
                    format.height = video.height();
                }
            }
        }

        Ok(format)
    }

    fn select_track(&mut self, index: usize) -> Result<()> {
        if self.input.stream(index).is_none() {
            return Err(PlayerError::Internal(format!("no track {}", index)));
        }
        self.selected = Some(index);
        self.current = None;
        Ok(())
    }

    fn sample_time(&mut self) -> Option<i64> {
        self.ensure_current();
        let (index, packet) = self.current.as_ref()?;
        let ts = packet.pts().or_else(|| packet.dts())?;
        Some(self.to_micros(*index, ts))
    }

    fn read_sample(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        self.ensure_current();
        match self.current.as_ref().and_then(|(_, p)| p.data()) {
            Some(data) => {
                buf.clear();
                buf.extend_from_slice(data);
                Ok(data.len())
            }
            None => Ok(0),
        }
    }

    fn advance(&mut self) -> bool {
        self.current = None;
        self.ensure_current();
        self.current.is_some()
    }

    fn seek_to(&mut self, time_us: i64) -> Result<()> {
        // AV_TIME_BASE units are microseconds; the upper bound pins the
        // result to the nearest access point at or before the target.
        self.input.seek(time_us, ..=time_us)?;
        self.current = None;
        self.exhausted = false;
        Ok(())
    }
}
