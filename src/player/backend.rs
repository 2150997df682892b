//! Media backend factory seam
//!
//! The control thread never constructs concrete media components itself; it
//! asks a backend for them. The production backend sits on ffmpeg, test
//! suites substitute scripted implementations.

use crate::decoder::{DecoderSession, FfmpegDecoderSession};
use crate::demux::{Demuxer, FfmpegDemuxer, FfmpegMetadataReader, MetadataReader};
use crate::render::RenderTarget;
use crate::utils::error::Result;
use std::path::Path;
use std::sync::Arc;

/// Factory for the three leaf components of a playback run
pub trait MediaBackend: Send + Sync {
    /// Open a container-level metadata reader for `source`
    fn open_metadata(&self, source: &Path) -> Result<Box<dyn MetadataReader>>;

    /// Open a demultiplexer over `source`
    fn open_demuxer(&self, source: &Path) -> Result<Box<dyn Demuxer>>;

    /// Create a decoder session for the given track of `source`, writing
    /// decoded frames into `target`
    fn open_decoder(
        &self,
        source: &Path,
        track_index: usize,
        target: Arc<dyn RenderTarget>,
    ) -> Result<Box<dyn DecoderSession>>;
}

/// Production backend on ffmpeg
#[derive(Debug, Default)]
pub struct FfmpegBackend;

impl MediaBackend for FfmpegBackend {
    fn open_metadata(&self, source: &Path) -> Result<Box<dyn MetadataReader>> {
        Ok(Box::new(FfmpegMetadataReader::open(source)?))
    }

    fn open_demuxer(&self, source: &Path) -> Result<Box<dyn Demuxer>> {
        Ok(Box::new(FfmpegDemuxer::open(source)?))
    }

    fn open_decoder(
        &self,
        source: &Path,
        track_index: usize,
        target: Arc<dyn RenderTarget>,
    ) -> Result<Box<dyn DecoderSession>> {
        Ok(Box::new(FfmpegDecoderSession::create(
            source,
            track_index,
            target,
        )?))
    }
}
