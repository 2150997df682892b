//! framepump, a stateful multi-threaded video playback engine
//!
//! The engine demultiplexes a compressed video stream, drives an
//! asynchronous decoder session, paces decoded frames against wall-clock
//! time and exposes an asynchronous request protocol
//! (prepare/play/seek/pause/stop) to a consumer. All control calls are
//! non-blocking message sends into a single-slot mailbox consumed by a
//! dedicated control thread; decoded frames land in an opaque render
//! target supplied at construction.

pub mod decoder;
pub mod demux;
pub mod player;
pub mod render;
pub mod utils;

pub use demux::{Rotation, TrackInfo};
pub use player::{
    FrameHook, MediaBackend, PassthroughHook, PlaybackCallback, PlaybackSession,
    PlaybackSessionBuilder, PlaybackState, Request,
};
pub use render::{ChannelRenderTarget, FrameData, NullRenderTarget, RenderTarget, VideoFrame};
pub use utils::config::{Config, PlaybackConfig};
pub use utils::error::{PlayerError, Result};
