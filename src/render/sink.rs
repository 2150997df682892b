//! Built-in render targets
//!
//! `NullRenderTarget` discards frames; `ChannelRenderTarget` forwards them
//! over a crossbeam channel to whatever thread wants to consume them. The
//! headless CLI and the test suite both use the channel variant.

use crate::render::{RenderTarget, VideoFrame};
use crate::utils::error::Result;
use crossbeam_channel::Sender;

/// Render target that discards every frame
#[derive(Debug, Default)]
pub struct NullRenderTarget;

impl RenderTarget for NullRenderTarget {
    fn write(&self, _frame: VideoFrame) -> Result<()> {
        Ok(())
    }
}

/// Render target that forwards frames over a channel.
///
/// A disconnected receiver is not an error; frames are silently dropped so
/// a consumer that has gone away never kills playback.
pub struct ChannelRenderTarget {
    tx: Sender<VideoFrame>,
}

impl ChannelRenderTarget {
    pub fn new(tx: Sender<VideoFrame>) -> Self {
        Self { tx }
    }
}

impl RenderTarget for ChannelRenderTarget {
    fn write(&self, frame: VideoFrame) -> Result<()> {
        let _ = self.tx.send(frame);
        Ok(())
    }
}
