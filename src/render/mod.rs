//! Render target abstraction for framepump
//!
//! The playback engine never renders anything itself; decoded frames are
//! written into an opaque sink supplied at construction. The engine never
//! inspects the sink's contents or behavior beyond the `write` call.

mod frame;
mod sink;

pub use frame::{FrameData, VideoFrame};
pub use sink::{ChannelRenderTarget, NullRenderTarget};

use crate::utils::error::Result;

/// Opaque sink for decoded frames.
///
/// Implementations may upload to a GPU surface, forward over a channel, or
/// discard frames entirely. Called from the drainer thread.
pub trait RenderTarget: Send + Sync {
    /// Consume one decoded frame
    fn write(&self, frame: VideoFrame) -> Result<()>;
}
