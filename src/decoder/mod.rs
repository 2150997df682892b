//! Decoder session module for framepump
//!
//! Wraps an asynchronous decoder behind a buffer-exchange protocol:
//! compressed input buffers go in tagged with a presentation timestamp,
//! decoded output buffers come out tagged in the same timestamp domain,
//! interleaved with transient status signals. The transient signals are
//! values, never errors; only genuine decode failures surface as
//! `PlayerError::Codec`.

pub mod ffmpeg;

pub use ffmpeg::FfmpegDecoderSession;

use crate::render::VideoFrame;
use crate::utils::error::Result;

/// One poll result from the decoder's output side
#[derive(Debug)]
pub enum DrainEvent {
    /// No output available right now; try again next iteration
    WouldBlock,

    /// Output buffer references changed; nothing was produced
    BuffersChanged,

    /// Output format changed; nothing was produced
    FormatChanged { width: u32, height: u32 },

    /// A decoded output buffer
    Frame(OutputBuffer),
}

/// A decoded output buffer with its timestamp and end-of-stream flag
#[derive(Debug)]
pub struct OutputBuffer {
    /// Decoded payload; None for an empty end-of-stream buffer
    pub frame: Option<VideoFrame>,

    /// Presentation timestamp in microseconds
    pub pts_us: i64,

    /// True when this is the last output of the stream
    pub eos: bool,
}

/// Stateful handle to an asynchronous decode engine.
///
/// Input submission is non-blocking: a `false` return means the decoder
/// cannot accept the buffer right now and the caller should retry. The
/// output side is polled via `drain`; a produced buffer must be handed back
/// through `release`, which forwards the payload to the render target when
/// `render` is true.
pub trait DecoderSession: Send {
    /// Submit one compressed access unit tagged with its presentation
    /// timestamp. Returns false on would-block.
    fn queue_input(&mut self, data: &[u8], pts_us: i64) -> Result<bool>;

    /// Submit the end-of-stream input marker. Returns false on would-block.
    fn queue_end_of_stream(&mut self) -> Result<bool>;

    /// Poll the output side once
    fn drain(&mut self) -> Result<DrainEvent>;

    /// Return an output buffer, rendering its payload to the target when
    /// `render` is true
    fn release(&mut self, buffer: OutputBuffer, render: bool) -> Result<()>;

    /// Stop the decoder, discarding any in-flight buffers
    fn stop(&mut self) -> Result<()>;
}
