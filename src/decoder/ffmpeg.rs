//! FFmpeg-based decoder session
//!
//! Drives an ffmpeg video decoder through the buffer-exchange protocol of
//! `DecoderSession`. Input packets are tagged with microsecond timestamps
//! and ffmpeg propagates them onto the decoded frames, so both sides of the
//! session live in the same timestamp domain. EAGAIN maps to would-block,
//! EOF to a terminal output buffer, and a change in decoded dimensions is
//! reported as a format change before the affected frame is delivered.

use crate::decoder::{DecoderSession, DrainEvent, OutputBuffer};
use crate::render::{FrameData, RenderTarget, VideoFrame};
use crate::utils::error::{PlayerError, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::format;
use std::path::Path;
use std::sync::Arc;

/// Decoder session over one video track
pub struct FfmpegDecoderSession {
    decoder: ffmpeg::codec::decoder::Video,

    /// Render target the decoded frames are written into
    target: Arc<dyn RenderTarget>,

    /// Pixel format converter, created lazily and reused
    converter: Option<ffmpeg::software::scaling::Context>,

    /// Output dimensions last announced via FormatChanged
    out_width: u32,
    out_height: u32,

    /// Frame held back while a format change is being announced
    stashed: Option<ffmpeg::frame::Video>,

    /// Timestamp of the most recent decoded frame
    last_pts: i64,
}

impl FfmpegDecoderSession {
    /// Create a decoder for the given track of `source`.
    ///
    /// The codec parameters are copied out of a fresh probe of the source,
    /// so the session shares no state with the demultiplexer.
    pub fn create(
        source: &Path,
        track_index: usize,
        target: Arc<dyn RenderTarget>,
    ) -> Result<Self> {
        crate::demux::ffmpeg::init_ffmpeg();

        let input = format::input(&source)?;
        let stream = input.stream(track_index).ok_or_else(|| {
            PlayerError::codec_error(format!("no track {} in source", track_index))
        })?;

        let mut context =
            ffmpeg::codec::context::Context::from_parameters(stream.parameters())?;
        context.set_threading(ffmpeg::codec::threading::Config {
            kind: ffmpeg::codec::threading::Type::Frame,
            count: 0, // Auto-detect
        });

        let decoder = context.decoder().video()?;

        Ok(Self {
            decoder,
            target,
            converter: None,
            out_width: 0,
            out_height: 0,
            stashed: None,
            last_pts: 0,
        })
    }

    /// Convert an ffmpeg frame to our VideoFrame format
    fn convert_frame(&mut self, frame: &ffmpeg::frame::Video) -> Result<VideoFrame> {
        let pts = frame.timestamp().or_else(|| frame.pts()).unwrap_or(0);

        let target_format = ffmpeg::format::Pixel::YUV420P;
        let converted = if frame.format() != target_format {
            let needs_new = match &self.converter {
                Some(c) => {
                    c.input().width != frame.width()
                        || c.input().height != frame.height()
                        || c.input().format != frame.format()
                }
                None => true,
            };
            if needs_new {
                self.converter = Some(ffmpeg::software::scaling::Context::get(
                    frame.format(),
                    frame.width(),
                    frame.height(),
                    target_format,
                    frame.width(),
                    frame.height(),
                    ffmpeg::software::scaling::Flags::BILINEAR,
                )?);
            }
            let mut out = ffmpeg::frame::Video::empty();
            self.converter
                .as_mut()
                .ok_or_else(|| PlayerError::codec_error("no frame converter"))?
                .run(frame, &mut out)?;
            out
        } else {
            frame.clone()
        };

        let data = FrameData::Yuv420 {
            y_plane: converted.data(0).to_vec(),
            u_plane: converted.data(1).to_vec(),
            v_plane: converted.data(2).to_vec(),
            y_stride: converted.stride(0),
            uv_stride: converted.stride(1),
        };

        Ok(VideoFrame {
            data,
            pts,
            width: converted.width(),
            height: converted.height(),
        })
    }

    fn output_event(&mut self, decoded: ffmpeg::frame::Video) -> Result<DrainEvent> {
        // A dimension change is announced before the frame that carries it;
        // the frame itself is delivered on the next poll.
        if decoded.width() != self.out_width || decoded.height() != self.out_height {
            self.out_width = decoded.width();
            self.out_height = decoded.height();
            self.stashed = Some(decoded);
            return Ok(DrainEvent::FormatChanged {
                width: self.out_width,
                height: self.out_height,
            });
        }

        let frame = self.convert_frame(&decoded)?;
        self.last_pts = frame.pts;
        Ok(DrainEvent::Frame(OutputBuffer {
            pts_us: frame.pts,
            frame: Some(frame),
            eos: false,
        }))
    }
}

impl DecoderSession for FfmpegDecoderSession {
    fn queue_input(&mut self, data: &[u8], pts_us: i64) -> Result<bool> {
        let mut packet = ffmpeg::Packet::copy(data);
        packet.set_pts(Some(pts_us));
        match self.decoder.send_packet(&packet) {
            Ok(()) => Ok(true),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn queue_end_of_stream(&mut self) -> Result<bool> {
        match self.decoder.send_eof() {
            Ok(()) => Ok(true),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn drain(&mut self) -> Result<DrainEvent> {
        if let Some(stashed) = self.stashed.take() {
            let frame = self.convert_frame(&stashed)?;
            self.last_pts = frame.pts;
            return Ok(DrainEvent::Frame(OutputBuffer {
                pts_us: frame.pts,
                frame: Some(frame),
                eos: false,
            }));
        }

        let mut decoded = ffmpeg::frame::Video::empty();
        match self.decoder.receive_frame(&mut decoded) {
            Ok(()) => self.output_event(decoded),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                Ok(DrainEvent::WouldBlock)
            }
            Err(ffmpeg::Error::Eof) => Ok(DrainEvent::Frame(OutputBuffer {
                frame: None,
                pts_us: self.last_pts,
                eos: true,
            })),
            Err(e) => Err(e.into()),
        }
    }

    fn release(&mut self, buffer: OutputBuffer, render: bool) -> Result<()> {
        if render {
            if let Some(frame) = buffer.frame {
                self.target.write(frame)?;
            }
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.decoder.flush();
        Ok(())
    }
}
