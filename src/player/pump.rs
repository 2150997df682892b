//! Feeder and drainer threads
//!
//! Both run only while a PLAYING run is live. The feeder pumps access
//! units from the demultiplexer into the decoder session until the source
//! is exhausted, then submits the end-of-stream marker. The drainer pulls
//! decoded output, paces it against the wall clock and forwards it to the
//! render target. Each side signals its completion through the shared
//! done-flags; a fatal codec error marks both so the control thread tears
//! the run down.

use crate::decoder::{DecoderSession, DrainEvent};
use crate::demux::Demuxer;
use crate::player::session::Shared;
use crate::player::{FrameHook, PlaybackCallback, Request};
use crate::utils::error::Result;
use log::{debug, error, info};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub(crate) fn spawn_feeder(
    shared: Arc<Shared>,
    demuxer: Arc<Mutex<Box<dyn Demuxer>>>,
    decoder: Arc<Mutex<Box<dyn DecoderSession>>>,
    poll_interval: Duration,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        debug!("feeder started");
        if let Err(e) = feed_loop(&shared, &demuxer, &decoder, poll_interval) {
            error!("feeder failed: {}", e);
            abort_run(&shared);
        }
        debug!("feeder finished");
    })
}

pub(crate) fn spawn_drainer(
    shared: Arc<Shared>,
    decoder: Arc<Mutex<Box<dyn DecoderSession>>>,
    callback: Arc<dyn PlaybackCallback>,
    hook: Arc<dyn FrameHook>,
    poll_interval: Duration,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        debug!("drainer started");
        if let Err(e) = drain_loop(&shared, &decoder, &callback, &hook, poll_interval) {
            error!("drainer failed: {}", e);
            abort_run(&shared);
        }
        debug!("drainer finished");
    })
}

/// Mark both pumps done so the control thread's PLAYING idle branch tears
/// the run down through the stop path
fn abort_run(shared: &Shared) {
    {
        let mut st = shared.lock();
        st.input_done = true;
        st.output_done = true;
    }
    shared.notify_all();
}

/// Interruptible short wait used between would-block retries
fn wait_poll(shared: &Shared, interval: Duration) {
    let mut st = shared.lock();
    if st.pumping {
        let _ = shared.cond.wait_for(&mut st, interval);
    }
}

fn feed_loop(
    shared: &Shared,
    demuxer: &Mutex<Box<dyn Demuxer>>,
    decoder: &Mutex<Box<dyn DecoderSession>>,
    poll_interval: Duration,
) -> Result<()> {
    let mut buf = Vec::new();
    loop {
        {
            let st = shared.lock();
            if !st.pumping || st.input_done {
                return Ok(());
            }
        }

        let raw = demuxer.lock().sample_time();
        match raw {
            Some(raw_pts) => {
                // Timestamps handed to the decoder never decrease within a
                // run; a backward jump is clamped to the watermark.
                let pts = shared.lock().timing.clamp(raw_pts);
                let size = demuxer.lock().read_sample(&mut buf)?;
                let accepted = if size > 0 {
                    decoder.lock().queue_input(&buf[..size], pts)?
                } else {
                    true
                };
                if accepted {
                    demuxer.lock().advance();
                } else {
                    // Input slot full; retry the same access unit.
                    wait_poll(shared, poll_interval);
                }
            }
            None => {
                info!("input reached end of stream");
                loop {
                    {
                        let st = shared.lock();
                        if !st.pumping {
                            return Ok(());
                        }
                    }
                    if decoder.lock().queue_end_of_stream()? {
                        break;
                    }
                    wait_poll(shared, poll_interval);
                }
                {
                    let mut st = shared.lock();
                    st.input_done = true;
                }
                shared.notify_all();
                return Ok(());
            }
        }
    }
}

fn drain_loop(
    shared: &Shared,
    decoder: &Mutex<Box<dyn DecoderSession>>,
    callback: &Arc<dyn PlaybackCallback>,
    hook: &Arc<dyn FrameHook>,
    poll_interval: Duration,
) -> Result<()> {
    loop {
        {
            let st = shared.lock();
            if !st.pumping || st.output_done {
                return Ok(());
            }
        }

        let event = decoder.lock().drain()?;
        match event {
            DrainEvent::WouldBlock => wait_poll(shared, poll_interval),
            DrainEvent::BuffersChanged => {
                debug!("output buffers changed");
            }
            DrainEvent::FormatChanged { width, height } => {
                debug!("output format changed: {}x{}", width, height);
                let mut st = shared.lock();
                st.info.width = width;
                st.info.height = height;
            }
            DrainEvent::Frame(buffer) => {
                let pts = buffer.pts_us;
                let eos = buffer.eos;
                let mut render = false;
                if buffer.frame.is_some() {
                    render = !hook.write_video(&buffer);
                    if render && !callback.on_frame_available(pts) {
                        pace(shared, pts);
                    }
                }
                decoder.lock().release(buffer, render)?;
                if eos {
                    info!("output reached end of stream");
                    {
                        let mut st = shared.lock();
                        st.output_done = true;
                    }
                    shared.notify_all();
                }
            }
        }
    }
}

/// Presentation pacing.
///
/// The first frame of a run anchors the reference clock and renders
/// immediately; later frames sleep until reference + timestamp. A late
/// frame renders at once, so playback falls behind real time rather than
/// skipping frames. The sleep rides the shared condvar so a stop or quit
/// never waits out a pacing delay.
fn pace(shared: &Shared, pts_us: i64) {
    let mut st = shared.lock();
    let deadline = match st.timing.deadline_for(pts_us) {
        Some(deadline) => deadline,
        None => return,
    };
    while st.pumping
        && !matches!(st.request, Request::Stop | Request::Quit)
        && Instant::now() < deadline
    {
        let _ = shared.cond.wait_until(&mut st, deadline);
    }
}
