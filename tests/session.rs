//! Integration tests for the playback session
//!
//! Drives the control state machine with a scripted media backend: the
//! mock demuxer serves a fixed list of timestamped access units, the mock
//! decoder echoes every queued timestamp back as a decoded frame, and the
//! recording callback/render target capture what the engine did and when.

use crossbeam_channel::{unbounded, Receiver};
use framepump::decoder::{DecoderSession, DrainEvent, OutputBuffer};
use framepump::demux::{Demuxer, MetadataReader, TrackFormat, TrackInfo};
use framepump::{
    FrameData, MediaBackend, PlaybackCallback, PlaybackSession, PlaybackSessionBuilder,
    PlaybackState, PlayerError, RenderTarget, Result, VideoFrame,
};
use std::collections::VecDeque;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Recipe for one scripted playback run
#[derive(Clone)]
struct Script {
    /// Content types of the container's tracks, in index order
    tracks: Vec<&'static str>,

    /// Access-unit timestamps of the selected track, in microseconds
    samples: Vec<i64>,

    /// Decoder input capacity; 0 = unlimited
    capacity: usize,

    /// What the metadata probe reports
    probe: TrackInfo,

    /// width/height/duration of the video track format
    format: (u32, u32, i64),

    /// Blocks open_metadata until a message arrives
    prepare_gate: Option<Receiver<()>>,

    /// Fail decoder session creation
    fail_open_decoder: bool,

    /// Fail the first drain call
    fail_drain: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            tracks: vec!["video/h264"],
            samples: vec![0, 20_000, 40_000],
            capacity: 0,
            probe: TrackInfo {
                bitrate: 800_000,
                frame_rate: 25.0,
                ..TrackInfo::default()
            },
            format: (320, 240, 1_000_000),
            prepare_gate: None,
            fail_open_decoder: false,
            fail_drain: false,
        }
    }
}

struct MockMetadata {
    info: TrackInfo,
}

impl MetadataReader for MockMetadata {
    fn probe(&mut self) -> TrackInfo {
        self.info
    }
}

struct MockDemuxer {
    tracks: Vec<&'static str>,
    samples: Vec<i64>,
    format: (u32, u32, i64),
    pos: usize,
}

impl Demuxer for MockDemuxer {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, index: usize) -> Result<TrackFormat> {
        let content_type = self.tracks[index].to_string();
        let video = content_type.starts_with("video/");
        Ok(TrackFormat {
            index,
            content_type,
            width: if video { self.format.0 } else { 0 },
            height: if video { self.format.1 } else { 0 },
            duration_us: self.format.2,
        })
    }

    fn select_track(&mut self, _index: usize) -> Result<()> {
        Ok(())
    }

    fn sample_time(&mut self) -> Option<i64> {
        self.samples.get(self.pos).copied()
    }

    fn read_sample(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        if self.pos < self.samples.len() {
            buf.clear();
            buf.extend_from_slice(&[0u8; 16]);
            Ok(16)
        } else {
            Ok(0)
        }
    }

    fn advance(&mut self) -> bool {
        self.pos += 1;
        self.pos < self.samples.len()
    }

    fn seek_to(&mut self, time_us: i64) -> Result<()> {
        // Nearest access point at or before the target
        self.pos = self
            .samples
            .iter()
            .rposition(|&pts| pts <= time_us)
            .unwrap_or(0);
        Ok(())
    }
}

enum Pending {
    Frame(i64),
    Eos,
}

struct MockDecoder {
    target: Arc<dyn RenderTarget>,
    queued: Arc<Mutex<Vec<i64>>>,
    pending: VecDeque<Pending>,
    capacity: usize,
    last_pts: i64,
    fail_drain: bool,
}

fn test_frame(pts: i64) -> VideoFrame {
    VideoFrame {
        data: FrameData::Rgb {
            data: vec![0; 12],
            stride: 6,
        },
        pts,
        width: 2,
        height: 2,
    }
}

impl DecoderSession for MockDecoder {
    fn queue_input(&mut self, _data: &[u8], pts_us: i64) -> Result<bool> {
        if self.capacity > 0 && self.pending.len() >= self.capacity {
            return Ok(false);
        }
        self.queued.lock().unwrap().push(pts_us);
        self.pending.push_back(Pending::Frame(pts_us));
        Ok(true)
    }

    fn queue_end_of_stream(&mut self) -> Result<bool> {
        self.pending.push_back(Pending::Eos);
        Ok(true)
    }

    fn drain(&mut self) -> Result<DrainEvent> {
        if self.fail_drain {
            return Err(PlayerError::Codec("injected decode failure".into()));
        }
        match self.pending.pop_front() {
            Some(Pending::Frame(pts)) => {
                self.last_pts = pts;
                Ok(DrainEvent::Frame(OutputBuffer {
                    frame: Some(test_frame(pts)),
                    pts_us: pts,
                    eos: false,
                }))
            }
            Some(Pending::Eos) => Ok(DrainEvent::Frame(OutputBuffer {
                frame: None,
                pts_us: self.last_pts,
                eos: true,
            })),
            None => Ok(DrainEvent::WouldBlock),
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
        Ok(())
    }
}

struct MockBackend {
    script: Script,
    queued: Arc<Mutex<Vec<i64>>>,
}

impl MediaBackend for MockBackend {
    fn open_metadata(&self, _source: &Path) -> Result<Box<dyn MetadataReader>> {
        if let Some(gate) = &self.script.prepare_gate {
            let _ = gate.recv();
        }
        Ok(Box::new(MockMetadata {
            info: self.script.probe,
        }))
    }

    fn open_demuxer(&self, _source: &Path) -> Result<Box<dyn Demuxer>> {
        Ok(Box::new(MockDemuxer {
            tracks: self.script.tracks.clone(),
            samples: self.script.samples.clone(),
            format: self.script.format,
            pos: 0,
        }))
    }

    fn open_decoder(
        &self,
        _source: &Path,
        _track_index: usize,
        target: Arc<dyn RenderTarget>,
    ) -> Result<Box<dyn DecoderSession>> {
        if self.script.fail_open_decoder {
            return Err(PlayerError::Codec("injected decoder failure".into()));
        }
        Ok(Box::new(MockDecoder {
            target,
            queued: Arc::clone(&self.queued),
            pending: VecDeque::new(),
            capacity: self.script.capacity,
            last_pts: 0,
            fail_drain: self.script.fail_drain,
        }))
    }
}

#[derive(Default)]
struct Counters {
    prepared: usize,
    finished: usize,
}

struct RecordingCallback {
    counters: Arc<Mutex<Counters>>,
    frames: Arc<Mutex<Vec<(i64, Instant)>>>,
    handled: bool,
    frame_gate: Option<(i64, Receiver<()>)>,
}

impl PlaybackCallback for RecordingCallback {
    fn on_prepared(&self) {
        self.counters.lock().unwrap().prepared += 1;
    }

    fn on_frame_available(&self, presentation_time_us: i64) -> bool {
        self.frames
            .lock()
            .unwrap()
            .push((presentation_time_us, Instant::now()));
        if let Some((gate_pts, gate)) = &self.frame_gate {
            if presentation_time_us == *gate_pts {
                let _ = gate.recv();
            }
        }
        self.handled
    }

    fn on_finished(&self) {
        self.counters.lock().unwrap().finished += 1;
    }
}

struct RecordingTarget {
    rendered: Arc<Mutex<Vec<(i64, Instant)>>>,
}

impl RenderTarget for RecordingTarget {
    fn write(&self, frame: VideoFrame) -> Result<()> {
        self.rendered
            .lock()
            .unwrap()
            .push((frame.pts, Instant::now()));
        Ok(())
    }
}

struct Harness {
    session: PlaybackSession,
    counters: Arc<Mutex<Counters>>,
    frames: Arc<Mutex<Vec<(i64, Instant)>>>,
    rendered: Arc<Mutex<Vec<(i64, Instant)>>>,
    queued: Arc<Mutex<Vec<i64>>>,
    source: tempfile::NamedTempFile,
}

impl Harness {
    fn new(script: Script, handled: bool, frame_gate: Option<(i64, Receiver<()>)>) -> Self {
        let counters = Arc::new(Mutex::new(Counters::default()));
        let frames = Arc::new(Mutex::new(Vec::new()));
        let rendered = Arc::new(Mutex::new(Vec::new()));
        let queued = Arc::new(Mutex::new(Vec::new()));

        let mut source = tempfile::NamedTempFile::new().unwrap();
        source.write_all(b"not a real container").unwrap();

        let session = PlaybackSessionBuilder::new(
            Arc::new(RecordingTarget {
                rendered: Arc::clone(&rendered),
            }),
            Arc::new(RecordingCallback {
                counters: Arc::clone(&counters),
                frames: Arc::clone(&frames),
                handled,
                frame_gate,
            }),
        )
        .with_backend(Arc::new(MockBackend {
            script,
            queued: Arc::clone(&queued),
        }))
        .build()
        .unwrap();

        Self {
            session,
            counters,
            frames,
            rendered,
            queued,
            source,
        }
    }

    fn prepare(&self) {
        self.session.prepare(self.source.path());
    }

    fn prepared(&self) -> usize {
        self.counters.lock().unwrap().prepared
    }

    fn finished(&self) -> usize {
        self.counters.lock().unwrap().finished
    }

    fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}

fn wait_for<F: Fn() -> bool>(what: &str, timeout: Duration, cond: F) {
    let start = Instant::now();
    while !cond() {
        if start.elapsed() > timeout {
            panic!("timed out waiting for {}", what);
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

const SHORT: Duration = Duration::from_secs(2);
const LONG: Duration = Duration::from_secs(5);

#[test]
fn prepare_populates_track_info() {
    // Probe supplies bitrate and frame rate; width/height/duration are
    // refreshed from the selected track's format.
    let h = Harness::new(Script::default(), true, None);
    h.prepare();
    wait_for("on_prepared", SHORT, || h.prepared() == 1);

    assert_eq!(h.session.state(), PlaybackState::Prepared);
    assert_eq!(h.session.width(), 320);
    assert_eq!(h.session.height(), 240);
    assert_eq!(h.session.duration_us(), 1_000_000);
    assert_eq!(h.session.bitrate(), 800_000);
    assert_eq!(h.session.frame_rate(), 25.0);
    assert_eq!(h.finished(), 0);
}

#[test]
fn end_to_end_playback_cycle() {
    let h = Harness::new(Script::default(), false, None);
    h.prepare();
    wait_for("on_prepared", SHORT, || h.prepared() == 1);
    assert!(h.session.width() > 0 && h.session.height() > 0);
    assert!(h.session.duration_us() > 0);

    h.session.play();
    wait_for("natural end of stream", LONG, || h.finished() == 1);

    let frames = h.frames.lock().unwrap();
    let pts: Vec<i64> = frames.iter().map(|(p, _)| *p).collect();
    assert_eq!(pts, vec![0, 20_000, 40_000]);
    assert!(pts.windows(2).all(|w| w[0] <= w[1]));
    drop(frames);

    let rendered = h.rendered.lock().unwrap();
    assert_eq!(rendered.len(), 3);
    drop(rendered);

    assert_eq!(h.session.state(), PlaybackState::Stopped);
    assert_eq!(h.finished(), 1);
}

#[test]
fn stop_is_idempotent() {
    let h = Harness::new(
        Script {
            samples: vec![0, 20_000, 5_000_000],
            ..Script::default()
        },
        false,
        None,
    );
    h.prepare();
    wait_for("on_prepared", SHORT, || h.prepared() == 1);
    h.session.play();
    wait_for("first frame", SHORT, || h.frame_count() >= 1);

    h.session.stop();
    wait_for("on_finished", SHORT, || h.finished() == 1);
    assert_eq!(h.session.state(), PlaybackState::Stopped);

    // A second stop on a stopped session is a no-op: no state change and
    // no additional terminal callback.
    h.session.stop();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(h.finished(), 1);
    assert_eq!(h.session.state(), PlaybackState::Stopped);
}

#[test]
fn mailbox_keeps_latest_request_only() {
    // Block the control thread inside prepare, enqueue two requests, and
    // check that only the later one is ever acted upon.
    let (gate_tx, gate_rx) = unbounded();
    let h = Harness::new(
        Script {
            prepare_gate: Some(gate_rx),
            ..Script::default()
        },
        true,
        None,
    );

    h.prepare();
    std::thread::sleep(Duration::from_millis(50));

    // Pause would be an illegal request in PREPARED and would kill the
    // control loop; the following seek must overwrite it.
    h.session.pause();
    h.session.seek(-1);
    gate_tx.send(()).unwrap();

    wait_for("on_prepared", SHORT, || h.prepared() == 1);
    assert_eq!(h.finished(), 0);

    // The loop is still alive, so the pause was never processed.
    h.session.play();
    wait_for("playback to finish", LONG, || h.finished() == 1);
    assert!(h.frame_count() > 0);
}

#[test]
fn illegal_request_is_fatal_to_the_loop() {
    let h = Harness::new(Script::default(), true, None);

    // START while STOPPED is not in the transition table.
    h.session.play();
    wait_for("fault teardown", SHORT, || h.finished() == 1);
    assert_eq!(h.prepared(), 0);
    assert_eq!(h.session.state(), PlaybackState::Stopped);

    // The control loop is gone; later requests are never observed.
    h.prepare();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(h.prepared(), 0);
    assert_eq!(h.finished(), 1);
}

#[test]
fn prepare_while_playing_is_fatal() {
    let h = Harness::new(
        Script {
            samples: vec![0, 20_000, 2_000_000],
            ..Script::default()
        },
        false,
        None,
    );
    h.prepare();
    wait_for("on_prepared", SHORT, || h.prepared() == 1);
    h.session.play();
    wait_for("first frame", SHORT, || h.frame_count() >= 1);

    h.prepare();
    wait_for("fault teardown", SHORT, || h.finished() == 1);
    assert_eq!(h.session.state(), PlaybackState::Stopped);
    assert_eq!(h.prepared(), 1);
}

#[test]
fn submitted_timestamps_never_decrease() {
    // The third access unit jumps backwards; the feeder clamps it up to
    // the watermark, producing a duplicate rather than an interpolation.
    let h = Harness::new(
        Script {
            samples: vec![0, 40_000, 20_000, 80_000],
            ..Script::default()
        },
        true,
        None,
    );
    h.prepare();
    wait_for("on_prepared", SHORT, || h.prepared() == 1);
    h.session.play();
    wait_for("natural end of stream", LONG, || h.finished() == 1);

    let queued = h.queued.lock().unwrap();
    assert_eq!(*queued, vec![0, 40_000, 40_000, 80_000]);
}

#[test]
fn no_video_track_leaves_session_stopped() {
    let h = Harness::new(
        Script {
            tracks: vec!["audio/aac"],
            ..Script::default()
        },
        true,
        None,
    );
    h.prepare();
    wait_for("error notification", SHORT, || h.finished() == 1);
    assert_eq!(h.prepared(), 0);
    assert_eq!(h.session.state(), PlaybackState::Stopped);

    // A format error is fatal to the run, not to the session.
    h.prepare();
    wait_for("second error notification", SHORT, || h.finished() == 2);
    assert_eq!(h.prepared(), 0);
}

#[test]
fn unreadable_source_leaves_session_stopped() {
    let h = Harness::new(Script::default(), true, None);
    let dir = tempfile::tempdir().unwrap();
    h.session.prepare(dir.path().join("missing.mp4"));
    wait_for("error notification", SHORT, || h.finished() == 1);
    assert_eq!(h.prepared(), 0);
    assert_eq!(h.session.state(), PlaybackState::Stopped);

    // The session recovers with a readable source.
    h.prepare();
    wait_for("on_prepared", SHORT, || h.prepared() == 1);
}

#[test]
fn decoder_creation_failure_tears_down_the_run() {
    let h = Harness::new(
        Script {
            fail_open_decoder: true,
            ..Script::default()
        },
        true,
        None,
    );
    h.prepare();
    wait_for("on_prepared", SHORT, || h.prepared() == 1);
    h.session.play();
    wait_for("codec error teardown", SHORT, || h.finished() == 1);
    assert_eq!(h.session.state(), PlaybackState::Stopped);

    // Still usable afterwards.
    h.prepare();
    wait_for("second prepare", SHORT, || h.prepared() == 2);
}

#[test]
fn decode_failure_tears_down_the_run() {
    let h = Harness::new(
        Script {
            fail_drain: true,
            ..Script::default()
        },
        true,
        None,
    );
    h.prepare();
    wait_for("on_prepared", SHORT, || h.prepared() == 1);
    h.session.play();
    wait_for("codec error teardown", LONG, || h.finished() == 1);
    assert_eq!(h.session.state(), PlaybackState::Stopped);
    assert_eq!(h.frame_count(), 0);
}

#[test]
fn pacing_enforces_frame_intervals() {
    let h = Harness::new(
        Script {
            samples: vec![0, 40_000, 80_000],
            ..Script::default()
        },
        false,
        None,
    );
    h.prepare();
    wait_for("on_prepared", SHORT, || h.prepared() == 1);
    h.session.play();
    wait_for("natural end of stream", LONG, || h.finished() == 1);

    let rendered = h.rendered.lock().unwrap();
    assert_eq!(rendered.len(), 3);
    // The wall-clock gap between consecutive renders is at least the
    // timestamp delta, modulo a little scheduler slack.
    let tolerance = Duration::from_millis(8);
    for pair in rendered.windows(2) {
        let gap = pair[1].1.duration_since(pair[0].1);
        assert!(
            gap + tolerance >= Duration::from_micros((pair[1].0 - pair[0].0) as u64),
            "gap {:?} too small for pts delta {}",
            gap,
            pair[1].0 - pair[0].0
        );
    }
}

#[test]
fn stop_interrupts_a_pacing_wait() {
    let h = Harness::new(
        Script {
            samples: vec![0, 5_000_000],
            ..Script::default()
        },
        false,
        None,
    );
    h.prepare();
    wait_for("on_prepared", SHORT, || h.prepared() == 1);
    h.session.play();
    wait_for("first render", SHORT, || h.rendered.lock().unwrap().len() >= 1);

    // The drainer is now sleeping towards a deadline five seconds out.
    let stop_issued = Instant::now();
    h.session.stop();
    wait_for("on_finished", SHORT, || h.finished() == 1);
    assert!(
        stop_issued.elapsed() < Duration::from_secs(2),
        "stop was delayed behind the pacing wait"
    );
}

#[test]
fn seek_reanchors_the_pacing_clock() {
    // Hold the drainer inside the frame callback for the 900ms frame,
    // seek while it is parked, then let it go: the frame must render
    // immediately off a fresh wall-clock anchor instead of waiting out
    // the deadline computed from the pre-seek reference.
    let (gate_tx, gate_rx) = unbounded();
    let h = Harness::new(
        Script {
            samples: vec![0, 40_000, 900_000, 940_000],
            ..Script::default()
        },
        false,
        Some((900_000, gate_rx)),
    );
    h.prepare();
    wait_for("on_prepared", SHORT, || h.prepared() == 1);
    h.session.play();
    wait_for("drainer parked at 900ms frame", SHORT, || {
        h.frames.lock().unwrap().iter().any(|(p, _)| *p == 900_000)
    });

    h.session.seek(900_000);
    std::thread::sleep(Duration::from_millis(150));

    let released = Instant::now();
    gate_tx.send(()).unwrap();
    wait_for("post-seek render", SHORT, || {
        h.rendered.lock().unwrap().iter().any(|(p, _)| *p == 900_000)
    });

    let rendered = h.rendered.lock().unwrap();
    let (_, at) = rendered.iter().find(|(p, _)| *p == 900_000).unwrap();
    assert!(
        at.duration_since(released) < Duration::from_millis(400),
        "post-seek frame paced off the stale reference"
    );
    drop(rendered);

    h.session.stop();
    wait_for("on_finished", SHORT, || h.finished() == 1);
}

#[test]
fn pause_and_resume_are_placeholder_transitions() {
    let h = Harness::new(
        Script {
            samples: vec![0, 20_000, 2_000_000],
            ..Script::default()
        },
        false,
        None,
    );
    h.prepare();
    wait_for("on_prepared", SHORT, || h.prepared() == 1);
    h.session.play();
    wait_for("first frame", SHORT, || h.frame_count() >= 1);

    h.session.pause();
    wait_for("paused", SHORT, || h.session.state() == PlaybackState::Paused);

    // Seeking is legal while paused.
    h.session.seek(0);
    h.session.resume();
    wait_for("playing again", SHORT, || {
        h.session.state() == PlaybackState::Playing
    });

    h.session.stop();
    wait_for("on_finished", SHORT, || h.finished() == 1);
    assert_eq!(h.session.state(), PlaybackState::Stopped);
}

#[test]
fn seek_before_play_is_applied_at_start() {
    let h = Harness::new(
        Script {
            samples: vec![0, 40_000, 900_000, 940_000],
            ..Script::default()
        },
        true,
        None,
    );
    h.prepare();
    wait_for("on_prepared", SHORT, || h.prepared() == 1);

    // The seek request itself is overwritten by play, but its target
    // survives and is applied before the pumps spawn.
    h.session.seek(900_000);
    h.session.play();
    wait_for("natural end of stream", LONG, || h.finished() == 1);

    // Repositioned to the 900ms access point, then stepped past it.
    let queued = h.queued.lock().unwrap();
    assert_eq!(*queued, vec![940_000]);
}
