//! Playback session and control state machine
//!
//! `PlaybackSession` is the long-lived owner object. All control calls are
//! non-blocking message sends into a single-slot mailbox; a dedicated
//! control thread consumes the latest pending request and dispatches it to
//! a per-state handler. The control thread is the only writer of the
//! playback state and the only code that starts or retires the feeder and
//! drainer threads.
//!
//! Mailbox contract: a request written while an earlier one is still
//! unconsumed silently replaces it. Latest intent wins; callers must not
//! assume every call is observed individually.

use crate::decoder::DecoderSession;
use crate::demux::{self, Demuxer, MetadataReader, Rotation, TrackInfo};
use crate::player::pump;
use crate::player::timing::TimingState;
use crate::player::{
    FfmpegBackend, FrameHook, MediaBackend, PassthroughHook, PlaybackCallback, PlaybackState,
    Request,
};
use crate::render::RenderTarget;
use crate::utils::config::PlaybackConfig;
use crate::utils::error::{PlayerError, Result};
use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Content-type prefix the prepared track must match
const VIDEO_TRACK_PREFIX: &str = "video/";

/// Shared control block: one mutex, one condition variable.
///
/// Every shared mutable field of the session lives behind this single lock;
/// the condvar carries request arrival, pump completion, and pacing wakeups
/// alike.
pub(crate) struct Shared {
    state: Mutex<ControlState>,
    pub(crate) cond: Condvar,
}

pub(crate) struct ControlState {
    /// Lifecycle flag: true from control-thread startup until it exits
    pub running: bool,

    /// Current playback state; written only by the control thread
    pub state: PlaybackState,

    /// Single-slot request mailbox
    pub request: Request,

    /// Seek target in microseconds, -1 = none
    pub seek_target_us: i64,

    /// Source for the next prepare
    pub source: Option<PathBuf>,

    /// True while a PLAYING run's pump threads should keep going
    pub pumping: bool,

    /// Set by the feeder once the end-of-stream marker is submitted
    pub input_done: bool,

    /// Set by the drainer once the decoder reports end of stream
    pub output_done: bool,

    /// Track properties, valid after on_prepared
    pub info: TrackInfo,

    /// Per-run presentation timing
    pub timing: TimingState,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(ControlState {
                running: false,
                state: PlaybackState::Stopped,
                request: Request::None,
                seek_target_us: -1,
                source: None,
                pumping: false,
                input_done: true,
                output_done: true,
                info: TrackInfo::default(),
                timing: TimingState::new(),
            }),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock()
    }

    pub(crate) fn notify_all(&self) {
        self.cond.notify_all();
    }
}

/// Builder for a playback session
pub struct PlaybackSessionBuilder {
    target: Arc<dyn RenderTarget>,
    callback: Arc<dyn PlaybackCallback>,
    hook: Arc<dyn FrameHook>,
    backend: Arc<dyn MediaBackend>,
    config: PlaybackConfig,
}

impl PlaybackSessionBuilder {
    /// A render target and a callback sink are mandatory; everything else
    /// has defaults (passthrough frame hook, ffmpeg backend, default
    /// config).
    pub fn new(target: Arc<dyn RenderTarget>, callback: Arc<dyn PlaybackCallback>) -> Self {
        Self {
            target,
            callback,
            hook: Arc::new(PassthroughHook),
            backend: Arc::new(FfmpegBackend),
            config: PlaybackConfig::default(),
        }
    }

    /// Intercept decoded frames before the pacing decision
    pub fn with_frame_hook(mut self, hook: Arc<dyn FrameHook>) -> Self {
        self.hook = hook;
        self
    }

    /// Substitute the media backend (used by tests)
    pub fn with_backend(mut self, backend: Arc<dyn MediaBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_config(mut self, config: PlaybackConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawn the control thread and block until it has announced
    /// readiness, so a half-constructed session is never observable.
    pub fn build(self) -> Result<PlaybackSession> {
        let shared = Arc::new(Shared::new());
        let stop_timeout = self.config.stop_timeout();

        let task = PlayerTask {
            shared: Arc::clone(&shared),
            callback: self.callback,
            hook: self.hook,
            target: self.target,
            backend: self.backend,
            config: self.config,
            metadata: None,
            demuxer: None,
            decoder: None,
            video_track: None,
            feeder: None,
            drainer: None,
        };

        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<()>(0);
        let control = thread::spawn(move || task.run(ready_tx));
        ready_rx
            .recv()
            .map_err(|_| PlayerError::Internal("control thread died during startup".into()))?;

        Ok(PlaybackSession {
            shared,
            control: Some(control),
            stop_timeout,
        })
    }
}

/// Handle to one playback instance.
///
/// Exactly one exists per playback; it owns the demultiplexer, decoder
/// session and metadata reader for the instance's lifetime through its
/// control thread.
pub struct PlaybackSession {
    shared: Arc<Shared>,
    control: Option<JoinHandle<()>>,
    stop_timeout: Duration,
}

impl PlaybackSession {
    /// Create a session with the default ffmpeg backend
    pub fn new(
        target: Arc<dyn RenderTarget>,
        callback: Arc<dyn PlaybackCallback>,
    ) -> Result<Self> {
        PlaybackSessionBuilder::new(target, callback).build()
    }

    /// Request to prepare the given source for playback.
    ///
    /// Non-blocking; overwrites any unconsumed request. `on_prepared`
    /// fires once the track is open and the accessors are valid.
    pub fn prepare<P: AsRef<Path>>(&self, source: P) {
        debug!("prepare: {:?}", source.as_ref());
        let mut st = self.shared.lock();
        st.source = Some(source.as_ref().to_path_buf());
        st.request = Request::Prepare;
        self.shared.notify_all();
    }

    /// Request to start playing. No-op while already playing.
    ///
    /// Non-blocking; overwrites any unconsumed request.
    pub fn play(&self) {
        debug!("play");
        let mut st = self.shared.lock();
        if st.state == PlaybackState::Playing {
            return;
        }
        st.request = Request::Start;
        self.shared.notify_all();
    }

    /// Request a seek to the given time. A negative target is a no-op.
    /// If the target is not an access point the picture is broken until
    /// the next one.
    ///
    /// Non-blocking; overwrites any unconsumed request.
    pub fn seek(&self, time_us: i64) {
        debug!("seek: {}", time_us);
        let mut st = self.shared.lock();
        st.request = Request::Seek;
        st.seek_target_us = time_us;
        self.shared.notify_all();
    }

    /// Request to stop playing.
    ///
    /// Blocks the caller briefly (bounded by the configured stop timeout)
    /// waiting for the control thread to acknowledge, but does not
    /// guarantee teardown has completed by the time it returns.
    pub fn stop(&self) {
        debug!("stop");
        let mut st = self.shared.lock();
        if st.state != PlaybackState::Stopped {
            st.request = Request::Stop;
            self.shared.notify_all();
            let _ = self.shared.cond.wait_for(&mut st, self.stop_timeout);
        }
    }

    /// Request pause. Placeholder: the state changes but feed and drain
    /// are not actually suspended.
    pub fn pause(&self) {
        debug!("pause");
        let mut st = self.shared.lock();
        st.request = Request::Pause;
        self.shared.notify_all();
    }

    /// Request resume from pause. Placeholder, see `pause`.
    pub fn resume(&self) {
        debug!("resume");
        let mut st = self.shared.lock();
        st.request = Request::Resume;
        self.shared.notify_all();
    }

    /// Stop playback and shut the control thread down.
    ///
    /// The quit request is always honored as soon as the control thread
    /// next checks its mailbox, so full teardown happens eventually even
    /// when the bounded stop wait returns first.
    pub fn release(&self) {
        debug!("release");
        self.stop();
        let mut st = self.shared.lock();
        st.request = Request::Quit;
        self.shared.notify_all();
    }

    /// Current playback state
    pub fn state(&self) -> PlaybackState {
        self.shared.lock().state
    }

    /// Frame width in pixels; valid after on_prepared
    pub fn width(&self) -> u32 {
        self.shared.lock().info.width
    }

    /// Frame height in pixels; valid after on_prepared
    pub fn height(&self) -> u32 {
        self.shared.lock().info.height
    }

    /// Container bitrate in bits per second; valid after on_prepared
    pub fn bitrate(&self) -> u32 {
        self.shared.lock().info.bitrate
    }

    /// Nominal frame rate; valid after on_prepared
    pub fn frame_rate(&self) -> f32 {
        self.shared.lock().info.frame_rate
    }

    /// Display rotation; valid after on_prepared
    pub fn rotation(&self) -> Rotation {
        self.shared.lock().info.rotation
    }

    /// Duration in microseconds; valid after on_prepared
    pub fn duration_us(&self) -> i64 {
        self.shared.lock().info.duration_us
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.release();
        if let Some(handle) = self.control.take() {
            let _ = handle.join();
        }
    }
}

/// Whether the control loop keeps going after a dispatch
enum Flow {
    Continue,
    Quit,
}

/// State owned by the control thread
struct PlayerTask {
    shared: Arc<Shared>,
    callback: Arc<dyn PlaybackCallback>,
    hook: Arc<dyn FrameHook>,
    target: Arc<dyn RenderTarget>,
    backend: Arc<dyn MediaBackend>,
    config: PlaybackConfig,

    metadata: Option<Box<dyn MetadataReader>>,
    demuxer: Option<Arc<Mutex<Box<dyn Demuxer>>>>,
    decoder: Option<Arc<Mutex<Box<dyn DecoderSession>>>>,
    video_track: Option<usize>,
    feeder: Option<JoinHandle<()>>,
    drainer: Option<JoinHandle<()>>,
}

impl PlayerTask {
    fn run(mut self, ready: crossbeam_channel::Sender<()>) {
        {
            let mut st = self.shared.lock();
            st.running = true;
            st.state = PlaybackState::Stopped;
            st.request = Request::None;
            st.seek_target_us = -1;
        }
        self.shared.notify_all();
        let _ = ready.send(());

        // Teardown and the terminal callback run on every exit path. After
        // a clean quit with nothing allocated there is no cycle left to
        // finish; a fault always closes its cycle with on_finished.
        match self.run_loop() {
            Ok(()) => {
                if self.is_active() {
                    self.handle_stop();
                }
            }
            Err(e) => {
                error!("control loop aborted: {}", e);
                self.handle_stop();
            }
        }
        {
            let mut st = self.shared.lock();
            st.running = false;
        }
        self.shared.notify_all();
        debug!("control thread finished");
    }

    fn run_loop(&mut self) -> Result<()> {
        loop {
            let (state, request) = {
                let mut st = self.shared.lock();
                let request = std::mem::replace(&mut st.request, Request::None);
                (st.state, request)
            };

            let flow = match state {
                PlaybackState::Stopped => self.process_stopped(request),
                PlaybackState::Prepared => self.process_prepared(request),
                PlaybackState::Playing => self.process_playing(request),
                PlaybackState::Paused => self.process_paused(request),
            };

            match flow {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit) => return Ok(()),
                Err(e) if e.is_fatal_to_loop() => return Err(e),
                Err(e) => {
                    // Fatal to the current run, not to the session: tear
                    // down through the stop path and accept new requests.
                    error!("playback fault: {}", e);
                    self.handle_stop();
                }
            }
        }
    }

    fn process_stopped(&mut self, request: Request) -> Result<Flow> {
        match request {
            Request::Prepare => self.handle_prepare()?,
            Request::Start | Request::Pause | Request::Resume => {
                return Err(PlayerError::IllegalRequest {
                    state: PlaybackState::Stopped,
                    request,
                });
            }
            Request::Quit => return Ok(Flow::Quit),
            // None, Seek and Stop just wait for something actionable
            _ => self.wait_for_request(),
        }
        Ok(Flow::Continue)
    }

    fn process_prepared(&mut self, request: Request) -> Result<Flow> {
        match request {
            Request::Start => self.handle_start()?,
            Request::Pause | Request::Resume => {
                return Err(PlayerError::IllegalRequest {
                    state: PlaybackState::Prepared,
                    request,
                });
            }
            Request::Stop => self.handle_stop(),
            Request::Quit => return Ok(Flow::Quit),
            _ => self.wait_for_request(),
        }
        Ok(Flow::Continue)
    }

    fn process_playing(&mut self, request: Request) -> Result<Flow> {
        match request {
            Request::Prepare | Request::Start | Request::Resume => {
                return Err(PlayerError::IllegalRequest {
                    state: PlaybackState::Playing,
                    request,
                });
            }
            Request::Seek => self.handle_seek()?,
            Request::Stop => self.handle_stop(),
            Request::Pause => self.handle_pause(),
            Request::Quit => return Ok(Flow::Quit),
            _ => self.handle_playing_idle(),
        }
        Ok(Flow::Continue)
    }

    fn process_paused(&mut self, request: Request) -> Result<Flow> {
        match request {
            Request::Prepare | Request::Start => {
                return Err(PlayerError::IllegalRequest {
                    state: PlaybackState::Paused,
                    request,
                });
            }
            Request::Seek => self.handle_seek()?,
            Request::Stop => self.handle_stop(),
            Request::Resume => self.handle_resume(),
            Request::Quit => return Ok(Flow::Quit),
            _ => self.wait_for_request(),
        }
        Ok(Flow::Continue)
    }

    /// Idle wait for STOPPED/PREPARED/PAUSED. Predicate-guarded so a
    /// request enqueued between mailbox consumption and this wait is
    /// observed immediately.
    fn wait_for_request(&self) {
        let mut st = self.shared.lock();
        while st.request == Request::None && st.running {
            self.shared.cond.wait(&mut st);
        }
    }

    /// PLAYING with no pending request: sleep until something happens,
    /// then auto-teardown once both pumps report done.
    fn handle_playing_idle(&mut self) {
        {
            let mut st = self.shared.lock();
            while st.request == Request::None
                && st.running
                && !(st.input_done && st.output_done)
            {
                self.shared.cond.wait(&mut st);
            }
            if !(st.input_done && st.output_done) {
                return;
            }
        }
        debug!("end of stream on both pumps, stopping");
        self.handle_stop();
    }

    fn handle_prepare(&mut self) -> Result<()> {
        debug!("handle_prepare");
        {
            let st = self.shared.lock();
            if st.state != PlaybackState::Stopped {
                return Err(PlayerError::IllegalRequest {
                    state: st.state,
                    request: Request::Prepare,
                });
            }
        }
        let source = {
            self.shared.lock().source.clone()
        }
        .ok_or_else(|| PlayerError::Source("no source set".into()))?;

        // Fail fast on an unreadable source, before anything is allocated.
        std::fs::File::open(&source)
            .map_err(|e| PlayerError::Source(format!("Unable to read {:?}: {}", source, e)))?;

        // Container-level probe first so the accessors are populated even
        // for fields the track format cannot supply.
        let mut metadata = self.backend.open_metadata(&source)?;
        let info = metadata.probe();
        self.shared.lock().info = info;
        self.metadata = Some(metadata);

        let mut demuxer = self.backend.open_demuxer(&source)?;
        let track = demux::select_track_by_type(demuxer.as_ref(), VIDEO_TRACK_PREFIX)
            .ok_or_else(|| {
                PlayerError::Format(format!("No video track found in {:?}", source))
            })?;
        demuxer.select_track(track)?;
        let format = demuxer.track_format(track)?;

        {
            let mut st = self.shared.lock();
            st.info.width = format.width;
            st.info.height = format.height;
            st.info.duration_us = format.duration_us;
            st.state = PlaybackState::Prepared;
        }
        self.video_track = Some(track);
        self.demuxer = Some(Arc::new(Mutex::new(demuxer)));

        info!(
            "prepared {:?}: track {} ({}), {}x{}, {} us",
            source, track, format.content_type, format.width, format.height, format.duration_us
        );
        self.callback.on_prepared();
        Ok(())
    }

    fn handle_start(&mut self) -> Result<()> {
        debug!("handle_start");
        {
            let mut st = self.shared.lock();
            if st.state != PlaybackState::Prepared {
                return Err(PlayerError::IllegalRequest {
                    state: st.state,
                    request: Request::Start,
                });
            }
            st.state = PlaybackState::Playing;
        }

        // A seek target enqueued before start is applied before the pumps
        // see their first sample.
        let pending_seek = self.shared.lock().seek_target_us;
        if pending_seek > 0 {
            self.handle_seek()?;
        }

        let source = self
            .shared
            .lock()
            .source
            .clone()
            .ok_or_else(|| PlayerError::Internal("no source after prepare".into()))?;
        let track = self
            .video_track
            .ok_or_else(|| PlayerError::Internal("no selected track".into()))?;
        let demuxer = Arc::clone(
            self.demuxer
                .as_ref()
                .ok_or_else(|| PlayerError::Internal("no demuxer after prepare".into()))?,
        );

        let session = self
            .backend
            .open_decoder(&source, track, Arc::clone(&self.target))?;
        let decoder = Arc::new(Mutex::new(session));
        self.decoder = Some(Arc::clone(&decoder));

        {
            let mut st = self.shared.lock();
            st.timing.reset();
            st.input_done = false;
            st.output_done = false;
            st.pumping = true;
        }

        let poll = self.config.poll_interval();
        self.feeder = Some(pump::spawn_feeder(
            Arc::clone(&self.shared),
            Arc::clone(&demuxer),
            Arc::clone(&decoder),
            poll,
        ));
        self.drainer = Some(pump::spawn_drainer(
            Arc::clone(&self.shared),
            decoder,
            Arc::clone(&self.callback),
            Arc::clone(&self.hook),
            poll,
        ));
        info!("playback started");
        Ok(())
    }

    /// Reposition the demultiplexer to the pending seek target.
    ///
    /// A negative target is a no-op. Timing state is reset so pacing
    /// re-anchors on the next rendered frame instead of extrapolating from
    /// pre-seek timestamps. Does not change the playback state.
    fn handle_seek(&mut self) -> Result<()> {
        let target_us = self.shared.lock().seek_target_us;
        debug!("handle_seek: {}", target_us);
        if target_us < 0 {
            return Ok(());
        }

        if let Some(demuxer) = &self.demuxer {
            let mut d = demuxer.lock();
            d.seek_to(target_us)?;
            // Step past the access point so the next feed reads a
            // consumable sample.
            d.advance();
        }
        let mut st = self.shared.lock();
        st.timing.reset();
        st.seek_target_us = -1;
        Ok(())
    }

    /// Stop playback and release every per-run resource.
    ///
    /// Idempotent; safe to call with nothing allocated. Order matters:
    /// pumps are signalled and joined before the decoder session is
    /// stopped, the decoder before the demultiplexer, the demultiplexer
    /// before the metadata reader.
    fn handle_stop(&mut self) {
        debug!("handle_stop");
        {
            let mut st = self.shared.lock();
            st.pumping = false;
        }
        self.shared.notify_all();
        if let Some(handle) = self.feeder.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.drainer.take() {
            let _ = handle.join();
        }

        if let Some(decoder) = self.decoder.take() {
            if let Err(e) = decoder.lock().stop() {
                warn!("decoder stop failed: {}", e);
            }
        }
        self.demuxer = None;
        self.metadata = None;
        self.video_track = None;

        {
            let mut st = self.shared.lock();
            st.input_done = true;
            st.output_done = true;
            st.timing.reset();
            st.seek_target_us = -1;
            st.state = PlaybackState::Stopped;
        }
        self.shared.notify_all();
        info!("playback stopped");
        self.callback.on_finished();
    }

    fn handle_pause(&mut self) {
        debug!("handle_pause");
        // Placeholder: the pumps keep running. Real pause would need
        // buffer retention and a frozen pacing clock.
        let mut st = self.shared.lock();
        st.state = PlaybackState::Paused;
    }

    fn handle_resume(&mut self) {
        debug!("handle_resume");
        // Placeholder, see handle_pause.
        let mut st = self.shared.lock();
        st.state = PlaybackState::Playing;
    }

    /// Anything left that the exit-path teardown needs to release or
    /// announce?
    fn is_active(&self) -> bool {
        let st = self.shared.lock();
        st.state != PlaybackState::Stopped
            || self.metadata.is_some()
            || self.demuxer.is_some()
            || self.decoder.is_some()
    }
}
