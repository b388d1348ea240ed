//! Video playback engine with an optional embedded audio engine.

use super::sync::{FramePacer, SyncDecision, Synchronizer};
use super::{Command, EngineShared, EngineState, PositionThrottle};
use crate::config::PlayerConfig;
use crate::engine::audio::AudioEngine;
use crate::error::PlayerError;
use crate::events::PlayerEvent;
use crate::session::{MediaKind, VideoFrame, VideoSession};
use crate::sink::VolumeHandle;
use crate::source::SourceBuffer;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, info, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Plays the first video stream of an in-memory media buffer.
///
/// When the container also carries an audio stream, `initialize` builds an
/// independent [`AudioEngine`] over the same buffer; the decode thread then
/// paces frames against the audio clock and relays the audio engine's
/// position, error and finish notifications. Without audio, frames follow a
/// wall-clock schedule derived from their PTS spacing.
pub struct VideoEngine {
    source: SourceBuffer,
    config: PlayerConfig,
    state: EngineState,
    shared: Arc<EngineShared>,
    events_tx: Sender<PlayerEvent>,
    events_rx: Receiver<PlayerEvent>,
    commands_tx: Sender<Command>,
    commands_rx: Option<Receiver<Command>>,
    session: Option<VideoSession>,
    audio: Option<AudioEngine>,
    audio_volume: Option<VolumeHandle>,
    has_audio: bool,
    width: usize,
    height: usize,
    frame_rate: f64,
    duration: f64,
    thread: Option<JoinHandle<()>>,
}

impl VideoEngine {
    pub fn new(source: SourceBuffer) -> Self {
        Self::with_config(source, PlayerConfig::default())
    }

    pub fn with_config(source: SourceBuffer, config: PlayerConfig) -> Self {
        let (events_tx, events_rx) = unbounded();
        let (commands_tx, commands_rx) = unbounded();
        Self {
            source,
            config,
            state: EngineState::Uninitialized,
            shared: EngineShared::new(),
            events_tx,
            events_rx,
            commands_tx,
            commands_rx: Some(commands_rx),
            session: None,
            audio: None,
            audio_volume: None,
            has_audio: false,
            width: 0,
            height: 0,
            frame_rate: 0.0,
            duration: 0.0,
            thread: None,
        }
    }

    /// Decode the first displayable frame of a buffer without building a
    /// full engine. Used for poster/preview images.
    pub fn extract_first_frame(source: &SourceBuffer) -> Result<VideoFrame, PlayerError> {
        let config = PlayerConfig::default();
        let mut session = VideoSession::open(source.clone(), config.sync.fallback_fps)?;
        session
            .next_frame()
            .ok_or_else(|| PlayerError::DecoderOpenFailed {
                kind: MediaKind::Video,
                reason: "no decodable video frame in buffer".into(),
            })
    }

    /// Events emitted by the engine (including relayed audio events).
    pub fn events(&self) -> Receiver<PlayerEvent> {
        self.events_rx.clone()
    }

    /// Open the video session and, when the container has an audio stream,
    /// the embedded audio engine.
    ///
    /// Emits [`PlayerEvent::VideoInfo`] once on success. A video failure is
    /// emitted as [`PlayerEvent::Error`] and leaves the engine
    /// uninitialized; an audio failure only downgrades playback to silent.
    pub fn initialize(&mut self) -> Result<(), PlayerError> {
        if self.state != EngineState::Uninitialized {
            return Ok(());
        }

        let session = match VideoSession::open(self.source.clone(), self.config.sync.fallback_fps)
        {
            Ok(session) => session,
            Err(err) => return Err(self.fail(err)),
        };

        // Losing the audio stream downgrades to silent playback instead of
        // failing the whole engine.
        let mut audio = None;
        if session.has_audio_stream() {
            let mut engine = AudioEngine::with_config(self.source.clone(), self.config.clone());
            match engine.initialize() {
                Ok(()) => audio = Some(engine),
                Err(err) => warn!("embedded audio engine unavailable: {err}"),
            }
        }

        self.has_audio = audio.is_some();
        self.audio_volume = audio.as_ref().and_then(AudioEngine::volume_handle);
        self.width = session.width();
        self.height = session.height();
        self.frame_rate = session.frame_rate();
        self.duration = session.duration();

        let _ = self.events_tx.send(PlayerEvent::VideoInfo {
            width: self.width,
            height: self.height,
            fps: self.frame_rate,
            duration: self.duration,
            has_audio: self.has_audio,
        });

        self.session = Some(session);
        self.audio = audio;
        self.state = EngineState::Ready;
        Ok(())
    }

    /// Spawn the decode thread (and the embedded audio thread, if any).
    /// Initializes first when needed.
    pub fn start(&mut self) -> Result<(), PlayerError> {
        match self.state {
            EngineState::Running => return Ok(()),
            EngineState::Stopped => {
                warn!("start() ignored: engine is stopped, reinitialize first");
                return Ok(());
            }
            EngineState::Uninitialized => self.initialize()?,
            EngineState::Ready => {}
        }

        let (session, commands) = match (self.session.take(), self.commands_rx.take()) {
            (Some(session), Some(commands)) => (session, commands),
            _ => {
                warn!("start() called without an initialized session");
                return Ok(());
            }
        };

        let mut audio = self.audio.take();
        if let Some(engine) = audio.as_mut() {
            engine.start()?;
        }
        let audio_events = audio.as_ref().map(AudioEngine::events);
        let has_audio = audio.is_some();

        let worker = VideoLoop {
            synchronizer: Synchronizer::new(self.config.sync.clone()),
            pacer: FramePacer::new(self.frame_rate, &self.config.sync),
            throttle: PositionThrottle::new(&self.config),
            latch: FinishLatch::new(has_audio),
            session,
            audio,
            audio_events,
            audio_paused: true,
            commands,
            events: self.events_tx.clone(),
            shared: Arc::clone(&self.shared),
            config: self.config.clone(),
            pending_seek: None,
            finished_emitted: false,
            last_emitted_pts: None,
        };
        self.thread = Some(thread::spawn(move || worker.run()));
        self.state = EngineState::Running;
        Ok(())
    }

    /// Toggle between playing and paused; the embedded audio engine follows.
    pub fn pause(&mut self) {
        let _ = self.commands_tx.send(Command::TogglePause);
    }

    pub fn is_paused(&self) -> bool {
        self.shared.is_paused()
    }

    /// Whether video playback ran into the end of the stream (cleared by
    /// seek or reset).
    pub fn reached_end(&self) -> bool {
        self.shared.reached_end()
    }

    /// Request a jump to `secs`, clamped to `[0, duration)`. Video and audio
    /// reposition independently; the synchronizer absorbs the transient
    /// desync.
    pub fn seek(&mut self, secs: f64) {
        let _ = self.commands_tx.send(Command::Seek(self.clamp_target(secs)));
    }

    /// Rewind to the start, paused, with the end-of-stream latch cleared.
    pub fn reset(&mut self) {
        self.shared.set_position(0.0);
        let _ = self.commands_tx.send(Command::Reset);
    }

    /// Stop playback and join both decode threads. No events are emitted
    /// afterwards; `reinitialize` is required before playing again.
    pub fn stop(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = self.commands_tx.send(Command::Stop);
            if handle.join().is_err() {
                warn!("video decode thread panicked");
            }
            self.state = EngineState::Stopped;
        } else if let Some(mut audio) = self.audio.take() {
            // never started: only the embedded engine may hold resources
            audio.stop();
        }
    }

    /// Tear down and rebuild the whole engine after a `stop`.
    pub fn reinitialize(&mut self) -> Result<(), PlayerError> {
        if self.thread.is_some() {
            self.stop();
        }
        self.session = None;
        self.audio = None;
        self.audio_volume = None;
        self.has_audio = false;
        self.width = 0;
        self.height = 0;
        self.frame_rate = 0.0;
        self.duration = 0.0;
        let (commands_tx, commands_rx) = unbounded();
        self.commands_tx = commands_tx;
        self.commands_rx = Some(commands_rx);
        self.shared = EngineShared::new();
        self.state = EngineState::Uninitialized;
        self.initialize()
    }

    /// Volume of the embedded audio engine; a no-op without one.
    pub fn set_volume(&self, volume: f32) {
        if let Some(cell) = &self.audio_volume {
            cell.set(volume);
        }
    }

    pub fn volume(&self) -> f32 {
        self.audio_volume
            .as_ref()
            .map(VolumeHandle::get)
            .unwrap_or(0.0)
    }

    /// Whether an embedded audio engine is playing alongside the video.
    pub fn has_audio(&self) -> bool {
        self.has_audio
    }

    /// Playback position in seconds (the audio clock when audio is present).
    pub fn position(&self) -> f64 {
        self.shared.position()
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    fn fail(&mut self, err: PlayerError) -> PlayerError {
        warn!("video engine initialization failed: {err}");
        let _ = self.events_tx.send(PlayerEvent::Error(err.to_string()));
        self.session = None;
        self.audio = None;
        self.audio_volume = None;
        err
    }

    fn clamp_target(&self, secs: f64) -> f64 {
        if self.duration > 0.0 {
            secs.clamp(0.0, (self.duration - 1e-6).max(0.0))
        } else {
            secs.max(0.0)
        }
    }
}

impl Drop for VideoEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(PartialEq)]
enum Flow {
    Continue,
    Exit,
}

/// Latch for the dual end-of-stream condition: playback is finished only
/// when the video stream is exhausted and, when audio exists, the audio
/// engine reported its own finish. Whichever lands second completes it.
struct FinishLatch {
    has_audio: bool,
    video_done: bool,
    audio_done: bool,
}

impl FinishLatch {
    fn new(has_audio: bool) -> Self {
        Self {
            has_audio,
            video_done: false,
            audio_done: false,
        }
    }

    /// Record video end of stream; returns whether playback is now finished.
    fn mark_video(&mut self) -> bool {
        self.video_done = true;
        self.complete()
    }

    /// Record the audio engine's finish; returns whether playback is now
    /// finished.
    fn mark_audio(&mut self) -> bool {
        self.audio_done = true;
        self.complete()
    }

    fn complete(&self) -> bool {
        self.video_done && (self.audio_done || !self.has_audio)
    }

    fn is_video_done(&self) -> bool {
        self.video_done
    }

    fn reset(&mut self) {
        self.video_done = false;
        self.audio_done = false;
    }
}

/// The video decode thread body. Owns the session and the embedded audio
/// engine outright.
struct VideoLoop {
    session: VideoSession,
    audio: Option<AudioEngine>,
    audio_events: Option<Receiver<PlayerEvent>>,
    /// Mirror of the embedded engine's intended pause state; toggles are
    /// asynchronous, so the live flag cannot be compared reliably.
    audio_paused: bool,
    commands: Receiver<Command>,
    events: Sender<PlayerEvent>,
    shared: Arc<EngineShared>,
    config: PlayerConfig,
    synchronizer: Synchronizer,
    pacer: FramePacer,
    throttle: PositionThrottle,
    latch: FinishLatch,
    pending_seek: Option<f64>,
    finished_emitted: bool,
    last_emitted_pts: Option<f64>,
}

impl VideoLoop {
    fn run(mut self) {
        info!("video decode thread started");

        'run: loop {
            if self.drain_commands() == Flow::Exit {
                break;
            }
            self.relay_audio_events();

            if let Some(target) = self.pending_seek.take() {
                self.do_seek(target);
                continue;
            }

            if self.shared.is_paused() {
                if self.awaiting_audio_finish() {
                    // video is done but the audio engine is still playing
                    // out; poll so its finish can complete the latch
                    match self.commands.recv_timeout(self.config.position_interval) {
                        Ok(command) => {
                            if self.apply(command) == Flow::Exit {
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                } else {
                    match self.commands.recv() {
                        Ok(command) => {
                            if self.apply(command) == Flow::Exit {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
                continue;
            }

            let Some(frame) = self.session.next_frame() else {
                self.on_video_eof();
                continue;
            };

            match self.schedule(&frame) {
                SyncDecision::Drop => {
                    debug!("dropping a late video frame");
                    continue;
                }
                SyncDecision::Wait(total) => {
                    // bounded sleeps; control messages interrupt the wait
                    let mut remaining = total;
                    while !remaining.is_zero() {
                        let slice = remaining.min(self.config.sync.max_wait);
                        match self.commands.recv_timeout(slice) {
                            Ok(command) => {
                                if self.apply(command) == Flow::Exit {
                                    break 'run;
                                }
                                if self.pending_seek.is_some() || self.shared.is_paused() {
                                    // the frame in hand is stale
                                    continue 'run;
                                }
                            }
                            Err(RecvTimeoutError::Timeout) => {
                                remaining = remaining.saturating_sub(slice);
                            }
                            Err(RecvTimeoutError::Disconnected) => break 'run,
                        }
                    }
                    self.emit_frame(frame);
                }
                SyncDecision::Emit => self.emit_frame(frame),
            }
        }

        if let Some(mut audio) = self.audio.take() {
            audio.stop();
        }
        info!("video decode thread exited");
    }

    fn drain_commands(&mut self) -> Flow {
        loop {
            match self.commands.try_recv() {
                Ok(command) => {
                    if self.apply(command) == Flow::Exit {
                        return Flow::Exit;
                    }
                }
                Err(TryRecvError::Empty) => return Flow::Continue,
                Err(TryRecvError::Disconnected) => return Flow::Exit,
            }
        }
    }

    fn apply(&mut self, command: Command) -> Flow {
        match command {
            Command::TogglePause => {
                let paused = !self.shared.is_paused();
                self.shared.set_paused(paused);
                self.set_audio_paused(paused);
                debug!("video engine {}", if paused { "paused" } else { "playing" });
            }
            Command::Seek(target) => self.pending_seek = Some(target),
            Command::Reset => {
                self.shared.set_paused(true);
                self.set_audio_paused(true);
                self.pending_seek = Some(0.0);
                self.shared.set_reached_end(false);
                self.latch.reset();
                self.finished_emitted = false;
            }
            Command::Stop => return Flow::Exit,
        }
        Flow::Continue
    }

    fn set_audio_paused(&mut self, paused: bool) {
        if self.audio_paused == paused {
            return;
        }
        if let Some(audio) = self.audio.as_mut() {
            audio.pause();
        }
        self.audio_paused = paused;
    }

    fn schedule(&mut self, frame: &VideoFrame) -> SyncDecision {
        match (&self.audio, frame.pts) {
            (Some(audio), Some(pts)) => self.synchronizer.decide(pts, audio.position()),
            _ => {
                let delay = self.pacer.delay_for(frame.pts);
                if delay.is_zero() {
                    SyncDecision::Emit
                } else {
                    SyncDecision::Wait(delay)
                }
            }
        }
    }

    fn emit_frame(&mut self, frame: VideoFrame) {
        if let Some(pts) = frame.pts {
            // frames never go out in decreasing PTS order
            if let Some(last) = self.last_emitted_pts {
                if pts < last {
                    debug!("discarding an out-of-order video frame");
                    return;
                }
            }
            self.last_emitted_pts = Some(pts);

            if self.audio.is_none() {
                if pts >= self.shared.position() {
                    self.shared.set_position(pts);
                }
                if self.throttle.should_emit(pts) {
                    let _ = self.events.send(PlayerEvent::PositionChanged(pts));
                }
            }
        }
        self.pacer.frame_emitted(frame.pts);
        let _ = self.events.send(PlayerEvent::FrameReady(frame));
    }

    fn relay_audio_events(&mut self) {
        let drained: Vec<PlayerEvent> = match &self.audio_events {
            Some(receiver) => receiver.try_iter().collect(),
            None => return,
        };

        for event in drained {
            match event {
                PlayerEvent::PositionChanged(position) => {
                    // the audio clock is the playback position
                    self.shared.set_position(position);
                    let _ = self.events.send(PlayerEvent::PositionChanged(position));
                }
                PlayerEvent::Finished => {
                    self.audio_paused = true;
                    if self.latch.mark_audio() && !self.finished_emitted {
                        let _ = self.events.send(PlayerEvent::Finished);
                        self.finished_emitted = true;
                    }
                }
                PlayerEvent::Error(message) => {
                    let _ = self.events.send(PlayerEvent::Error(message));
                }
                _ => {}
            }
        }
    }

    fn on_video_eof(&mut self) {
        if self.latch.mark_video() && !self.finished_emitted {
            info!("video stream reached its end");
            let _ = self.events.send(PlayerEvent::Finished);
            self.finished_emitted = true;
        }
        self.shared.set_reached_end(true);
        self.shared.set_paused(true);
    }

    fn awaiting_audio_finish(&self) -> bool {
        self.latch.is_video_done() && !self.latch.complete() && !self.finished_emitted
    }

    fn do_seek(&mut self, target: f64) {
        // streams reposition independently; a brief desync afterwards is
        // expected and corrected by the synchronizer
        if let Some(audio) = self.audio.as_mut() {
            audio.seek(target);
        }
        match self.session.seek_to(target) {
            Ok(()) => {
                self.pacer.rewind();
                self.last_emitted_pts = None;
                self.latch.reset();
                self.finished_emitted = false;
                self.shared.set_reached_end(false);
                if self.audio.is_none() {
                    self.shared.set_position(target);
                    self.throttle.mark(target);
                    let _ = self.events.send(PlayerEvent::PositionChanged(target));
                }
            }
            Err(err) => {
                warn!("video seek failed: {err}");
                let _ = self.events.send(PlayerEvent::Error(err.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latch_without_audio_completes_on_video_eof() {
        let mut latch = FinishLatch::new(false);
        assert!(!latch.complete());
        assert!(latch.mark_video());
        assert!(latch.complete());
    }

    #[test]
    fn test_latch_with_audio_needs_both_sides() {
        let mut latch = FinishLatch::new(true);
        assert!(!latch.mark_video());
        assert!(!latch.complete());
        // the second side performs the completion
        assert!(latch.mark_audio());
    }

    #[test]
    fn test_latch_order_is_irrelevant() {
        let mut latch = FinishLatch::new(true);
        assert!(!latch.mark_audio());
        assert!(latch.mark_video());
    }

    #[test]
    fn test_latch_reset_rearms_both_sides() {
        let mut latch = FinishLatch::new(true);
        latch.mark_video();
        latch.mark_audio();
        latch.reset();
        assert!(!latch.complete());
        assert!(!latch.mark_video());
    }

    #[test]
    fn test_engine_without_audio_reports_no_volume() {
        let engine = VideoEngine::new(SourceBuffer::from_static(&[0u8; 16]));
        assert!(!engine.has_audio());
        assert_eq!(engine.volume(), 0.0);
        engine.set_volume(0.7); // must be a no-op, not a panic
        assert_eq!(engine.volume(), 0.0);
    }

    #[test]
    fn test_failed_initialize_leaves_engine_uninitialized() {
        let mut engine = VideoEngine::new(SourceBuffer::from_static(&[0u8; 32]));
        let events = engine.events();

        assert!(engine.initialize().is_err());
        assert_eq!(engine.state(), EngineState::Uninitialized);
        assert!(events
            .try_iter()
            .any(|event| matches!(event, PlayerEvent::Error(_))));
    }

    #[test]
    fn test_extract_first_frame_rejects_garbage() {
        let garbage = SourceBuffer::from_static(&[0u8; 64]);
        assert!(VideoEngine::extract_first_frame(&garbage).is_err());
    }
}
