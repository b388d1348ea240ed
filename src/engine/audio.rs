//! Audio playback engine: control API plus a dedicated decode thread.

use super::{Command, EngineShared, EngineState, PositionThrottle};
use crate::config::PlayerConfig;
use crate::error::PlayerError;
use crate::events::PlayerEvent;
use crate::session::AudioSession;
use crate::sink::{AudioSink, CpalSink, VolumeHandle};
use crate::source::SourceBuffer;
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use log::{debug, info, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Plays the first audio stream of an in-memory media buffer.
///
/// `initialize` builds the demux/decode session and the playback sink on the
/// caller thread; `start` hands both to a dedicated decode thread that is
/// driven exclusively through control messages. The engine starts paused;
/// the first [`pause`](AudioEngine::pause) toggle begins playback.
pub struct AudioEngine {
    source: SourceBuffer,
    config: PlayerConfig,
    state: EngineState,
    shared: Arc<EngineShared>,
    events_tx: Sender<PlayerEvent>,
    events_rx: Receiver<PlayerEvent>,
    commands_tx: Sender<Command>,
    commands_rx: Option<Receiver<Command>>,
    session: Option<AudioSession>,
    sink: Option<Box<dyn AudioSink>>,
    volume: Option<VolumeHandle>,
    duration: f64,
    thread: Option<JoinHandle<()>>,
}

impl AudioEngine {
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
            sink: None,
            volume: None,
            duration: 0.0,
            thread: None,
        }
    }

    /// Events emitted by the engine. The receiver can be polled or blocked
    /// on from any thread; clones observe the same stream.
    pub fn events(&self) -> Receiver<PlayerEvent> {
        self.events_rx.clone()
    }

    /// Open the session and the playback sink.
    ///
    /// Emits [`PlayerEvent::AudioInfo`] once on success. A failure is also
    /// emitted as [`PlayerEvent::Error`] and leaves the engine uninitialized
    /// with no partial state retained.
    pub fn initialize(&mut self) -> Result<(), PlayerError> {
        if self.state != EngineState::Uninitialized {
            return Ok(());
        }
        let session = match AudioSession::open(self.source.clone(), self.config.output_format) {
            Ok(session) => session,
            Err(err) => return Err(self.fail(err)),
        };
        let sink = match CpalSink::open(self.config.output_format, self.config.sink_buffer_secs) {
            Ok(sink) => Box::new(sink) as Box<dyn AudioSink>,
            Err(err) => return Err(self.fail(PlayerError::DeviceOpenFailed(err.to_string()))),
        };
        self.accept(session, sink);
        Ok(())
    }

    /// `initialize` with a caller-provided sink instead of the default
    /// output device.
    pub(crate) fn initialize_with_sink(
        &mut self,
        sink: Box<dyn AudioSink>,
    ) -> Result<(), PlayerError> {
        if self.state != EngineState::Uninitialized {
            return Ok(());
        }
        let session = match AudioSession::open(self.source.clone(), self.config.output_format) {
            Ok(session) => session,
            Err(err) => return Err(self.fail(err)),
        };
        self.accept(session, sink);
        Ok(())
    }

    /// Spawn the decode thread. Initializes first when needed.
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

        let (session, sink, commands) = match (
            self.session.take(),
            self.sink.take(),
            self.commands_rx.take(),
        ) {
            (Some(session), Some(sink), Some(commands)) => (session, sink, commands),
            _ => {
                warn!("start() called without an initialized session");
                return Ok(());
            }
        };

        let worker = DecodeLoop {
            session,
            sink,
            commands,
            events: self.events_tx.clone(),
            shared: Arc::clone(&self.shared),
            throttle: PositionThrottle::new(&self.config),
            config: self.config.clone(),
            pending: Vec::new(),
            pending_seek: None,
            finished_emitted: false,
        };
        self.thread = Some(thread::spawn(move || worker.run()));
        self.state = EngineState::Running;
        Ok(())
    }

    /// Toggle between playing and paused.
    pub fn pause(&mut self) {
        let _ = self.commands_tx.send(Command::TogglePause);
    }

    pub fn is_paused(&self) -> bool {
        self.shared.is_paused()
    }

    /// Whether playback ran into the end of the stream (cleared by seek or
    /// reset).
    pub fn reached_end(&self) -> bool {
        self.shared.reached_end()
    }

    /// Request a jump to `secs`, clamped to `[0, duration)`.
    pub fn seek(&mut self, secs: f64) {
        let _ = self.commands_tx.send(Command::Seek(self.clamp_target(secs)));
    }

    /// Rewind to the start and clear the end-of-stream latch. The position
    /// reads 0.0 immediately.
    pub fn reset(&mut self) {
        self.shared.set_position(0.0);
        let _ = self.commands_tx.send(Command::Reset);
    }

    /// Stop playback and join the decode thread. No events are emitted
    /// afterwards; `reinitialize` is required before playing again.
    pub fn stop(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = self.commands_tx.send(Command::Stop);
            if handle.join().is_err() {
                warn!("audio decode thread panicked");
            }
            self.state = EngineState::Stopped;
        }
    }

    /// Tear down and rebuild the session and sink after a `stop`.
    pub fn reinitialize(&mut self) -> Result<(), PlayerError> {
        self.teardown();
        self.initialize()
    }

    /// `reinitialize` with a caller-provided sink.
    pub(crate) fn reinitialize_with_sink(
        &mut self,
        sink: Box<dyn AudioSink>,
    ) -> Result<(), PlayerError> {
        self.teardown();
        self.initialize_with_sink(sink)
    }

    fn teardown(&mut self) {
        if self.thread.is_some() {
            self.stop();
        }
        self.session = None;
        self.sink = None;
        self.volume = None;
        self.duration = 0.0;
        let (commands_tx, commands_rx) = unbounded();
        self.commands_tx = commands_tx;
        self.commands_rx = Some(commands_rx);
        self.shared = EngineShared::new();
        self.state = EngineState::Uninitialized;
    }

    /// Volume of the playback sink, 0.0..=1.0. Race-free against the decode
    /// thread: the cell is shared, not routed through it.
    pub fn set_volume(&self, volume: f32) {
        if let Some(cell) = &self.volume {
            cell.set(volume);
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume.as_ref().map(VolumeHandle::get).unwrap_or(0.0)
    }

    /// Playback position in seconds.
    pub fn position(&self) -> f64 {
        self.shared.position()
    }

    /// Stream duration in seconds, 0.0 when unknown.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub(crate) fn volume_handle(&self) -> Option<VolumeHandle> {
        self.volume.clone()
    }

    fn accept(&mut self, session: AudioSession, sink: Box<dyn AudioSink>) {
        self.duration = session.duration();
        let _ = self.events_tx.send(PlayerEvent::AudioInfo {
            sample_rate: session.sample_rate(),
            channels: session.channels(),
            duration: self.duration,
        });
        self.volume = Some(sink.volume());
        self.session = Some(session);
        self.sink = Some(sink);
        self.state = EngineState::Ready;
    }

    fn fail(&mut self, err: PlayerError) -> PlayerError {
        warn!("audio engine initialization failed: {err}");
        let _ = self.events_tx.send(PlayerEvent::Error(err.to_string()));
        self.session = None;
        self.sink = None;
        self.volume = None;
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

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(PartialEq)]
enum Flow {
    Continue,
    Exit,
}

/// The decode thread body. Owns the session and the sink outright; all
/// coordination happens through the command channel and the shared atomics.
struct DecodeLoop {
    session: AudioSession,
    sink: Box<dyn AudioSink>,
    commands: Receiver<Command>,
    events: Sender<PlayerEvent>,
    shared: Arc<EngineShared>,
    throttle: PositionThrottle,
    config: PlayerConfig,
    /// PCM decoded but not yet accepted by the sink.
    pending: Vec<u8>,
    pending_seek: Option<f64>,
    finished_emitted: bool,
}

impl DecodeLoop {
    fn run(mut self) {
        info!("audio decode thread started");

        loop {
            if self.drain_commands() == Flow::Exit {
                break;
            }

            if let Some(target) = self.pending_seek.take() {
                self.do_seek(target);
                continue;
            }

            if self.shared.is_paused() {
                // Nothing to do until the next control message; every
                // command doubles as a wakeup.
                match self.commands.recv() {
                    Ok(command) => {
                        if self.apply(command) == Flow::Exit {
                            break;
                        }
                    }
                    Err(_) => break,
                }
                continue;
            }

            if !self.pending.is_empty() {
                if self.backpressured() {
                    thread::sleep(self.config.backpressure_poll);
                    continue;
                }
                let written = self.sink.write(&self.pending);
                self.pending.drain(..written);
                continue;
            }

            match self.session.next_pcm() {
                Some(chunk) => {
                    if let Some(pts) = chunk.pts {
                        // the clock never runs backwards while playing
                        if pts >= self.shared.position() {
                            self.shared.set_position(pts);
                            if self.throttle.should_emit(pts) {
                                let _ = self.events.send(PlayerEvent::PositionChanged(pts));
                            }
                        }
                    }
                    self.pending = chunk.data;
                }
                None => {
                    if !self.finished_emitted {
                        info!("audio stream reached its end");
                        let _ = self.events.send(PlayerEvent::Finished);
                        self.finished_emitted = true;
                    }
                    // stay alive: a later seek or reset resumes playback
                    self.shared.set_reached_end(true);
                    self.shared.set_paused(true);
                }
            }
        }

        self.sink.stop();
        info!("audio decode thread exited");
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
                debug!("audio engine {}", if paused { "paused" } else { "playing" });
            }
            Command::Seek(target) => self.pending_seek = Some(target),
            Command::Reset => {
                self.pending_seek = Some(0.0);
                self.shared.set_reached_end(false);
                self.finished_emitted = false;
            }
            Command::Stop => return Flow::Exit,
        }
        Flow::Continue
    }

    fn do_seek(&mut self, target: f64) {
        match self.session.seek_to(target) {
            Ok(()) => {
                self.pending.clear();
                self.shared.set_position(target);
                self.shared.set_reached_end(false);
                self.finished_emitted = false;
                self.sink.reset();
                self.throttle.mark(target);
                let _ = self.events.send(PlayerEvent::PositionChanged(target));
            }
            Err(err) => {
                warn!("audio seek failed: {err}");
                let _ = self.events.send(PlayerEvent::Error(err.to_string()));
            }
        }
    }

    fn backpressured(&self) -> bool {
        let floor =
            (self.sink.capacity_bytes() as f64 * self.config.backpressure_free_ratio) as usize;
        self.sink.bytes_free() < floor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::mock::{MockSink, MockSinkState};
    use std::time::{Duration, Instant};

    /// Minimal RIFF/WAV container around a 440 Hz s16 sine.
    fn wav_buffer(secs: f64, sample_rate: u32, channels: u16) -> SourceBuffer {
        let frames = (secs * sample_rate as f64) as usize;
        let data_len = frames * channels as usize * 2;

        let mut wav = Vec::with_capacity(44 + data_len);
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&((36 + data_len) as u32).to_le_bytes());
        wav.extend_from_slice(b"WAVEfmt ");
        wav.extend_from_slice(&16u32.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes());
        wav.extend_from_slice(&channels.to_le_bytes());
        wav.extend_from_slice(&sample_rate.to_le_bytes());
        wav.extend_from_slice(&(sample_rate * channels as u32 * 2).to_le_bytes());
        wav.extend_from_slice(&(channels * 2).to_le_bytes());
        wav.extend_from_slice(&16u16.to_le_bytes());
        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&(data_len as u32).to_le_bytes());
        for i in 0..frames {
            let phase = i as f64 * 440.0 * std::f64::consts::TAU / sample_rate as f64;
            let sample = (phase.sin() * 8000.0) as i16;
            for _ in 0..channels {
                wav.extend_from_slice(&sample.to_le_bytes());
            }
        }
        SourceBuffer::from(wav)
    }

    fn engine_with_mock(
        secs: f64,
    ) -> (
        AudioEngine,
        Receiver<PlayerEvent>,
        std::sync::Arc<MockSinkState>,
    ) {
        let (sink, state) = MockSink::new(64 << 20, 64 << 20);
        let mut engine = AudioEngine::new(wav_buffer(secs, 8000, 1));
        let events = engine.events();
        engine.initialize_with_sink(Box::new(sink)).unwrap();
        (engine, events, state)
    }

    fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    /// Drain events until Finished or timeout; returns positions seen and
    /// how many Finished events arrived.
    fn collect_until_finished(
        events: &Receiver<PlayerEvent>,
        timeout: Duration,
    ) -> (Vec<f64>, usize) {
        let deadline = Instant::now() + timeout;
        let mut positions = Vec::new();
        let mut finished = 0;
        while Instant::now() < deadline {
            match events.recv_timeout(Duration::from_millis(50)) {
                Ok(PlayerEvent::PositionChanged(position)) => positions.push(position),
                Ok(PlayerEvent::Finished) => {
                    finished += 1;
                    break;
                }
                Ok(_) => {}
                Err(_) => {}
            }
        }
        (positions, finished)
    }

    #[test]
    fn test_initialize_emits_info_once() {
        let (mut engine, events, _) = engine_with_mock(10.0);

        let infos: Vec<_> = events
            .try_iter()
            .filter(|event| matches!(event, PlayerEvent::AudioInfo { .. }))
            .collect();
        assert_eq!(infos.len(), 1);
        if let PlayerEvent::AudioInfo {
            sample_rate,
            channels,
            duration,
        } = &infos[0]
        {
            assert_eq!(*sample_rate, 8000);
            assert_eq!(*channels, 1);
            assert!((duration - 10.0).abs() < 0.2, "duration {duration}");
        }

        // a second initialize is a no-op
        let (sink, _) = MockSink::new(1024, 1024);
        engine.initialize_with_sink(Box::new(sink)).unwrap();
        assert!(events.try_iter().count() == 0);
        assert_eq!(engine.state(), EngineState::Ready);
    }

    #[test]
    fn test_failed_initialize_leaves_engine_uninitialized() {
        let mut engine = AudioEngine::new(SourceBuffer::from_static(&[0u8; 32]));
        let events = engine.events();
        let (sink, _) = MockSink::new(1024, 1024);

        assert!(engine.initialize_with_sink(Box::new(sink)).is_err());
        assert_eq!(engine.state(), EngineState::Uninitialized);
        assert!(events
            .try_iter()
            .any(|event| matches!(event, PlayerEvent::Error(_))));
    }

    #[test]
    fn test_pause_toggle_is_idempotent_in_pairs() {
        let (mut engine, _events, _) = engine_with_mock(5.0);
        engine.start().unwrap();
        assert!(engine.is_paused());

        // double toggle lands back where it started
        engine.pause();
        engine.pause();
        thread::sleep(Duration::from_millis(200));
        assert!(engine.is_paused());

        engine.pause();
        assert!(wait_until(|| !engine.is_paused(), Duration::from_secs(2)));
        engine.stop();
    }

    #[test]
    fn test_playback_reports_monotonic_positions_then_finishes() {
        let (mut engine, events, _) = engine_with_mock(2.0);
        engine.start().unwrap();
        engine.pause(); // begin playback

        let (positions, finished) = collect_until_finished(&events, Duration::from_secs(10));
        assert_eq!(finished, 1);
        assert!(!positions.is_empty());
        assert!(
            positions.windows(2).all(|pair| pair[0] <= pair[1]),
            "positions not monotonic: {positions:?}"
        );

        // end of stream pauses but keeps the engine alive
        assert!(wait_until(|| engine.is_paused(), Duration::from_secs(2)));
        assert!(engine.reached_end());
        engine.stop();
    }

    #[test]
    fn test_seek_resumes_near_target() {
        let (mut engine, events, _) = engine_with_mock(10.0);
        engine.start().unwrap();
        engine.pause();

        let (_, finished) = collect_until_finished(&events, Duration::from_secs(20));
        assert_eq!(finished, 1);

        engine.seek(5.0);
        // the seek itself reports the clamped target
        assert!(wait_until(
            || (engine.position() - 5.0).abs() < 0.26,
            Duration::from_secs(2)
        ));

        engine.pause(); // resume after the end-of-stream pause
        let (positions, finished) = collect_until_finished(&events, Duration::from_secs(20));
        assert_eq!(finished, 1, "a second Finished must fire after the seek");
        assert!(positions.iter().all(|&p| p >= 4.7), "positions {positions:?}");
        assert!(positions.windows(2).all(|pair| pair[0] <= pair[1]));
        engine.stop();
    }

    #[test]
    fn test_reset_reads_zero_immediately() {
        let (mut engine, _events, _) = engine_with_mock(5.0);
        engine.start().unwrap();
        engine.pause();

        assert!(wait_until(|| engine.position() > 0.5, Duration::from_secs(5)));
        engine.pause(); // hold the decode thread on the command channel
        assert!(wait_until(|| engine.is_paused(), Duration::from_secs(2)));

        engine.reset();
        assert_eq!(engine.position(), 0.0);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(engine.position(), 0.0);
        engine.stop();
    }

    #[test]
    fn test_backpressure_defers_writes_until_space_frees() {
        let (sink, state) = MockSink::new(10_000, 0);
        let mut engine = AudioEngine::new(wav_buffer(1.0, 8000, 1));
        engine.initialize_with_sink(Box::new(sink)).unwrap();
        engine.start().unwrap();
        engine.pause();

        // zero free bytes: the decode thread must not touch write()
        thread::sleep(Duration::from_millis(150));
        assert_eq!(state.write_calls(), 0);

        state.set_free(10_000);
        assert!(wait_until(|| state.write_calls() > 0, Duration::from_secs(2)));

        // stop must land promptly even while the sink is starved again
        let begun = Instant::now();
        engine.stop();
        assert!(begun.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_stop_joins_and_silences_events() {
        let (mut engine, events, _) = engine_with_mock(5.0);
        engine.start().unwrap();
        engine.pause();
        assert!(wait_until(|| engine.position() > 0.0, Duration::from_secs(5)));

        engine.stop();
        assert_eq!(engine.state(), EngineState::Stopped);

        while events.try_recv().is_ok() {}
        thread::sleep(Duration::from_millis(100));
        assert!(events.try_recv().is_err(), "events after stop()");
    }

    #[test]
    fn test_reinitialize_recovers_after_stop() {
        let (mut engine, events, _) = engine_with_mock(2.0);
        engine.start().unwrap();
        engine.stop();
        while events.try_recv().is_ok() {}

        let (sink, _) = MockSink::new(64 << 20, 64 << 20);
        engine.reinitialize_with_sink(Box::new(sink)).unwrap();
        assert_eq!(engine.state(), EngineState::Ready);
        assert!(events
            .try_iter()
            .any(|event| matches!(event, PlayerEvent::AudioInfo { .. })));

        engine.start().unwrap();
        engine.pause();
        let (_, finished) = collect_until_finished(&events, Duration::from_secs(10));
        assert_eq!(finished, 1);
        engine.stop();
    }

    #[test]
    fn test_volume_is_clamped_and_shared() {
        let (engine, _events, _) = engine_with_mock(1.0);
        engine.set_volume(0.5);
        assert_eq!(engine.volume(), 0.5);
        engine.set_volume(2.0);
        assert_eq!(engine.volume(), 1.0);
        engine.set_volume(-1.0);
        assert_eq!(engine.volume(), 0.0);
    }
}
