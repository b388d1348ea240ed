//! In-memory media decode and playback engine.
//!
//! `memplay` turns a fully buffered compressed audio or video byte buffer
//! into real-time, controllable playback. Callers construct an engine over a
//! [`SourceBuffer`], drive it through the control API (play/pause, seek,
//! stop, volume) and consume the asynchronous [`PlayerEvent`] stream for
//! decoded frames, position updates and end-of-stream notifications.
//!
//! Each engine runs one dedicated decode thread; a [`VideoEngine`] whose
//! source also carries an audio stream embeds its own [`AudioEngine`] and
//! paces video frames against the audio clock via the [`Synchronizer`].
//!
//! ```no_run
//! use memplay::{AudioEngine, PlayerEvent};
//!
//! let data = std::fs::read("clip.ogg").unwrap();
//! let mut engine = AudioEngine::new(data.into());
//! let events = engine.events();
//!
//! engine.initialize().unwrap();
//! engine.start().unwrap();
//! engine.pause(); // engines start paused; the first toggle begins playback
//!
//! while let Ok(event) = events.recv() {
//!     if let PlayerEvent::Finished = event {
//!         break;
//!     }
//! }
//! engine.stop();
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod session;
pub mod sink;
pub mod source;

pub use config::PlayerConfig;
pub use engine::audio::AudioEngine;
pub use engine::sync::{SyncConfig, SyncDecision, Synchronizer};
pub use engine::video::VideoEngine;
pub use engine::EngineState;
pub use error::PlayerError;
pub use events::PlayerEvent;
pub use session::{MediaKind, VideoFrame};
pub use sink::PcmFormat;
pub use source::{ByteSource, SourceBuffer};
