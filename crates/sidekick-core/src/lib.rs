//! Expansion-port sound cartridge core
//!
//! Turns a single-board computer into a cartridge that answers the C64
//! expansion bus in real time while emulating up to two SID chips
//! (6581/8580) and a YM3812-class FM chip (Sound Expander).
//!
//! The work is split across two execution contexts:
//!
//! - the **interrupt context** runs [`RealtimePath::service`] once per bus
//!   cycle. It answers reads immediately and turns writes into timestamped
//!   [`BusEvent`]s pushed through a lock-free SPSC queue;
//! - the **background loop** ([`Session`]) drains the queue in cycle order,
//!   steps the chips through the [`Engine`], mixes samples and feeds an
//!   [`AudioSink`], while the [`RateController`] keeps the sample rate glued
//!   to the sink's free-running clock.
//!
//! # Crate feature flags
//! - `streaming` (optional): real-time audio output via rodio
//!
//! # Quick start
//! ```no_run
//! use sidekick::{BusControl, BusLines, NullSink, Session, SessionConfig};
//!
//! let config = SessionConfig::default();
//! let (mut session, mut realtime) = Session::with_clock(config, 985_248, Box::new(NullSink))?;
//!
//! // Interrupt context: one call per bus cycle
//! realtime.service(BusLines::write(0xD418, 0x0F, BusControl::SID));
//!
//! // Background loop
//! session.step();
//! # Ok::<(), sidekick::SidekickError>(())
//! ```

#![warn(missing_docs)]

pub mod backend; // Chip backend trait
pub mod bus; // Bus signal decoding
pub mod clock; // Bus clock measurement
pub mod config; // Session configuration snapshot
pub mod counter; // Cycle counter and reset debounce
pub mod detect; // Model auto-detection responders
pub mod engine; // Cycle-accurate chip stepping
pub mod event; // Timestamped register events
pub mod fm; // YM3812 FM chip
pub mod mixer; // Volume/pan mixing
pub mod queue; // SPSC event queue
pub mod rate; // Adaptive sample-rate control
pub mod realtime; // Interrupt-context path
pub mod session; // Session entry point
pub mod sid; // SID 6581/8580 chip
pub mod sink; // Audio sinks

/// Error types for cartridge session operations
///
/// Queue overflow and similar design violations are not represented here:
/// they abort with a panic because no caller can recover from them.
#[derive(thiserror::Error, Debug)]
pub enum SidekickError {
    /// IO error from filesystem or device
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Audio device error
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    /// Invalid or unsupported configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Malformed configuration file
    #[error("Configuration parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for SidekickError {
    /// Converts a String into `SidekickError::Other`.
    ///
    /// Prefer the specific variants (`Config`, `AudioDevice`) where the
    /// failure category is known.
    fn from(msg: String) -> Self {
        SidekickError::Other(msg)
    }
}

impl From<&str> for SidekickError {
    fn from(msg: &str) -> Self {
        SidekickError::Other(msg.to_string())
    }
}

/// Result type for session operations
pub type Result<T> = std::result::Result<T, SidekickError>;

// Public API exports
pub use backend::ChipBackend;
pub use bus::{BusControl, BusLines, BusResponse, BusTransaction, Direction, Region};
pub use config::{AddressMapping, ChannelMix, OutputPath, SessionConfig, SidModel};
pub use counter::{BusClock, ResetDebouncer, ResetMarker};
pub use engine::Engine;
pub use event::{BusEvent, ChipTarget};
pub use fm::Opl2;
pub use mixer::{MixWeights, Mixer, StereoFrame};
pub use queue::{event_queue, EventConsumer, EventProducer};
pub use rate::RateController;
pub use realtime::{ReadBack, RealtimePath};
pub use session::{ExitReason, Session};
pub use sid::Sid;
pub use sink::{AudioSink, NullSink, PeriodicOutput, PeriodicSink};

#[cfg(feature = "streaming")]
pub use sink::StreamingSink;
