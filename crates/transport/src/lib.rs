//! Speech transport boundary
//!
//! The engine never touches audio. It hands text segments to a
//! [`SpeechTransport`] for synthesis and playback, and receives transcript
//! events from the recognizer over a channel. Telephony, codecs and the
//! speech models all live on the far side of this trait.

pub mod loopback;
pub mod segment;
pub mod traits;

pub use loopback::LoopbackTransport;
pub use segment::split_segments;
pub use traits::{SpeechSegment, SpeechTransport};

use thiserror::Error;

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    #[error("Playback control failed: {0}")]
    Playback(String),

    #[error("Call control failed: {0}")]
    CallControl(String),

    #[error("Transport disconnected")]
    Disconnected,
}
