//! Transport traits

use async_trait::async_trait;

use crate::TransportError;

/// One text segment queued for synthesis and playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechSegment {
    /// Sequence of the caller utterance this segment replies to; lets the
    /// transport attribute late completions to a superseded turn.
    pub utterance_seq: u64,
    pub text: String,
}

impl SpeechSegment {
    pub fn new(utterance_seq: u64, text: impl Into<String>) -> Self {
        Self {
            utterance_seq,
            text: text.into(),
        }
    }
}

/// Outbound side of the speech boundary.
///
/// `speak` queues one segment and returns once it is accepted, not once it
/// has played; playback timing is the engine's estimate. `stop_playback`
/// must drop everything queued and playing, immediately.
#[async_trait]
pub trait SpeechTransport: Send + Sync {
    async fn speak(&self, segment: SpeechSegment) -> Result<(), TransportError>;

    /// Stop queued and in-flight audio now. Used on barge-in.
    async fn stop_playback(&self) -> Result<(), TransportError>;

    /// End the call.
    async fn hangup(&self) -> Result<(), TransportError>;

    /// Hand the call to a human destination.
    async fn transfer(&self, destination: &str) -> Result<(), TransportError>;
}
