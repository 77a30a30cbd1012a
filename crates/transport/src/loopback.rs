//! In-process transport double
//!
//! Records everything the engine asks of the transport so tests can assert
//! on spoken segments, barge-in stops and call control.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::traits::{SpeechSegment, SpeechTransport};
use crate::TransportError;

/// Transport that records instead of playing.
#[derive(Default)]
pub struct LoopbackTransport {
    spoken: Mutex<Vec<SpeechSegment>>,
    stops: AtomicUsize,
    hung_up: AtomicBool,
    transfers: Mutex<Vec<String>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Segments spoken so far, in dispatch order
    pub fn spoken(&self) -> Vec<SpeechSegment> {
        self.spoken.lock().clone()
    }

    /// Spoken texts only, for terse assertions
    pub fn spoken_texts(&self) -> Vec<String> {
        self.spoken.lock().iter().map(|s| s.text.clone()).collect()
    }

    /// Number of `stop_playback` calls
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_hung_up(&self) -> bool {
        self.hung_up.load(Ordering::SeqCst)
    }

    pub fn transfers(&self) -> Vec<String> {
        self.transfers.lock().clone()
    }
}

#[async_trait]
impl SpeechTransport for LoopbackTransport {
    async fn speak(&self, segment: SpeechSegment) -> Result<(), TransportError> {
        tracing::trace!(seq = segment.utterance_seq, text = %segment.text, "loopback speak");
        self.spoken.lock().push(segment);
        Ok(())
    }

    async fn stop_playback(&self) -> Result<(), TransportError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn hangup(&self) -> Result<(), TransportError> {
        self.hung_up.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn transfer(&self, destination: &str) -> Result<(), TransportError> {
        self.transfers.lock().push(destination.to_string());
        Ok(())
    }
}
