//! Playback time estimation
//!
//! The transport reports when a segment was accepted, not when it finished
//! playing, so the engine keeps its own estimate of when the speaker line
//! goes quiet. The estimate only ever moves forward while segments queue;
//! a later segment can never shrink it.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Expected end of agent playback.
pub struct PlaybackClock {
    expected_end: Mutex<Instant>,
    speech_rate_wpm: u32,
    safety_margin: Duration,
}

impl PlaybackClock {
    pub fn new(speech_rate_wpm: u32, safety_margin: Duration) -> Self {
        Self {
            expected_end: Mutex::new(Instant::now()),
            speech_rate_wpm,
            safety_margin,
        }
    }

    /// Estimated playback duration of one text segment.
    pub fn estimate(&self, text: &str) -> Duration {
        let words = text.split_whitespace().count().max(1) as u64;
        Duration::from_millis(words * 60_000 / u64::from(self.speech_rate_wpm))
    }

    /// Account for a queued segment. Extend-only:
    /// `end = max(end, now) + estimate + margin`.
    pub fn note_segment(&self, text: &str) -> Instant {
        let duration = self.estimate(text) + self.safety_margin;
        let mut end = self.expected_end.lock();
        let base = (*end).max(Instant::now());
        *end = base + duration;
        *end
    }

    pub fn expected_end(&self) -> Instant {
        *self.expected_end.lock()
    }

    /// True while queued audio is still expected to be playing
    pub fn is_speaking(&self) -> bool {
        Instant::now() < *self.expected_end.lock()
    }

    /// Barge-in: unplayed audio was dropped, the line is quiet now.
    pub fn stop(&self) {
        *self.expected_end.lock() = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_scales_with_words() {
        let clock = PlaybackClock::new(150, Duration::ZERO);
        // 150 wpm: 400ms per word
        assert_eq!(clock.estimate("one two three"), Duration::from_millis(1200));
    }

    #[test]
    fn test_segments_accumulate() {
        let clock = PlaybackClock::new(150, Duration::from_millis(250));
        let first = clock.note_segment("one two three");
        let second = clock.note_segment("four five six");

        assert!(second > first);
        assert!(clock.is_speaking());
        // Second segment queues after the first, not in parallel with it.
        assert!(second.duration_since(first) >= Duration::from_millis(1200));
    }

    #[test]
    fn test_end_never_moves_backward() {
        let clock = PlaybackClock::new(150, Duration::ZERO);
        let long = clock.note_segment("a reply with quite a few words in it to play");
        let after_short = clock.note_segment("ok");
        assert!(after_short > long);
    }

    #[test]
    fn test_stop_silences() {
        let clock = PlaybackClock::new(150, Duration::ZERO);
        clock.note_segment("a fairly long sentence to speak aloud");
        assert!(clock.is_speaking());
        clock.stop();
        assert!(!clock.is_speaking());
    }
}
