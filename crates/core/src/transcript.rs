//! Transcript events delivered by the speech transport

use serde::{Deserialize, Serialize};

/// A single caller utterance as assembled from transcript events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utterance {
    /// Transcribed text
    pub text: String,

    /// Monotonic per-call sequence number, assigned by the engine
    pub seq: u64,

    /// Confidence score (0.0 - 1.0), if the vendor reports one
    pub confidence: Option<f32>,

    /// Offset from stream start in milliseconds
    pub offset_ms: u64,
}

impl Utterance {
    pub fn new(text: impl Into<String>, seq: u64) -> Self {
        Self {
            text: text.into(),
            seq,
            confidence: None,
            offset_ms: 0,
        }
    }

    /// Set confidence
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Set stream offset
    pub fn with_offset(mut self, offset_ms: u64) -> Self {
        self.offset_ms = offset_ms;
        self
    }

    /// Whitespace-delimited word count
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }

    /// Check if the utterance carries no speech
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Transcript event from the speech transport.
///
/// Partials arrive continuously while the caller speaks; a final transcript
/// together with the end-of-utterance signal is the authoritative trigger for
/// a new agent turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TranscriptEvent {
    /// Interim hypothesis, may be revised
    Partial { text: String, offset_ms: u64 },
    /// Stable transcript for the utterance so far
    Final { text: String, offset_ms: u64 },
    /// The caller has stopped speaking
    EndOfUtterance,
    /// DTMF digit pressed
    Dtmf { digit: char },
}

impl TranscriptEvent {
    /// Text carried by this event, if any
    pub fn text(&self) -> Option<&str> {
        match self {
            TranscriptEvent::Partial { text, .. } | TranscriptEvent::Final { text, .. } => {
                Some(text)
            }
            _ => None,
        }
    }

    /// Word count of the carried text (0 for non-text events)
    pub fn word_count(&self) -> usize {
        self.text()
            .map(|t| t.split_whitespace().count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utterance_word_count() {
        let utt = Utterance::new("about 60k a year", 1).with_confidence(0.92);
        assert_eq!(utt.word_count(), 4);
        assert!(!utt.is_empty());
    }

    #[test]
    fn test_event_word_count() {
        let partial = TranscriptEvent::Partial {
            text: "okay".to_string(),
            offset_ms: 100,
        };
        assert_eq!(partial.word_count(), 1);

        let eou = TranscriptEvent::EndOfUtterance;
        assert_eq!(eou.word_count(), 0);
        assert!(eou.text().is_none());
    }
}
