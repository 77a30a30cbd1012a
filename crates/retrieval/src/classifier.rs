//! Small-talk vs factual classification
//!
//! Stage 1 of the router. Pattern-based and allocation-light: it runs on
//! every utterance and must add negligible latency.

use once_cell::sync::Lazy;
use regex::Regex;

/// Greetings, acknowledgements and filler that never need retrieval.
static SMALL_TALK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)^\s*(hi|hii+|hello|hey|good\s+(morning|afternoon|evening)|how\s+are\s+you",
        r"|thanks?|thank\s+you|ok(ay)?|yeah?|yes|no|nope|sure|alright|right|hmm+|uh+|um+",
        r"|bye|goodbye|see\s+you|great|nice|cool|got\s+it|sounds?\s+good)[\s!.,?]*$",
    ))
    .expect("small-talk pattern compiles")
});

/// Interrogative openers that strongly suggest a factual question.
static QUESTION_OPENER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(what|when|where|which|who|why|how|do(es)?|did|can|could|is|are|was|were|will|would|should|tell\s+me|explain)\b")
        .expect("question pattern compiles")
});

/// Classifies utterances as small-talk or potentially factual.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmallTalkClassifier;

impl SmallTalkClassifier {
    pub fn new() -> Self {
        Self
    }

    /// True when the utterance is small-talk and retrieval can be skipped.
    pub fn is_small_talk(&self, utterance: &str) -> bool {
        let trimmed = utterance.trim();
        if trimmed.is_empty() {
            return true;
        }

        if SMALL_TALK.is_match(trimmed) {
            return true;
        }

        // Question-shaped or question-marked utterances are factual.
        if trimmed.contains('?') || QUESTION_OPENER.is_match(trimmed) {
            return false;
        }

        // Very short non-question statements carry no retrievable ask.
        trimmed.split_whitespace().count() <= 3
    }
}
