//! Reply segmentation
//!
//! Long replies are spoken as sentence-sized segments so barge-in can stop
//! between sentences and the first words reach the caller sooner.

/// Minimum characters per segment; shorter sentences merge into the next one
/// so the synthesizer is not fed two-word fragments.
const MIN_SEGMENT_CHARS: usize = 24;

/// Split reply text into speakable segments on sentence boundaries.
pub fn split_segments(text: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();

    for piece in split_sentences(text) {
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(piece);

        if current.len() >= MIN_SEGMENT_CHARS {
            segments.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        segments.push(current);
    }

    segments
}

fn split_sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split_inclusive(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_on_sentences() {
        let segments = split_segments(
            "That works out to five thousand a month. Do you have any other income? \
             Side work counts too.",
        );
        assert_eq!(
            segments,
            vec![
                "That works out to five thousand a month.",
                "Do you have any other income?",
                "Side work counts too.",
            ]
        );
    }

    #[test]
    fn test_merges_short_fragments() {
        let segments = split_segments("Okay. Great. Let me pull up your account details now.");
        assert_eq!(
            segments,
            vec!["Okay. Great. Let me pull up your account details now."]
        );
    }

    #[test]
    fn test_no_terminal_punctuation() {
        let segments = split_segments("just one short line without a period");
        assert_eq!(segments, vec!["just one short line without a period"]);
    }

    #[test]
    fn test_empty() {
        assert!(split_segments("   ").is_empty());
    }
}
