//! Transition condition evaluation
//!
//! Flow transitions carry natural-language conditions ("caller agreed to the
//! offer", "caller asked about pricing"). Judging them is an abstracted
//! capability so the LLM-backed judge can be swapped for a deterministic
//! matcher in tests.

use async_trait::async_trait;
use std::sync::Arc;

use crate::model::{ChatRequest, LanguageModel};
use crate::prompt::{Message, PromptBuilder};
use crate::LlmError;

/// Judges which (if any) of an ordered list of natural-language conditions is
/// satisfied by the latest exchange. Returns the index of the first satisfied
/// condition, or `None` to stay on the current node.
#[async_trait]
pub trait ConditionEvaluator: Send + Sync {
    async fn pick(
        &self,
        node_goal: &str,
        conditions: &[String],
        exchange: &str,
    ) -> Result<Option<usize>, LlmError>;
}

/// LLM-backed condition evaluator.
pub struct LlmConditionEvaluator {
    model: Arc<dyn LanguageModel>,
}

impl LlmConditionEvaluator {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    fn build_request(node_goal: &str, conditions: &[String], exchange: &str) -> ChatRequest {
        let mut listing = String::new();
        for (i, condition) in conditions.iter().enumerate() {
            listing.push_str(&format!("{}. {}\n", i + 1, condition));
        }

        let instruction = format!(
            "The agent's current goal: {goal}\n\
             Recent exchange:\n{exchange}\n\
             Candidate conditions, in priority order:\n{listing}\
             Answer with the number of the FIRST condition satisfied by the \
             exchange, or the word NONE if none apply. Answer with the number \
             or NONE only.",
            goal = node_goal,
            exchange = exchange,
            listing = listing,
        );

        let messages = PromptBuilder::new()
            .message(Message::system(
                "You judge whether conversation conditions are met. \
                 You answer with a single number or NONE.",
            ))
            .instruction(instruction)
            .build();

        ChatRequest::new(messages).with_temperature(0.0).with_max_tokens(8)
    }

    fn parse_answer(answer: &str, condition_count: usize) -> Result<Option<usize>, LlmError> {
        let trimmed = answer.trim();
        if trimmed.eq_ignore_ascii_case("none") {
            return Ok(None);
        }

        let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
        let n: usize = digits
            .parse()
            .map_err(|_| LlmError::BadResponse(format!("condition answer: {trimmed:?}")))?;

        if n == 0 || n > condition_count {
            return Err(LlmError::BadResponse(format!(
                "condition index {n} out of range 1..={condition_count}"
            )));
        }

        Ok(Some(n - 1))
    }
}

#[async_trait]
impl ConditionEvaluator for LlmConditionEvaluator {
    async fn pick(
        &self,
        node_goal: &str,
        conditions: &[String],
        exchange: &str,
    ) -> Result<Option<usize>, LlmError> {
        if conditions.is_empty() {
            return Ok(None);
        }

        let request = Self::build_request(node_goal, conditions, exchange);
        let answer = self.model.complete(request).await?;
        Self::parse_answer(&answer, conditions.len())
    }
}

/// Deterministic keyword matcher.
///
/// A condition is satisfied when all of its content words (longer than three
/// characters, minus framing words like "caller" or "mentions") appear in the
/// exchange, case-insensitively. First match in list order wins. Intended for
/// tests and offline flows.
pub struct KeywordConditionEvaluator;

/// Framing vocabulary that appears in almost every authored condition and
/// carries no matching signal.
const FRAMING_WORDS: &[&str] = &[
    "caller", "customer", "user", "agent", "mentions", "mention", "mentioned", "says", "said",
    "asks", "asked", "asking", "wants", "want", "gives", "gave", "provides", "provided", "about",
    "their", "that", "this", "with", "have",
];

impl KeywordConditionEvaluator {
    pub fn new() -> Self {
        Self
    }

    fn matches(condition: &str, exchange: &str) -> bool {
        let haystack = exchange.to_lowercase();
        let content_words: Vec<String> = condition
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 3)
            .map(|w| w.to_lowercase())
            .filter(|w| !FRAMING_WORDS.contains(&w.as_str()))
            .collect();

        if content_words.is_empty() {
            return false;
        }

        content_words.iter().all(|word| haystack.contains(word))
    }
}

impl Default for KeywordConditionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConditionEvaluator for KeywordConditionEvaluator {
    async fn pick(
        &self,
        _node_goal: &str,
        conditions: &[String],
        exchange: &str,
    ) -> Result<Option<usize>, LlmError> {
        Ok(conditions
            .iter()
            .position(|condition| Self::matches(condition, exchange)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScriptedModel;

    #[tokio::test]
    async fn test_llm_evaluator_picks_first() {
        let model = Arc::new(ScriptedModel::always("2"));
        let evaluator = LlmConditionEvaluator::new(model);

        let conditions = vec![
            "caller declined".to_string(),
            "caller agreed".to_string(),
        ];
        let picked = evaluator
            .pick("close the sale", &conditions, "caller: yes let's do it")
            .await
            .unwrap();
        assert_eq!(picked, Some(1));
    }

    #[tokio::test]
    async fn test_llm_evaluator_none() {
        let model = Arc::new(ScriptedModel::always("NONE"));
        let evaluator = LlmConditionEvaluator::new(model);

        let conditions = vec!["caller agreed".to_string()];
        let picked = evaluator
            .pick("goal", &conditions, "caller: hmm")
            .await
            .unwrap();
        assert_eq!(picked, None);
    }

    #[tokio::test]
    async fn test_llm_evaluator_out_of_range() {
        let model = Arc::new(ScriptedModel::always("7"));
        let evaluator = LlmConditionEvaluator::new(model);

        let conditions = vec!["caller agreed".to_string()];
        let result = evaluator.pick("goal", &conditions, "yes").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_keyword_evaluator() {
        let evaluator = KeywordConditionEvaluator::new();
        let conditions = vec![
            "caller mentions income".to_string(),
            "caller mentions schedule".to_string(),
        ];

        let picked = evaluator
            .pick("", &conditions, "caller: my income is about 60k")
            .await
            .unwrap();
        assert_eq!(picked, Some(0));

        let picked = evaluator
            .pick("", &conditions, "caller: nothing relevant")
            .await
            .unwrap();
        assert_eq!(picked, None);
    }
}
