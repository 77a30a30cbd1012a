//! The extraction engine

use std::collections::HashMap;
use std::sync::Arc;

use callflow_core::{ConversationHistory, VarValue};
use callflow_llm::{extract_json_object, ChatRequest, LanguageModel, Message, PromptBuilder};

use crate::spec::VariableSpec;
use crate::ExtractError;

/// Result of one extraction pass.
#[derive(Debug, Clone, Default)]
pub struct ExtractionOutcome {
    /// Extracted values (including derived variables), keyed by name
    pub values: HashMap<String, VarValue>,

    /// Spoken re-prompt for the first unsatisfied mandatory spec, if any
    pub reprompt: Option<String>,
}

impl ExtractionOutcome {
    /// True when every mandatory spec produced a value
    pub fn mandatory_satisfied(&self) -> bool {
        self.reprompt.is_none()
    }
}

/// Variable extraction engine.
///
/// Asks the language model to pull the requested values out of the recent
/// history window, as a JSON object keyed by variable name with `null` for
/// anything not stated.
pub struct VariableExtractor {
    model: Arc<dyn LanguageModel>,
    /// History entries included in the extraction prompt
    history_window: usize,
}

impl VariableExtractor {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            history_window: 6,
        }
    }

    pub fn from_settings(
        model: Arc<dyn LanguageModel>,
        settings: &callflow_config::ExtractionSettings,
    ) -> Self {
        Self::new(model).with_history_window(settings.history_window)
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    /// Extract values for `specs` from the recent history.
    ///
    /// Failures for non-mandatory specs are silent: the value simply stays
    /// absent. A mandatory spec without a value yields its re-prompt.
    pub async fn extract(
        &self,
        specs: &[VariableSpec],
        history: &ConversationHistory,
    ) -> Result<ExtractionOutcome, ExtractError> {
        if specs.is_empty() {
            return Ok(ExtractionOutcome::default());
        }

        let request = self.build_request(specs, history);
        let response = self.model.complete(request).await?;

        let object = extract_json_object(&response)
            .ok_or_else(|| ExtractError::BadResponse(response.clone()))?;

        let mut values = HashMap::new();
        for spec in specs {
            let extracted = object.get(&spec.name).and_then(VarValue::from_json);

            let Some(value) = extracted else {
                tracing::debug!(variable = %spec.name, "extraction produced no value");
                continue;
            };

            // Declared derivations, computed from the numeric view
            if !spec.derive.is_empty() {
                if let Some(number) = value.as_number() {
                    for derived in &spec.derive {
                        values.insert(
                            derived.name.clone(),
                            VarValue::Number(derived.compute(number)),
                        );
                    }
                } else {
                    tracing::warn!(
                        variable = %spec.name,
                        "derivations declared but extracted value is not numeric"
                    );
                }
            }

            values.insert(spec.name.clone(), value);
        }

        let reprompt = specs
            .iter()
            .find(|spec| spec.mandatory && !values.contains_key(&spec.name))
            .map(|spec| spec.reprompt_text());

        Ok(ExtractionOutcome { values, reprompt })
    }

    fn build_request(&self, specs: &[VariableSpec], history: &ConversationHistory) -> ChatRequest {
        let mut listing = String::new();
        for spec in specs {
            listing.push_str(&format!("- \"{}\": {}\n", spec.name, spec.instruction));
        }

        let instruction = format!(
            "Conversation so far:\n{history}\n\
             Extract the following values from what the caller said. The \
             information may appear in an earlier turn and only be confirmed \
             in the latest one.\n{listing}\
             Respond with a single JSON object keyed by variable name. Use \
             null for anything the caller has not stated. Numbers must be \
             plain numerals (\"60k a year\" becomes 60000).",
            history = history.render_recent(self.history_window),
            listing = listing,
        );

        let messages = PromptBuilder::new()
            .message(Message::system(
                "You extract structured values from phone conversations. \
                 You respond with JSON only and never invent values.",
            ))
            .instruction(instruction)
            .build();

        ChatRequest::new(messages).with_temperature(0.0)
    }
}
