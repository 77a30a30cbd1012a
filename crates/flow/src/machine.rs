//! The per-turn state machine
//!
//! [`FlowMachine::advance`] consumes one caller turn and produces what to
//! speak, which node the session rests on afterwards, and any side effects.
//! The hard ordering rule: a node's variable extraction runs to completion
//! BEFORE its transition conditions are judged, so the turn that satisfies
//! a mandatory variable is the same turn that moves the flow forward.
//!
//! The machine receives history that does not yet include the turn being
//! processed; the engine appends both sides after the turn resolves.

use std::collections::HashMap;
use std::sync::Arc;

use callflow_core::{template, ConversationHistory, HistoryEntry, VarValue};
use callflow_extract::{VariableExtractor, VariableSpec};
use callflow_llm::{
    ChatRequest, ConditionEvaluator, LanguageModel, LlmError, Message, PromptBuilder,
};
use callflow_retrieval::{grounding_instruction, KnowledgeRouter};
use callflow_tools::{FunctionRunner, WebhookOutcome};

use crate::graph::FlowGraph;
use crate::node::{MessageChannel, Node, NodeKind};
use crate::{logic, validate, FlowError};

/// Pass-through chains longer than this indicate an authoring loop.
const MAX_HOPS: usize = 8;

/// Spoken when the model fails twice in a row. Keeps the line alive; the
/// caller's next utterance retries the whole turn naturally.
const RECOVERY_REPLY: &str = "I'm sorry, could you say that again?";

/// What the caller did this turn.
#[derive(Debug, Clone, Copy)]
pub enum TurnInput<'a> {
    /// A finalized transcript
    Utterance(&'a str),
    /// A DTMF key press
    Digit(char),
}

/// Terminal disposition of the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalAction {
    EndCall,
    Transfer { destination: String },
}

/// Non-spoken side effect produced during a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    Message {
        channel: MessageChannel,
        body: String,
    },
}

/// Result of one turn.
#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    /// Node the session rests on after the turn
    pub node_id: String,
    /// Utterances to speak, in order
    pub speak: Vec<String>,
    pub side_effects: Vec<SideEffect>,
    /// Set when the flow reached a terminal node
    pub terminal: Option<TerminalAction>,
}

impl TurnOutcome {
    fn at(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Default::default()
        }
    }
}

/// Advances a flow graph one caller turn at a time.
pub struct FlowMachine {
    graph: Arc<FlowGraph>,
    model: Arc<dyn LanguageModel>,
    conditions: Arc<dyn ConditionEvaluator>,
    extractor: VariableExtractor,
    runner: Arc<dyn FunctionRunner>,
    knowledge: Option<Arc<KnowledgeRouter>>,
    history_window: usize,
}

impl FlowMachine {
    pub fn new(
        graph: Arc<FlowGraph>,
        model: Arc<dyn LanguageModel>,
        conditions: Arc<dyn ConditionEvaluator>,
        runner: Arc<dyn FunctionRunner>,
    ) -> Self {
        Self {
            extractor: VariableExtractor::new(model.clone()),
            graph,
            model,
            conditions,
            runner,
            knowledge: None,
            history_window: 12,
        }
    }

    pub fn with_knowledge(mut self, knowledge: Arc<KnowledgeRouter>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self.extractor = VariableExtractor::new(self.model.clone()).with_history_window(window);
        self
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    /// Start of call: enter the start node and produce the opening turn.
    pub async fn open(
        &self,
        variables: &mut HashMap<String, VarValue>,
        history: &ConversationHistory,
    ) -> Result<TurnOutcome, FlowError> {
        let mut outcome = TurnOutcome::at(self.graph.start.clone());
        self.enter_chain(self.graph.start.clone(), variables, history, &mut outcome)
            .await?;
        Ok(outcome)
    }

    /// Consume one caller turn at `node_id`.
    pub async fn advance(
        &self,
        node_id: &str,
        input: TurnInput<'_>,
        variables: &mut HashMap<String, VarValue>,
        history: &ConversationHistory,
    ) -> Result<TurnOutcome, FlowError> {
        let node = self.graph.node(node_id)?;

        if node.kind.is_terminal() {
            // The engine should have hung up already; nothing to do.
            let mut outcome = TurnOutcome::at(node_id);
            outcome.terminal = Some(Self::terminal_action(&node.kind));
            return Ok(outcome);
        }

        match input {
            TurnInput::Digit(digit) => self.handle_digit(node_id, node, digit, variables, history).await,
            TurnInput::Utterance(text) => {
                self.handle_utterance(node_id, node, text, variables, history)
                    .await
            }
        }
    }

    async fn handle_digit(
        &self,
        node_id: &str,
        node: &Node,
        digit: char,
        variables: &mut HashMap<String, VarValue>,
        history: &ConversationHistory,
    ) -> Result<TurnOutcome, FlowError> {
        let NodeKind::PressDigit {
            prompt,
            mappings,
            invalid_reprompt,
        } = &node.kind
        else {
            // Stray key press outside a menu: ignore it.
            tracing::debug!(node = %node_id, digit = %digit, "DTMF outside a menu ignored");
            return Ok(TurnOutcome::at(node_id));
        };

        match mappings.get(&digit.to_string()) {
            Some(target) => {
                let mut outcome = TurnOutcome::at(node_id);
                self.enter_chain(target.clone(), variables, history, &mut outcome)
                    .await?;
                Ok(outcome)
            }
            None => {
                let mut outcome = TurnOutcome::at(node_id);
                let reprompt = invalid_reprompt
                    .clone()
                    .unwrap_or_else(|| format!("Sorry, that's not one of the options. {prompt}"));
                outcome.speak.push(template::render(&reprompt, variables));
                Ok(outcome)
            }
        }
    }

    async fn handle_utterance(
        &self,
        node_id: &str,
        node: &Node,
        text: &str,
        variables: &mut HashMap<String, VarValue>,
        history: &ConversationHistory,
    ) -> Result<TurnOutcome, FlowError> {
        // The utterance being processed is not in the session history yet;
        // extraction and condition judging need it in view.
        let mut turn_history = history.clone();
        turn_history.push(HistoryEntry::caller(text));

        // Step 1: the node's own work. Mandatory extraction gates the
        // transition evaluation below.
        match &node.kind {
            NodeKind::Conversation { extract, .. } => {
                if let Some(reprompt) = self
                    .run_extraction(extract, variables, &turn_history)
                    .await?
                {
                    let mut outcome = TurnOutcome::at(node_id);
                    outcome.speak.push(template::render(&reprompt, variables));
                    return Ok(outcome);
                }
            }

            NodeKind::ExtractVariable { spec, .. } => {
                let specs = std::slice::from_ref(spec);
                if let Some(reprompt) = self
                    .run_extraction(specs, variables, &turn_history)
                    .await?
                {
                    let mut outcome = TurnOutcome::at(node_id);
                    outcome.speak.push(template::render(&reprompt, variables));
                    return Ok(outcome);
                }
            }

            NodeKind::CollectInput {
                variable,
                input_type,
                reprompt,
                ..
            } => match validate::validate(*input_type, text) {
                Some(value) => {
                    variables.insert(variable.clone(), value);
                }
                None => {
                    let mut outcome = TurnOutcome::at(node_id);
                    let reprompt = reprompt
                        .clone()
                        .unwrap_or_else(|| validate::default_reprompt(*input_type).to_string());
                    outcome.speak.push(template::render(&reprompt, variables));
                    return Ok(outcome);
                }
            },

            NodeKind::PressDigit { prompt, .. } => {
                // Spoken reply while a menu waits for a key: repeat the menu.
                let mut outcome = TurnOutcome::at(node_id);
                outcome.speak.push(template::render(prompt, variables));
                return Ok(outcome);
            }

            _ => {}
        }

        // Step 2: judge transitions against the exchange including this turn.
        let exchange = turn_history.render_recent(self.history_window);
        let picked = if node.transitions.is_empty() {
            None
        } else {
            let conditions: Vec<String> = node
                .transitions
                .iter()
                .map(|t| t.condition.clone())
                .collect();
            self.judge_transition(node.kind.goal(), &conditions, &exchange)
                .await
        };

        let target = picked
            .map(|i| node.transitions[i].target.clone())
            .or_else(|| node.next.clone());

        // Step 3: move, or hold the node and keep the conversation going.
        if let Some(target) = target {
            let mut outcome = TurnOutcome::at(node_id);
            self.enter_chain(target, variables, &turn_history, &mut outcome)
                .await?;
            return Ok(outcome);
        }

        let mut outcome = TurnOutcome::at(node_id);
        if let NodeKind::Conversation {
            goal,
            use_knowledge,
            ..
        } = &node.kind
        {
            let reply = self
                .conversational_reply(goal, *use_knowledge, text, variables, history)
                .await;
            outcome.speak.push(reply);
        }
        Ok(outcome)
    }

    /// One model call with a single retry. Transient backend failures and
    /// malformed responses are the common case; a second failure falls to
    /// the caller's spoken recovery path.
    async fn generate(&self, request: ChatRequest) -> Result<String, LlmError> {
        match self.model.complete(request.clone()).await {
            Ok(reply) => Ok(reply),
            Err(err) => {
                tracing::warn!(error = %err, "model call failed; retrying once");
                self.model.complete(request).await
            }
        }
    }

    /// Judge transitions, retrying once. A judge that fails twice holds the
    /// node rather than ending the call.
    async fn judge_transition(
        &self,
        goal: &str,
        conditions: &[String],
        exchange: &str,
    ) -> Option<usize> {
        match self.conditions.pick(goal, conditions, exchange).await {
            Ok(picked) => picked,
            Err(err) => {
                tracing::warn!(error = %err, "condition judge failed; retrying once");
                match self.conditions.pick(goal, conditions, exchange).await {
                    Ok(picked) => picked,
                    Err(err) => {
                        tracing::warn!(error = %err, "condition judge failed twice; holding the node");
                        None
                    }
                }
            }
        }
    }

    /// Run extraction for the node's pending specs. Returns the re-prompt
    /// when a mandatory variable stays unsatisfied.
    async fn run_extraction(
        &self,
        specs: &[VariableSpec],
        variables: &mut HashMap<String, VarValue>,
        history: &ConversationHistory,
    ) -> Result<Option<String>, FlowError> {
        // Updatable values are cleared up front: a re-extraction that finds
        // nothing must leave the variable absent, not keep the stale value.
        for spec in specs {
            if spec.allow_update {
                variables.remove(&spec.name);
            }
        }

        let pending: Vec<VariableSpec> = specs
            .iter()
            .filter(|spec| !variables.contains_key(&spec.name))
            .cloned()
            .collect();

        if pending.is_empty() {
            return Ok(None);
        }

        let outcome = match self.extractor.extract(&pending, history).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(error = %err, "extraction failed; retrying once");
                match self.extractor.extract(&pending, history).await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        tracing::warn!(error = %err, "extraction failed twice; holding the node");
                        // A missing mandatory value re-prompts; optional
                        // values just stay absent this turn.
                        return Ok(pending
                            .iter()
                            .find(|spec| spec.mandatory)
                            .map(|spec| spec.reprompt_text()));
                    }
                }
            }
        };

        for (name, value) in outcome.values {
            tracing::debug!(variable = %name, value = %value.render(), "variable extracted");
            variables.insert(name, value);
        }

        Ok(outcome.reprompt)
    }

    /// Enter `target` and resolve pass-through nodes until the flow rests on
    /// a node that waits for the caller, or terminates.
    async fn enter_chain(
        &self,
        target: String,
        variables: &mut HashMap<String, VarValue>,
        history: &ConversationHistory,
        outcome: &mut TurnOutcome,
    ) -> Result<(), FlowError> {
        let mut current = target;

        for _ in 0..MAX_HOPS {
            let node = self.graph.node(&current)?;
            outcome.node_id = current.clone();

            match &node.kind {
                NodeKind::Conversation { goal, script, .. } => {
                    let line = match script {
                        Some(script) => template::render(script, variables),
                        None => self.opening_line(goal, variables, history).await,
                    };
                    outcome.speak.push(line);
                    return Ok(());
                }

                NodeKind::CollectInput { prompt, .. }
                | NodeKind::ExtractVariable { prompt, .. }
                | NodeKind::PressDigit { prompt, .. } => {
                    outcome.speak.push(template::render(prompt, variables));
                    return Ok(());
                }

                NodeKind::LogicSplit {
                    branches,
                    otherwise,
                } => {
                    let next = logic::first_match(branches, variables)
                        .map(|b| b.target.clone())
                        .or_else(|| otherwise.clone())
                        .ok_or_else(|| FlowError::NoBranchMatched(current.clone()))?;
                    current = next;
                }

                NodeKind::FunctionCall { call, on_error } => {
                    if let Some(filler) = &call.speak_before_call {
                        outcome.speak.push(template::render(filler, variables));
                    }

                    // `next` is guaranteed by graph validation.
                    let next = node
                        .next
                        .clone()
                        .ok_or_else(|| FlowError::MissingNext(current.clone()))?;

                    match self.runner.run(call, variables).await {
                        Ok(WebhookOutcome::Completed(value)) => {
                            if let (Some(name), Some(value)) = (&call.response_variable, value) {
                                variables.insert(name.clone(), value);
                            }
                            current = next;
                        }
                        Ok(WebhookOutcome::Detached) => {
                            current = next;
                        }
                        Err(err) => {
                            tracing::warn!(node = %current, error = %err, "function call failed");
                            match on_error {
                                Some(on_error) => current = on_error.clone(),
                                None => {
                                    outcome.speak.push(
                                        "I'm sorry, I couldn't complete that just now."
                                            .to_string(),
                                    );
                                    current = next;
                                }
                            }
                        }
                    }
                }

                NodeKind::SendMessage { message, channel } => {
                    outcome.side_effects.push(SideEffect::Message {
                        channel: *channel,
                        body: template::render(message, variables),
                    });
                    let next = node
                        .next
                        .clone()
                        .ok_or_else(|| FlowError::MissingNext(current.clone()))?;
                    current = next;
                }

                NodeKind::Transfer {
                    destination,
                    announcement,
                } => {
                    let line = announcement
                        .clone()
                        .unwrap_or_else(|| "One moment, transferring you now.".to_string());
                    outcome.speak.push(template::render(&line, variables));
                    outcome.terminal = Some(TerminalAction::Transfer {
                        destination: destination.clone(),
                    });
                    return Ok(());
                }

                NodeKind::End { farewell } => {
                    if let Some(farewell) = farewell {
                        outcome.speak.push(template::render(farewell, variables));
                    }
                    outcome.terminal = Some(TerminalAction::EndCall);
                    return Ok(());
                }
            }
        }

        Err(FlowError::HopLimit(current))
    }

    fn terminal_action(kind: &NodeKind) -> TerminalAction {
        match kind {
            NodeKind::Transfer { destination, .. } => TerminalAction::Transfer {
                destination: destination.clone(),
            },
            _ => TerminalAction::EndCall,
        }
    }

    /// Generated reply when the flow stays on a conversation node.
    async fn conversational_reply(
        &self,
        goal: &str,
        use_knowledge: bool,
        utterance: &str,
        variables: &HashMap<String, VarValue>,
        history: &ConversationHistory,
    ) -> String {
        let mut builder = PromptBuilder::new().system(
            "You are a voice agent on a live phone call. Reply in one or two \
             short sentences of plain spoken language, no markup.",
        );

        if use_knowledge {
            if let Some(router) = &self.knowledge {
                // Retrieval failure degrades to an ungrounded reply.
                match router.maybe_retrieve(utterance).await {
                    Ok(snippets) if !snippets.is_empty() => {
                        builder =
                            builder.message(Message::system(grounding_instruction(&snippets)));
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "retrieval failed; replying without context");
                    }
                }
            }
        }

        let messages = builder
            .history(history, self.history_window)
            .instruction(format!(
                "Current goal: {goal}\nThe caller just said: {utterance}\nReply to the caller."
            ))
            .build();

        match self.generate(ChatRequest::new(messages)).await {
            Ok(reply) => template::render(reply.trim(), variables),
            Err(err) => {
                tracing::warn!(error = %err, "reply generation failed twice; using recovery line");
                RECOVERY_REPLY.to_string()
            }
        }
    }

    /// Generated opening line when a conversation node has no script.
    async fn opening_line(
        &self,
        goal: &str,
        variables: &HashMap<String, VarValue>,
        history: &ConversationHistory,
    ) -> String {
        let messages = PromptBuilder::new()
            .system(
                "You are a voice agent on a live phone call. Reply in one or two \
                 short sentences of plain spoken language, no markup.",
            )
            .history(history, self.history_window)
            .instruction(format!(
                "Current goal: {goal}\nOpen this topic with the caller."
            ))
            .build();

        match self.generate(ChatRequest::new(messages)).await {
            Ok(line) => template::render(line.trim(), variables),
            Err(err) => {
                tracing::warn!(error = %err, "opening line generation failed twice; using recovery line");
                RECOVERY_REPLY.to_string()
            }
        }
    }
}
