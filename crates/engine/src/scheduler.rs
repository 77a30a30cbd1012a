//! The turn scheduler
//!
//! One [`TurnEngine`] per live call. Transcript events come in, the flow
//! machine decides what to say, and the scheduler keeps exactly one turn
//! in flight:
//!
//! - a final transcript starts a turn; an in-flight turn is cancelled only
//!   when the new utterance's sequence number is higher, and any reply still
//!   playing out of the speaker is stopped
//! - partials interrupt the agent only at the word threshold, and only while
//!   the agent is generating or expected to still be playing
//! - session state commits after generation and before playback dispatch,
//!   behind a cancellation checkpoint, so a barged-in turn leaves no trace

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use callflow_config::EngineSettings;
use callflow_core::{TranscriptEvent, VarValue};
use std::collections::HashMap;
use callflow_flow::{
    FlowError, FlowMachine, MessageChannel, SideEffect, TerminalAction, TurnInput, TurnOutcome,
};
use callflow_transport::{split_segments, SpeechSegment, SpeechTransport};

use crate::playback::PlaybackClock;
use crate::session::SessionState;
use crate::{EngineError, EngineEvent};

/// Unanswered check-ins before the call is abandoned.
const MAX_CHECKINS: usize = 3;

/// An in-flight agent turn.
struct ActiveTurn {
    seq: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owned caller input handed to a spawned turn.
enum PendingInput {
    Utterance(String),
    Digit(char),
}

/// Per-call turn scheduler.
pub struct TurnEngine {
    machine: Arc<FlowMachine>,
    transport: Arc<dyn SpeechTransport>,
    session: Arc<SessionState>,
    clock: PlaybackClock,
    settings: EngineSettings,
    events: broadcast::Sender<EngineEvent>,
    active: Mutex<Option<ActiveTurn>>,
    /// True while the flow machine runs for the current turn
    generating: AtomicBool,
    /// Utterance sequence counter; finals and digits each take the next one
    seq: AtomicU64,
    checkins: AtomicUsize,
    last_checkin: Mutex<Instant>,
}

impl TurnEngine {
    pub fn new(
        machine: Arc<FlowMachine>,
        transport: Arc<dyn SpeechTransport>,
        session: Arc<SessionState>,
        settings: EngineSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            machine,
            transport,
            session,
            clock: PlaybackClock::new(
                settings.speech_rate_wpm,
                Duration::from_millis(settings.segment_safety_margin_ms),
            ),
            settings,
            events,
            active: Mutex::new(None),
            generating: AtomicBool::new(false),
            seq: AtomicU64::new(0),
            checkins: AtomicUsize::new(0),
            last_checkin: Mutex::new(Instant::now()),
        }
    }

    /// Subscribe to engine events for this call.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    pub fn clock(&self) -> &PlaybackClock {
        &self.clock
    }

    pub fn is_call_ended(&self) -> bool {
        self.session.is_ended()
    }

    /// Refresh the wall-clock variable so prompts can speak the time.
    fn stamp_now(variables: &mut HashMap<String, VarValue>) {
        let now = chrono::Local::now().format("%A, %B %-d, %-I:%M %p").to_string();
        variables.insert("current_datetime".to_string(), VarValue::Text(now));
    }

    /// Start of call: speak the flow's opening turn.
    pub async fn open_call(&self) -> Result<(), EngineError> {
        let mut variables = self.session.variables_snapshot();
        Self::stamp_now(&mut variables);
        let history = self.session.history_snapshot();

        let outcome = self.machine.open(&mut variables, &history).await?;
        self.session
            .commit_turn(&outcome.node_id, variables, None, &outcome.speak);
        self.dispatch(0, &outcome, None).await?;
        self.finish(&outcome).await
    }

    /// Feed one transcript event from the transport.
    pub async fn handle_event(self: &Arc<Self>, event: TranscriptEvent) -> Result<(), EngineError> {
        if self.session.is_ended() {
            return Ok(());
        }

        self.session.touch();
        self.checkins.store(0, Ordering::SeqCst);

        match event {
            TranscriptEvent::Partial { text, .. } => self.handle_partial(&text).await,
            TranscriptEvent::Final { text, .. } => {
                self.start_turn(PendingInput::Utterance(text)).await
            }
            // Finals are the authoritative trigger; the bare end-of-speech
            // marker only counts as activity.
            TranscriptEvent::EndOfUtterance => Ok(()),
            TranscriptEvent::Dtmf { digit } => self.start_turn(PendingInput::Digit(digit)).await,
        }
    }

    /// Partial transcript: maybe a barge-in, never a turn trigger.
    async fn handle_partial(&self, text: &str) -> Result<(), EngineError> {
        let words = text.split_whitespace().count();
        if words == 0 {
            return Ok(());
        }

        // Both checks matter: a turn can be past generation but the reply
        // still playing out of the speaker.
        let agent_active = self.generating.load(Ordering::SeqCst) || self.clock.is_speaking();
        if !agent_active {
            return Ok(());
        }

        if words < self.settings.interrupt_word_threshold {
            // Backchannel ("yeah", "mhm") while the agent talks.
            tracing::debug!(words, text = %text, "short partial suppressed while agent active");
            return Ok(());
        }

        self.interrupt().await
    }

    /// Barge-in: cancel any in-flight turn and silence the speaker.
    async fn interrupt(&self) -> Result<(), EngineError> {
        let cancelled_seq = {
            let mut active = self.active.lock();
            active.take().map(|turn| {
                turn.cancel.cancel();
                turn.seq
            })
        };

        self.generating.store(false, Ordering::SeqCst);
        self.clock.stop();
        self.transport.stop_playback().await?;

        tracing::info!(?cancelled_seq, "caller barge-in");
        let _ = self.events.send(EngineEvent::Interrupted {
            seq: cancelled_seq.unwrap_or_else(|| self.seq.load(Ordering::SeqCst)),
        });
        Ok(())
    }

    /// Spawn the turn for an authoritative input.
    async fn start_turn(self: &Arc<Self>, input: PendingInput) -> Result<(), EngineError> {
        if let PendingInput::Utterance(text) = &input {
            if text.trim().is_empty() {
                return Ok(());
            }
        }

        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;

        let superseded = {
            // Supersede only a turn for an OLDER utterance. Judging by bare
            // task existence would also cancel a newer turn racing ahead of
            // a late-delivered event.
            let mut active = self.active.lock();
            match active.take() {
                Some(turn) if turn.seq < seq => {
                    turn.cancel.cancel();
                    tracing::debug!(superseded = turn.seq, by = seq, "in-flight turn superseded");
                    let _ = self.events.send(EngineEvent::TurnSuperseded { seq: turn.seq });
                    true
                }
                Some(turn) => {
                    *active = Some(turn);
                    return Ok(());
                }
                None => false,
            }
        };

        // A new final takes over the line. Anything still playing belongs
        // to an earlier turn and is stale the moment the caller speaks;
        // short finals never reach the partial barge-in path, so the stop
        // has to happen here.
        if superseded || self.clock.is_speaking() {
            self.clock.stop();
            self.transport.stop_playback().await?;
        }

        let cancel = CancellationToken::new();
        let engine = self.clone();
        let token = cancel.clone();

        {
            // Slot lock held across spawn and insert: the task clears its
            // own slot when done and must find it installed.
            let mut active = self.active.lock();
            let handle = tokio::spawn(async move {
                if let Err(err) = engine.run_turn(seq, input, token).await {
                    tracing::error!(seq, error = %err, "turn failed");
                }
                engine.clear_active(seq);
            });
            *active = Some(ActiveTurn {
                seq,
                cancel,
                handle,
            });
        }
        let _ = self.events.send(EngineEvent::TurnStarted { seq });
        Ok(())
    }

    /// Release the active slot once the turn for `seq` finishes. A newer
    /// turn may already own the slot; leave that one alone.
    fn clear_active(&self, seq: u64) {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|turn| turn.seq == seq) {
            *active = None;
        }
    }

    async fn run_turn(
        &self,
        seq: u64,
        input: PendingInput,
        cancel: CancellationToken,
    ) -> Result<(), EngineError> {
        self.generating.store(true, Ordering::SeqCst);

        let node_id = self.session.node_id();
        let mut variables = self.session.variables_snapshot();
        Self::stamp_now(&mut variables);
        let history = self.session.history_snapshot();

        let (turn_input, caller_text) = match &input {
            PendingInput::Utterance(text) => (TurnInput::Utterance(text), Some(text.as_str())),
            PendingInput::Digit(digit) => (TurnInput::Digit(*digit), None),
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => None,
            result = self.machine.advance(&node_id, turn_input, &mut variables, &history) => {
                Some(result)
            }
        };
        self.generating.store(false, Ordering::SeqCst);

        let Some(result) = result else {
            tracing::debug!(seq, "turn cancelled during generation");
            return Ok(());
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => return self.fail_call(seq, err).await,
        };

        // Checkpoint between generation and commit: a barge-in during the
        // model call must leave the session untouched.
        if cancel.is_cancelled() {
            tracing::debug!(seq, "turn cancelled before commit");
            return Ok(());
        }

        self.session
            .commit_turn(&outcome.node_id, variables, caller_text, &outcome.speak);
        let completed = self.dispatch(seq, &outcome, Some(&cancel)).await?;
        if !completed || cancel.is_cancelled() {
            // Barged in while speaking: a terminal outcome the caller
            // talked over must not hang up or transfer.
            tracing::debug!(seq, "turn cancelled during dispatch");
            return Ok(());
        }
        self.finish(&outcome).await
    }

    /// Flow errors are unrecoverable mid-call: apologize and hang up rather
    /// than leave the caller in silence.
    async fn fail_call(&self, seq: u64, err: FlowError) -> Result<(), EngineError> {
        tracing::error!(seq, error = %err, "flow error; ending the call");

        let apology = "I'm sorry, something went wrong on our end. We'll call you back shortly.";
        self.transport
            .speak(SpeechSegment::new(seq, apology))
            .await?;
        self.clock.note_segment(apology);
        self.session.push_agent_line(apology);

        self.session.end();
        self.transport.hangup().await?;
        let _ = self.events.send(EngineEvent::CallEnded {
            reason: "flow_error".to_string(),
        });
        Ok(())
    }

    /// Queue the outcome's speech and emit its side effects.
    ///
    /// Returns false when a barge-in stopped the dispatch; the remaining
    /// segments and side effects are dropped.
    async fn dispatch(
        &self,
        seq: u64,
        outcome: &TurnOutcome,
        cancel: Option<&CancellationToken>,
    ) -> Result<bool, EngineError> {
        for line in &outcome.speak {
            for text in split_segments(line) {
                if cancel.is_some_and(|c| c.is_cancelled()) {
                    tracing::debug!(seq, "segment dispatch stopped by barge-in");
                    return Ok(false);
                }

                self.transport
                    .speak(SpeechSegment::new(seq, text.clone()))
                    .await?;
                self.clock.note_segment(&text);
                let _ = self.events.send(EngineEvent::Speaking { seq, text });
            }
        }

        for effect in &outcome.side_effects {
            let SideEffect::Message { channel, body } = effect;
            let channel = match channel {
                MessageChannel::Sms => "sms",
                MessageChannel::Email => "email",
            };
            tracing::info!(channel, body = %body, "outbound message");
            let _ = self.events.send(EngineEvent::MessageSent {
                channel: channel.to_string(),
                body: body.clone(),
            });
        }

        Ok(true)
    }

    async fn finish(&self, outcome: &TurnOutcome) -> Result<(), EngineError> {
        match &outcome.terminal {
            None => Ok(()),
            Some(TerminalAction::EndCall) => {
                self.session.end();
                self.transport.hangup().await?;
                let _ = self.events.send(EngineEvent::CallEnded {
                    reason: "flow_end".to_string(),
                });
                Ok(())
            }
            Some(TerminalAction::Transfer { destination }) => {
                self.session.end();
                self.transport.transfer(destination).await?;
                let _ = self.events.send(EngineEvent::CallEnded {
                    reason: format!("transfer:{destination}"),
                });
                Ok(())
            }
        }
    }

    /// Dead-air probe, driven by [`crate::DeadAirMonitor`].
    ///
    /// Fires the check-in prompt once the line has been quiet past the
    /// configured threshold, measured from the later of expected playback
    /// end, last caller activity and the previous check-in. Gives up and
    /// hangs up after [`MAX_CHECKINS`] unanswered prompts.
    pub async fn check_dead_air(&self) -> Result<(), EngineError> {
        if self.session.is_ended()
            || self.generating.load(Ordering::SeqCst)
            || self.clock.is_speaking()
        {
            return Ok(());
        }

        let threshold = Duration::from_secs(self.settings.silence_checkin_secs);
        let quiet_since = self
            .clock
            .expected_end()
            .max(self.session.last_activity())
            .max(*self.last_checkin.lock());
        if quiet_since.elapsed() < threshold {
            return Ok(());
        }

        let count = self.checkins.fetch_add(1, Ordering::SeqCst) + 1;
        if count > MAX_CHECKINS {
            tracing::info!("caller unresponsive; abandoning the call");
            self.session.end();
            self.transport.hangup().await?;
            let _ = self.events.send(EngineEvent::CallEnded {
                reason: "silence".to_string(),
            });
            return Ok(());
        }

        *self.last_checkin.lock() = Instant::now();
        let prompt = self.settings.checkin_prompt.clone();
        tracing::info!(count, "dead air; checking in");

        self.transport
            .speak(SpeechSegment::new(self.seq.load(Ordering::SeqCst), &prompt))
            .await?;
        self.clock.note_segment(&prompt);
        self.session.push_agent_line(&prompt);
        let _ = self.events.send(EngineEvent::CheckIn);
        Ok(())
    }

    /// Wait for the in-flight turn to finish. Test support.
    pub async fn settle(&self) {
        let handle = self.active.lock().take().map(|turn| turn.handle);
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
