//! End-to-end turn scheduling over the loopback transport.

use std::sync::Arc;
use std::time::Duration;

use callflow_config::{EngineSettings, LlmSettings};
use callflow_core::TranscriptEvent;
use callflow_engine::{DeadAirMonitor, EngineEvent, SessionState, TurnEngine};
use callflow_flow::{FlowGraph, FlowMachine};
use callflow_llm::{LanguageModel, LlmConditionEvaluator, ScriptedModel, TimeoutModel};
use callflow_tools::StubFunctionRunner;
use callflow_transport::{LoopbackTransport, SpeechSegment, SpeechTransport, TransportError};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

fn income_graph() -> Arc<FlowGraph> {
    Arc::new(
        FlowGraph::from_json(
            r#"{
                "start": "ask_income",
                "nodes": {
                    "ask_income": {
                        "kind": "conversation",
                        "goal": "learn the caller's yearly income",
                        "script": "What do you earn in a year?",
                        "extract": [{
                            "name": "yearly_income",
                            "instruction": "yearly income in dollars",
                            "mandatory": true,
                            "reprompt": "Sorry, what do you earn in a year?",
                            "derive": [{"name": "monthly_income", "op": "divide", "by": 12.0, "round": true}]
                        }],
                        "transitions": [
                            {"condition": "caller stated their income", "target": "ask_side_hustle"}
                        ]
                    },
                    "ask_side_hustle": {
                        "kind": "conversation",
                        "goal": "ask about side income",
                        "script": "So that's {{monthly_income}} a month. Any side income?",
                        "transitions": [{"condition": "caller answered", "target": "bye"}]
                    },
                    "bye": {"kind": "end", "farewell": "Thanks, goodbye."}
                }
            }"#,
        )
        .unwrap(),
    )
}

fn chat_graph() -> Arc<FlowGraph> {
    Arc::new(
        FlowGraph::from_json(
            r#"{
                "start": "chat",
                "nodes": {
                    "chat": {
                        "kind": "conversation",
                        "goal": "answer the caller's questions",
                        "script": "Hi, what can I help you with?"
                    }
                }
            }"#,
        )
        .unwrap(),
    )
}

fn test_settings() -> EngineSettings {
    EngineSettings {
        interrupt_word_threshold: 2,
        silence_checkin_secs: 1,
        speech_rate_wpm: 150,
        segment_safety_margin_ms: 100,
        ..Default::default()
    }
}

fn build_engine(
    graph: Arc<FlowGraph>,
    model: Arc<ScriptedModel>,
    settings: EngineSettings,
) -> (Arc<TurnEngine>, Arc<LoopbackTransport>) {
    init_tracing();
    let transport = Arc::new(LoopbackTransport::new());
    let timed: Arc<dyn LanguageModel> =
        Arc::new(TimeoutModel::from_settings(model, &LlmSettings::default()));
    let machine = Arc::new(FlowMachine::new(
        graph.clone(),
        timed.clone(),
        Arc::new(LlmConditionEvaluator::new(timed)),
        Arc::new(StubFunctionRunner::completing(None)),
    ));
    let session = Arc::new(SessionState::new(graph.start.clone()));
    let engine = Arc::new(TurnEngine::new(
        machine,
        transport.clone(),
        session,
        settings,
    ));
    (engine, transport)
}

fn final_event(text: &str) -> TranscriptEvent {
    TranscriptEvent::Final {
        text: text.to_string(),
        offset_ms: 0,
    }
}

fn partial_event(text: &str) -> TranscriptEvent {
    TranscriptEvent::Partial {
        text: text.to_string(),
        offset_ms: 0,
    }
}

async fn settle(engine: &TurnEngine) {
    tokio::time::timeout(Duration::from_secs(5), engine.settle())
        .await
        .expect("turn did not settle");
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_final_transcript_drives_exactly_one_reply() {
    let model = Arc::new(ScriptedModel::new(vec![
        r#"{"yearly_income": 60000}"#.to_string(),
        "1".to_string(),
    ]));
    let (engine, transport) = build_engine(income_graph(), model, test_settings());

    engine.open_call().await.unwrap();
    assert_eq!(transport.spoken_texts(), vec!["What do you earn in a year?"]);

    engine
        .handle_event(final_event("about 60k a year"))
        .await
        .unwrap();
    settle(&engine).await;

    // Exactly one reply, with the derived monthly figure substituted.
    assert_eq!(
        transport.spoken_texts(),
        vec![
            "What do you earn in a year?",
            "So that's 5000 a month. Any side income?",
        ]
    );
    assert_eq!(engine.session().node_id(), "ask_side_hustle");
}

#[tokio::test]
async fn test_one_word_partial_never_interrupts() {
    let model = Arc::new(ScriptedModel::always("unused"));
    let (engine, transport) = build_engine(income_graph(), model, test_settings());

    engine.open_call().await.unwrap();
    // The opening line is still "playing" per the clock estimate.
    assert!(engine.clock().is_speaking());

    engine.handle_event(partial_event("yeah")).await.unwrap();
    assert_eq!(transport.stop_count(), 0);
    assert!(engine.clock().is_speaking());
}

#[tokio::test]
async fn test_two_word_partial_interrupts_playback() {
    let model = Arc::new(ScriptedModel::always("unused"));
    let (engine, transport) = build_engine(income_graph(), model, test_settings());
    let mut events = engine.subscribe();

    engine.open_call().await.unwrap();
    engine
        .handle_event(partial_event("wait wait"))
        .await
        .unwrap();

    assert_eq!(transport.stop_count(), 1);
    assert!(!engine.clock().is_speaking());
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, EngineEvent::Interrupted { .. })));
}

#[tokio::test]
async fn test_barge_in_during_generation_leaves_no_trace() {
    let model = Arc::new(
        ScriptedModel::new(vec![r#"{"yearly_income": 60000}"#.to_string()])
            .with_delay(Duration::from_millis(100)),
    );
    let (engine, transport) = build_engine(income_graph(), model, test_settings());

    engine.open_call().await.unwrap();
    let spoken_before = transport.spoken_texts().len();

    engine
        .handle_event(final_event("about 60k a year"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    engine
        .handle_event(partial_event("hold on a second"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The cancelled turn spoke nothing and committed nothing.
    assert_eq!(transport.spoken_texts().len(), spoken_before);
    assert_eq!(engine.session().node_id(), "ask_income");
    assert!(engine
        .session()
        .variables_snapshot()
        .get("yearly_income")
        .is_none());
}

#[tokio::test]
async fn test_newer_final_supersedes_older_turn() {
    let model = Arc::new(
        ScriptedModel::new(vec![
            r#"{"yearly_income": 60000}"#.to_string(),
            "1".to_string(),
        ])
        .with_delay(Duration::from_millis(50)),
    );
    let (engine, transport) = build_engine(income_graph(), model, test_settings());
    let mut events = engine.subscribe();

    engine.open_call().await.unwrap();
    engine
        .handle_event(final_event("I make sixty"))
        .await
        .unwrap();
    engine
        .handle_event(final_event("sorry, sixty thousand a year"))
        .await
        .unwrap();
    settle(&engine).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Every reply segment belongs to the newer utterance.
    let replies: Vec<_> = transport
        .spoken()
        .into_iter()
        .filter(|s| s.utterance_seq > 0)
        .collect();
    assert!(!replies.is_empty());
    assert!(replies.iter().all(|s| s.utterance_seq == 2));

    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, EngineEvent::TurnSuperseded { seq: 1 })));
}

#[tokio::test]
async fn test_wait_interruption_then_fresh_reply() {
    let model = Arc::new(ScriptedModel::new(vec![
        "Our standard rate is nine percent for most customers. It can go lower \
         with a strong credit score. Let me walk you through how that works."
            .to_string(),
        "There are no fees in the first year.".to_string(),
    ]));
    let (engine, transport) = build_engine(chat_graph(), model, test_settings());

    engine.open_call().await.unwrap();
    engine
        .handle_event(final_event("tell me about the rates"))
        .await
        .unwrap();
    settle(&engine).await;
    assert!(engine.clock().is_speaking());
    let stops_before = transport.stop_count();

    engine
        .handle_event(partial_event("wait wait"))
        .await
        .unwrap();
    assert_eq!(transport.stop_count(), stops_before + 1);

    engine
        .handle_event(final_event("what about the fees"))
        .await
        .unwrap();
    settle(&engine).await;

    let texts = transport.spoken_texts();
    assert_eq!(
        texts.last().map(String::as_str),
        Some("There are no fees in the first year.")
    );
}

#[tokio::test]
async fn test_final_during_playback_releases_stale_audio() {
    let model = Arc::new(ScriptedModel::new(vec![
        "Our standard rate is nine percent for most customers. It can go lower \
         with a strong credit score. Let me walk you through how that works."
            .to_string(),
        "Sure, take your time.".to_string(),
    ]));
    let (engine, transport) = build_engine(chat_graph(), model, test_settings());

    engine.open_call().await.unwrap();
    engine
        .handle_event(final_event("tell me about the rates"))
        .await
        .unwrap();
    settle(&engine).await;
    assert!(engine.clock().is_speaking());
    let stops_before = transport.stop_count();

    // One word never trips the partial threshold, so the final itself has
    // to silence the stale reply before its own turn runs.
    engine.handle_event(final_event("wait")).await.unwrap();
    assert_eq!(transport.stop_count(), stops_before + 1);
    assert!(!engine.clock().is_speaking());

    settle(&engine).await;
    assert_eq!(
        transport.spoken_texts().last().map(String::as_str),
        Some("Sure, take your time.")
    );
}

/// Loopback that takes real time per segment, the way a synthesis stream
/// would.
struct SlowTransport {
    inner: Arc<LoopbackTransport>,
}

#[async_trait::async_trait]
impl SpeechTransport for SlowTransport {
    async fn speak(&self, segment: SpeechSegment) -> Result<(), TransportError> {
        tokio::time::sleep(Duration::from_millis(150)).await;
        self.inner.speak(segment).await
    }

    async fn stop_playback(&self) -> Result<(), TransportError> {
        self.inner.stop_playback().await
    }

    async fn hangup(&self) -> Result<(), TransportError> {
        self.inner.hangup().await
    }

    async fn transfer(&self, destination: &str) -> Result<(), TransportError> {
        self.inner.transfer(destination).await
    }
}

#[tokio::test]
async fn test_barge_in_mid_farewell_skips_hangup() {
    let graph = Arc::new(
        FlowGraph::from_json(
            r#"{
                "start": "ask",
                "nodes": {
                    "ask": {
                        "kind": "conversation",
                        "goal": "confirm the caller is done",
                        "script": "Anything else I can help with?",
                        "transitions": [{"condition": "caller is done", "target": "bye"}]
                    },
                    "bye": {
                        "kind": "end",
                        "farewell": "Thanks for calling in today. Your application is on file with our team. Goodbye now."
                    }
                }
            }"#,
        )
        .unwrap(),
    );
    init_tracing();
    let model = Arc::new(ScriptedModel::new(vec!["1".to_string()]));
    let inner = Arc::new(LoopbackTransport::new());
    let transport = Arc::new(SlowTransport {
        inner: inner.clone(),
    });
    let machine = Arc::new(FlowMachine::new(
        graph.clone(),
        model.clone(),
        Arc::new(LlmConditionEvaluator::new(model)),
        Arc::new(StubFunctionRunner::completing(None)),
    ));
    let session = Arc::new(SessionState::new(graph.start.clone()));
    let engine = Arc::new(TurnEngine::new(
        machine,
        transport,
        session,
        test_settings(),
    ));

    engine.open_call().await.unwrap();
    engine
        .handle_event(final_event("no that's everything, thanks"))
        .await
        .unwrap();

    // Barge in while the farewell is mid-dispatch.
    tokio::time::sleep(Duration::from_millis(200)).await;
    engine
        .handle_event(partial_event("wait wait"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    // The terminal turn was talked over: the rest of the farewell is
    // dropped and the line stays open.
    assert!(!inner.is_hung_up());
    assert!(!engine.is_call_ended());
    assert!(!inner
        .spoken_texts()
        .contains(&"Goodbye now.".to_string()));
}

#[tokio::test]
async fn test_completed_turn_slot_is_released() {
    let model = Arc::new(ScriptedModel::new(vec![
        r#"{"yearly_income": 60000}"#.to_string(),
        "1".to_string(),
        "1".to_string(),
    ]));
    let (engine, _transport) = build_engine(income_graph(), model, test_settings());
    let mut events = engine.subscribe();

    engine.open_call().await.unwrap();
    engine
        .handle_event(final_event("about 60k a year"))
        .await
        .unwrap();
    // Let the first turn finish on its own, without settle() taking the
    // slot.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.session().node_id(), "ask_side_hustle");

    engine
        .handle_event(final_event("no side income"))
        .await
        .unwrap();
    settle(&engine).await;

    // The finished first turn must not be reported as superseded by the
    // second one.
    assert!(drain(&mut events)
        .iter()
        .all(|e| !matches!(e, EngineEvent::TurnSuperseded { .. })));
    assert!(engine.is_call_ended());
}

#[tokio::test]
async fn test_dtmf_routes_and_transfers() {
    let graph = Arc::new(
        FlowGraph::from_json(
            r#"{
                "start": "menu",
                "nodes": {
                    "menu": {
                        "kind": "press_digit",
                        "prompt": "Press 1 for sales, 2 for support.",
                        "mappings": {"1": "sales", "2": "support"}
                    },
                    "sales": {"kind": "end", "farewell": "Sales will call you back."},
                    "support": {
                        "kind": "transfer",
                        "destination": "tier2",
                        "announcement": "Connecting you to support now."
                    }
                }
            }"#,
        )
        .unwrap(),
    );
    let model = Arc::new(ScriptedModel::always("unused"));
    let (engine, transport) = build_engine(graph, model, test_settings());
    let mut events = engine.subscribe();

    engine.open_call().await.unwrap();
    engine
        .handle_event(TranscriptEvent::Dtmf { digit: '2' })
        .await
        .unwrap();
    settle(&engine).await;

    assert_eq!(transport.transfers(), vec!["tier2"]);
    assert!(engine.is_call_ended());
    assert!(drain(&mut events).iter().any(
        |e| matches!(e, EngineEvent::CallEnded { reason } if reason == "transfer:tier2")
    ));
}

#[tokio::test]
async fn test_flow_error_apologizes_and_hangs_up() {
    let model = Arc::new(ScriptedModel::always("unused"));
    let transport = Arc::new(LoopbackTransport::new());
    let machine = Arc::new(FlowMachine::new(
        income_graph(),
        model.clone(),
        Arc::new(LlmConditionEvaluator::new(model)),
        Arc::new(StubFunctionRunner::completing(None)),
    ));
    // Session parked on a node the graph does not have.
    let session = Arc::new(SessionState::new("does_not_exist"));
    let engine = Arc::new(TurnEngine::new(
        machine,
        transport.clone(),
        session,
        test_settings(),
    ));

    engine.handle_event(final_event("hello?")).await.unwrap();
    settle(&engine).await;

    assert!(transport.is_hung_up());
    assert!(engine.is_call_ended());
    assert!(transport
        .spoken_texts()
        .iter()
        .any(|t| t.contains("I'm sorry")));
}

#[tokio::test]
async fn test_dead_air_checkin_fires() {
    let model = Arc::new(ScriptedModel::always("unused"));
    // Fast speech so the opening line's playback estimate clears quickly.
    let settings = EngineSettings {
        silence_checkin_secs: 1,
        speech_rate_wpm: 400,
        segment_safety_margin_ms: 50,
        ..test_settings()
    };
    let (engine, transport) = build_engine(chat_graph(), model, settings);
    let mut events = engine.subscribe();

    engine.open_call().await.unwrap();
    let shutdown = DeadAirMonitor::start(engine.clone(), Duration::from_millis(50));

    // Opening line ~1.1s of estimated playback, then 1s of silence.
    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert!(transport
        .spoken_texts()
        .iter()
        .any(|t| t == "Are you still there?"));
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, EngineEvent::CheckIn)));
    assert!(!engine.is_call_ended());

    shutdown.send(true).ok();
}

#[tokio::test]
async fn test_end_node_hangs_up_after_farewell() {
    let graph = Arc::new(
        FlowGraph::from_json(
            r#"{
                "start": "ask",
                "nodes": {
                    "ask": {
                        "kind": "conversation",
                        "goal": "confirm the caller is done",
                        "script": "Anything else I can help with?",
                        "transitions": [{"condition": "caller is done", "target": "bye"}]
                    },
                    "bye": {"kind": "end", "farewell": "Thanks for calling, goodbye."}
                }
            }"#,
        )
        .unwrap(),
    );
    let model = Arc::new(ScriptedModel::new(vec!["1".to_string()]));
    let (engine, transport) = build_engine(graph, model, test_settings());

    engine.open_call().await.unwrap();
    engine
        .handle_event(final_event("no that's everything, thanks"))
        .await
        .unwrap();
    settle(&engine).await;

    assert!(transport
        .spoken_texts()
        .contains(&"Thanks for calling, goodbye.".to_string()));
    assert!(transport.is_hung_up());
    assert!(engine.is_call_ended());
}
