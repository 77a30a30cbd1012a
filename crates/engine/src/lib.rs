//! Turn engine
//!
//! Orchestrates one live call: consumes transcript events, schedules agent
//! turns against the flow machine, estimates playback timing, handles
//! barge-in and dead air, and owns the session registry.
//!
//! Concurrency rules, in priority order:
//! - a final transcript is the authoritative trigger for a new turn
//! - a partial of enough words interrupts the agent mid-generation or
//!   mid-playback; a one-word partial never does
//! - an in-flight turn is cancelled only when a NEWER utterance supersedes
//!   it, judged by sequence number
//! - the playback estimate only moves forward while segments queue

pub mod checkin;
pub mod playback;
pub mod scheduler;
pub mod session;

pub use checkin::DeadAirMonitor;
pub use playback::PlaybackClock;
pub use scheduler::TurnEngine;
pub use session::{SessionManager, SessionSnapshot, SessionState};

use thiserror::Error;

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Flow(#[from] callflow_flow::FlowError),

    #[error(transparent)]
    Transport(#[from] callflow_transport::TransportError),

    #[error("Session limit reached ({0} live sessions)")]
    SessionLimit(usize),

    #[error("Unknown session '{0}'")]
    UnknownSession(String),
}

/// Observable engine events, broadcast per call.
///
/// Send failures are ignored; events are observability, not control flow.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A final transcript started turn `seq`
    TurnStarted { seq: u64 },
    /// A segment was queued for playback
    Speaking { seq: u64, text: String },
    /// The caller barged in; playback and any in-flight turn stopped
    Interrupted { seq: u64 },
    /// A newer utterance superseded the in-flight turn `seq`
    TurnSuperseded { seq: u64 },
    /// An out-of-band message left the flow
    MessageSent { channel: String, body: String },
    /// The dead-air check-in prompt fired
    CheckIn,
    /// The call ended
    CallEnded { reason: String },
}
