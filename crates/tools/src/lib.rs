//! Function-call node execution
//!
//! Flow graphs declare external HTTP calls on `function_call` nodes; this
//! crate owns the declarative webhook spec and its executor. Calls carry
//! explicit timeouts so a slow endpoint can never wedge a turn.

pub mod webhook;

pub use webhook::{
    BodySource, HttpMethod, StubFunctionRunner, WebhookExecutor, WebhookOutcome, WebhookSpec,
};

use async_trait::async_trait;
use callflow_core::VarValue;
use std::collections::HashMap;
use thiserror::Error;

/// Tool errors
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Webhook '{0}' timed out after {1}s")]
    Timeout(String, u64),

    #[error("Webhook request failed: {0}")]
    Request(String),

    #[error("Webhook returned status {0}")]
    Status(u16),

    #[error("Invalid webhook body: {0}")]
    Body(String),
}

/// Runs a declared function call against session variables.
///
/// The production implementation is [`WebhookExecutor`]; tests use
/// [`StubFunctionRunner`].
#[async_trait]
pub trait FunctionRunner: Send + Sync {
    async fn run(
        &self,
        spec: &WebhookSpec,
        variables: &HashMap<String, VarValue>,
    ) -> Result<WebhookOutcome, ToolError>;
}
