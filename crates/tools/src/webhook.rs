//! Declarative webhooks
//!
//! The operator-authored shape of a `function_call` node, and the executor
//! that runs it against session variables.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use callflow_core::{template, VarValue};

use crate::{FunctionRunner, ToolError};

/// HTTP method for a webhook call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Safe to retry without side effects
    pub fn is_idempotent(&self) -> bool {
        matches!(self, HttpMethod::Get)
    }
}

/// Where the request body comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodySource {
    /// JSON text with `{{name}}` substitution applied before sending
    Template(String),
    /// Field names populated directly from session variables
    Schema(Vec<String>),
    /// No body
    None,
}

impl Default for BodySource {
    fn default() -> Self {
        BodySource::None
    }
}

/// Declarative webhook specification, authored per `function_call` node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSpec {
    /// Endpoint URL; `{{name}}` substitution applies
    pub url: String,

    #[serde(default = "default_method")]
    pub method: HttpMethod,

    #[serde(default)]
    pub body: BodySource,

    /// Per-call timeout; the executor's default applies when absent
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Session variable that receives the response, if any
    #[serde(default)]
    pub response_variable: Option<String>,

    /// When false the call is fire-and-forget: the turn proceeds
    /// immediately and the response is discarded.
    #[serde(default = "default_true")]
    pub wait_for_result: bool,

    /// Filler spoken before the call ("let me check that for you")
    #[serde(default)]
    pub speak_before_call: Option<String>,
}

fn default_method() -> HttpMethod {
    HttpMethod::Post
}

fn default_true() -> bool {
    true
}

impl WebhookSpec {
    /// Build the request body from session variables.
    pub fn render_body(
        &self,
        variables: &HashMap<String, VarValue>,
    ) -> Result<Option<serde_json::Value>, ToolError> {
        match &self.body {
            BodySource::None => Ok(None),
            BodySource::Template(text) => {
                let rendered = template::render(text, variables);
                let value = serde_json::from_str(&rendered)
                    .map_err(|e| ToolError::Body(format!("template is not valid JSON: {e}")))?;
                Ok(Some(value))
            }
            BodySource::Schema(fields) => {
                let mut object = serde_json::Map::new();
                for field in fields {
                    if let Some(value) = variables.get(field) {
                        let json = serde_json::to_value(value)
                            .map_err(|e| ToolError::Body(e.to_string()))?;
                        object.insert(field.clone(), json);
                    }
                }
                Ok(Some(serde_json::Value::Object(object)))
            }
        }
    }
}

/// Result of a webhook run.
#[derive(Debug, Clone)]
pub enum WebhookOutcome {
    /// Call completed; the value (if any) goes into `response_variable`
    Completed(Option<VarValue>),
    /// Fire-and-forget call detached into the background
    Detached,
}

/// Executes webhooks with explicit timeouts.
///
/// Idempotent calls are retried once with backoff; anything else fails to
/// the caller, who routes it to the node's error branch.
pub struct WebhookExecutor {
    client: reqwest::Client,
    default_timeout: Duration,
    retry_backoff: Duration,
}

impl WebhookExecutor {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            default_timeout: Duration::from_secs(10),
            retry_backoff: Duration::from_millis(500),
        }
    }

    pub fn from_settings(settings: &callflow_config::ToolSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            default_timeout: Duration::from_secs(settings.default_timeout_secs),
            retry_backoff: Duration::from_millis(settings.retry_backoff_ms),
        }
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    fn resolved_timeout(&self, spec: &WebhookSpec) -> Duration {
        spec.timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout)
    }

    async fn execute_once(
        &self,
        spec: &WebhookSpec,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Option<VarValue>, ToolError> {
        let mut request = match spec.method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
            HttpMethod::Put => self.client.put(url),
            HttpMethod::Patch => self.client.patch(url),
            HttpMethod::Delete => self.client.delete(url),
        };

        let timeout = self.resolved_timeout(spec);
        request = request.timeout(timeout);

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ToolError::Timeout(spec.url.clone(), timeout.as_secs())
            } else {
                ToolError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Status(status.as_u16()));
        }

        if spec.response_variable.is_none() {
            return Ok(None);
        }

        let text = response
            .text()
            .await
            .map_err(|e| ToolError::Request(e.to_string()))?;

        // Prefer structured responses; fall back to raw text.
        let value = match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(json) => VarValue::from_json(&json).unwrap_or(VarValue::Text(text)),
            Err(_) => VarValue::Text(text),
        };

        Ok(Some(value))
    }

    async fn execute(
        &self,
        spec: &WebhookSpec,
        variables: &HashMap<String, VarValue>,
    ) -> Result<Option<VarValue>, ToolError> {
        let url = template::render(&spec.url, variables);
        let body = spec.render_body(variables)?;

        match self.execute_once(spec, &url, body.as_ref()).await {
            Ok(value) => Ok(value),
            Err(err) if spec.method.is_idempotent() => {
                tracing::warn!(url = %url, error = %err, "idempotent webhook failed, retrying once");
                tokio::time::sleep(self.retry_backoff).await;
                self.execute_once(spec, &url, body.as_ref()).await
            }
            Err(err) => Err(err),
        }
    }
}

impl Default for WebhookExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FunctionRunner for WebhookExecutor {
    async fn run(
        &self,
        spec: &WebhookSpec,
        variables: &HashMap<String, VarValue>,
    ) -> Result<WebhookOutcome, ToolError> {
        if !spec.wait_for_result {
            // Fire-and-forget: the turn must not wait on the endpoint.
            let spec = spec.clone();
            let variables = variables.clone();
            let executor = WebhookExecutor {
                client: self.client.clone(),
                default_timeout: self.default_timeout,
                retry_backoff: self.retry_backoff,
            };
            tokio::spawn(async move {
                if let Err(err) = executor.execute(&spec, &variables).await {
                    tracing::warn!(url = %spec.url, error = %err, "detached webhook failed");
                }
            });
            return Ok(WebhookOutcome::Detached);
        }

        let value = self.execute(spec, variables).await?;
        Ok(WebhookOutcome::Completed(value))
    }
}

/// Scripted function runner for tests.
pub struct StubFunctionRunner {
    outcome: Mutex<Box<dyn Fn() -> Result<WebhookOutcome, ToolError> + Send>>,
    calls: Mutex<Vec<WebhookSpec>>,
}

impl StubFunctionRunner {
    /// Always completes with the given value
    pub fn completing(value: Option<VarValue>) -> Self {
        Self {
            outcome: Mutex::new(Box::new(move || {
                Ok(WebhookOutcome::Completed(value.clone()))
            })),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always fails with a timeout
    pub fn timing_out() -> Self {
        Self {
            outcome: Mutex::new(Box::new(|| {
                Err(ToolError::Timeout("stub".to_string(), 10))
            })),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Specs this runner has been asked to run
    pub fn calls(&self) -> Vec<WebhookSpec> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl FunctionRunner for StubFunctionRunner {
    async fn run(
        &self,
        spec: &WebhookSpec,
        _variables: &HashMap<String, VarValue>,
    ) -> Result<WebhookOutcome, ToolError> {
        self.calls.lock().push(spec.clone());
        (self.outcome.lock())()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> HashMap<String, VarValue> {
        let mut map = HashMap::new();
        map.insert("phone".to_string(), VarValue::Text("5551234567".to_string()));
        map.insert("yearly_income".to_string(), VarValue::Number(60000.0));
        map
    }

    #[test]
    fn test_template_body() {
        let spec = WebhookSpec {
            url: "https://example.test/leads".to_string(),
            method: HttpMethod::Post,
            body: BodySource::Template(r#"{"phone": "{{phone}}"}"#.to_string()),
            timeout_secs: Some(5),
            response_variable: None,
            wait_for_result: true,
            speak_before_call: None,
        };

        let body = spec.render_body(&vars()).unwrap().unwrap();
        assert_eq!(body["phone"], "5551234567");
    }

    #[test]
    fn test_schema_body() {
        let spec = WebhookSpec {
            url: "https://example.test".to_string(),
            method: HttpMethod::Post,
            body: BodySource::Schema(vec![
                "yearly_income".to_string(),
                "not_present".to_string(),
            ]),
            timeout_secs: Some(5),
            response_variable: None,
            wait_for_result: true,
            speak_before_call: None,
        };

        let body = spec.render_body(&vars()).unwrap().unwrap();
        assert_eq!(body["yearly_income"], 60000.0);
        assert!(body.get("not_present").is_none());
    }

    #[test]
    fn test_bad_template_is_body_error() {
        let spec = WebhookSpec {
            url: "https://example.test".to_string(),
            method: HttpMethod::Post,
            body: BodySource::Template("not json {{phone}}".to_string()),
            timeout_secs: Some(5),
            response_variable: None,
            wait_for_result: true,
            speak_before_call: None,
        };

        assert!(matches!(
            spec.render_body(&vars()),
            Err(ToolError::Body(_))
        ));
    }

    #[tokio::test]
    async fn test_stub_runner_records_calls() {
        let runner = StubFunctionRunner::completing(Some(VarValue::Text("ok".to_string())));
        let spec = WebhookSpec {
            url: "https://example.test".to_string(),
            method: HttpMethod::Get,
            body: BodySource::None,
            timeout_secs: Some(5),
            response_variable: Some("result".to_string()),
            wait_for_result: true,
            speak_before_call: None,
        };

        let outcome = runner.run(&spec, &vars()).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Completed(Some(_))));
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn test_spec_deserializes_with_defaults() {
        let spec: WebhookSpec =
            serde_json::from_str(r#"{"url": "https://example.test/check"}"#).unwrap();
        assert_eq!(spec.method, HttpMethod::Post);
        assert!(spec.wait_for_result);
        assert_eq!(spec.timeout_secs, None);
    }

    #[test]
    fn test_executor_default_timeout_applies() {
        let settings = callflow_config::ToolSettings {
            default_timeout_secs: 3,
            retry_backoff_ms: 10,
        };
        let executor = WebhookExecutor::from_settings(&settings);

        let spec: WebhookSpec =
            serde_json::from_str(r#"{"url": "https://example.test"}"#).unwrap();
        assert_eq!(executor.resolved_timeout(&spec), Duration::from_secs(3));

        let spec: WebhookSpec =
            serde_json::from_str(r#"{"url": "https://example.test", "timeout_secs": 7}"#)
                .unwrap();
        assert_eq!(executor.resolved_timeout(&spec), Duration::from_secs(7));
    }
}
