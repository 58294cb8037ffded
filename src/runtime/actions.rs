//! Action handlers invoked by action nodes
//!
//! Each action node names a handler by its subtype. The engine interpolates the
//! node's configuration against the execution scope before the handler sees it.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::{collections::HashMap, sync::Arc};

/// A side-effecting step such as sending an email or calling a webhook
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Run the action. `config` is already interpolated; `payload` is the
    /// execution scope; `owner_id` is the artist who owns the workflow.
    ///
    /// The returned value is stored under `nodes.<node id>` in the scope.
    async fn execute(&self, config: &Value, payload: &Value, owner_id: &str) -> Result<Value>;
}

/// Subtype → handler lookup table
#[derive(Default, Clone)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the handlers that need no outside credentials
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("webhook_call", Arc::new(WebhookCallHandler::new()));
        registry.register("log_message", Arc::new(LogMessageHandler));
        registry
    }

    /// Register (or replace) the handler for a subtype
    pub fn register(&mut self, subtype: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(subtype.into(), handler);
    }

    pub fn get(&self, subtype: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(subtype).cloned()
    }

    pub fn has(&self, subtype: &str) -> bool {
        self.handlers.contains_key(subtype)
    }

    /// Registered subtypes, sorted
    pub fn subtypes(&self) -> Vec<&str> {
        let mut subtypes: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        subtypes.sort_unstable();
        subtypes
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("subtypes", &self.subtypes())
            .finish()
    }
}

/// Outbound HTTP call
///
/// Config: `url` (required), `method` (default POST), `headers`, `body`
/// (defaults to the whole payload). A non-2xx response fails the node.
#[derive(Debug, Clone)]
pub struct WebhookCallHandler {
    client: reqwest::Client,
}

impl WebhookCallHandler {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

impl Default for WebhookCallHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionHandler for WebhookCallHandler {
    async fn execute(&self, config: &Value, payload: &Value, owner_id: &str) -> Result<Value> {
        let url = config
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("webhook_call missing 'url' parameter"))?;
        let method = config.get("method").and_then(Value::as_str).unwrap_or("POST");

        tracing::debug!("🌍 HTTP Request: {} {} (owner {})", method, url, owner_id);

        let mut request_builder = match method.to_uppercase().as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "DELETE" => self.client.delete(url),
            "PATCH" => self.client.patch(url),
            _ => return Err(anyhow::anyhow!("Unsupported HTTP method: {}", method)),
        };

        if let Some(headers) = config.get("headers").and_then(Value::as_object) {
            for (key, value) in headers {
                if let Some(header_value) = value.as_str() {
                    request_builder = request_builder.header(key.as_str(), header_value);
                }
            }
        }

        if matches!(method.to_uppercase().as_str(), "POST" | "PUT" | "PATCH") {
            request_builder = request_builder.json(config.get("body").unwrap_or(payload));
        }

        let response = request_builder.send().await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(anyhow::anyhow!("HTTP {} from {}: {}", status.as_u16(), url, text));
        }

        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
        Ok(json!({ "status": status.as_u16(), "body": body }))
    }
}

/// Writes the configured `message` to the service log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMessageHandler;

#[async_trait]
impl ActionHandler for LogMessageHandler {
    async fn execute(&self, config: &Value, _payload: &Value, owner_id: &str) -> Result<Value> {
        let message = match config.get("message") {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => return Err(anyhow::anyhow!("log_message missing 'message' parameter")),
        };
        let level = config.get("level").and_then(Value::as_str).unwrap_or("info");

        match level {
            "warn" | "warning" => tracing::warn!("📝 [{}] {}", owner_id, message),
            "error" => tracing::error!("📝 [{}] {}", owner_id, message),
            "debug" => tracing::debug!("📝 [{}] {}", owner_id, message),
            _ => tracing::info!("📝 [{}] {}", owner_id, message),
        }

        Ok(json!({ "message": message }))
    }
}
