//! In-process tool bindings.
//!
//! A binding is a named handler living in the gateway process. Handlers receive the same
//! envelope a remote endpoint would, so they can log or check the request id.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use toolgate_sign::SignedEnvelope;

#[derive(Debug, Error)]
#[error("handler error: {message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, args: Value, envelope: &SignedEnvelope) -> Result<Value, HandlerError>;
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    bindings: HashMap<String, Arc<dyn ToolHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in bindings.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("builtin.echo", Arc::new(EchoHandler));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        self.bindings.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.bindings.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bindings.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Returns its arguments along with the request id it was called under.
pub struct EchoHandler;

#[async_trait]
impl ToolHandler for EchoHandler {
    async fn handle(&self, args: Value, envelope: &SignedEnvelope) -> Result<Value, HandlerError> {
        Ok(json!({
            "echo": args,
            "request_id": envelope.request_id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_binding_is_registered() {
        let registry = HandlerRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["builtin.echo".to_string()]);
        let handler = registry.get("builtin.echo").unwrap();
        let envelope = toolgate_sign::sign("POST", "/builtin.echo", 0, None, b"{}").unwrap();
        let out = handler.handle(json!({"a": 1}), &envelope).await.unwrap();
        assert_eq!(out["echo"]["a"], 1);
        assert_eq!(out["request_id"], envelope.request_id.as_str());
        assert!(registry.get("missing").is_none());
    }
}
