//! External connector interface
//!
//! Connectors are external collaborators (travel APIs, databases, ...)
//! exposed to workflows through a single typed call. The kernel never
//! speaks their wire protocols; implementations are injected at
//! construction.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{MaestroError, Result};

/// Executes typed calls against named external backends.
#[async_trait]
pub trait ConnectorInvoker: Send + Sync {
    /// Invoke `operation` on `connector` with the given parameters.
    async fn invoke(
        &self,
        connector: &str,
        operation: &str,
        statement: Option<&str>,
        parameters: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value>;
}

/// Handler for one named connector.
#[async_trait]
pub trait ConnectorHandler: Send + Sync {
    async fn call(
        &self,
        operation: &str,
        statement: Option<&str>,
        parameters: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value>;
}

/// Name-keyed registry of connector handlers.
///
/// The standard invoker implementation; handlers are registered up front
/// and dispatched by name.
pub struct ConnectorRegistry {
    handlers: HashMap<String, Arc<dyn ConnectorHandler>>,
}

impl ConnectorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under a connector name.
    pub fn register(mut self, name: impl Into<String>, handler: Arc<dyn ConnectorHandler>) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    /// Registered connector names.
    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(|k| k.as_str()).collect()
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectorInvoker for ConnectorRegistry {
    async fn invoke(
        &self,
        connector: &str,
        operation: &str,
        statement: Option<&str>,
        parameters: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let handler = self.handlers.get(connector).ok_or_else(|| MaestroError::Connector {
            connector: connector.to_string(),
            message: "no such connector registered".to_string(),
        })?;

        handler.call(operation, statement, parameters).await
    }
}
