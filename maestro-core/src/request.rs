//! Request and response envelopes for the orchestration kernel

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::ErrorBody;

/// Identity and authorization context of the requesting user
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserContext {
    /// Role name (e.g. "user", "admin")
    pub role: String,

    /// User email, used as part of the policy memoisation key
    pub email: String,

    /// Tenant the user belongs to
    pub tenant_id: String,

    /// Granted permission names
    #[serde(default)]
    pub permissions: HashSet<String>,
}

impl UserContext {
    /// Create a user context with a role and tenant.
    pub fn new(
        role: impl Into<String>,
        email: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            email: email.into(),
            tenant_id: tenant_id.into(),
            permissions: HashSet::new(),
        }
    }

    /// Add a permission.
    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    /// Check whether the user holds a permission.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

/// Calling application context
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientContext {
    /// Client application identifier
    pub id: String,

    /// Owning organization
    pub org_id: String,

    /// Tenant the client operates under
    pub tenant_id: String,
}

/// A single orchestration request.
///
/// Immutable for the lifetime of one execution; the free-form `context`
/// map is passed through to providers as telemetry and read by the
/// typed [`RequestContext`](crate::llm::RequestContext) view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorRequest {
    /// Stable request identifier supplied by the caller
    pub request_id: String,

    /// Free-form natural-language query
    pub query: String,

    /// Request classification (e.g. "chat", "workflow")
    pub request_type: String,

    /// Requesting user
    pub user: UserContext,

    /// Calling application
    #[serde(default)]
    pub client: ClientContext,

    /// Free-form request context
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

impl OrchestratorRequest {
    /// Create a request with the minimum required fields.
    pub fn new(request_id: impl Into<String>, query: impl Into<String>, user: UserContext) -> Self {
        Self {
            request_id: request_id.into(),
            query: query.into(),
            request_type: "workflow".to_string(),
            user,
            client: ClientContext::default(),
            context: HashMap::new(),
        }
    }

    /// Set the request type.
    pub fn with_request_type(mut self, request_type: impl Into<String>) -> Self {
        self.request_type = request_type.into();
        self
    }

    /// Set the client context.
    pub fn with_client(mut self, client: ClientContext) -> Self {
        self.client = client;
        self
    }

    /// Add a context entry.
    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// The effective tenant for policy scoping: the user's tenant, or the
    /// client's when the user carries none.
    pub fn tenant_id(&self) -> &str {
        if self.user.tenant_id.is_empty() {
            &self.client.tenant_id
        } else {
            &self.user.tenant_id
        }
    }

    /// Validate the request envelope.
    pub fn validate(&self) -> crate::Result<()> {
        if self.request_id.is_empty() {
            return Err(crate::MaestroError::InvalidRequest(
                "request_id must not be empty".to_string(),
            ));
        }
        if self.tenant_id().is_empty() {
            return Err(crate::MaestroError::InvalidRequest(
                "tenant_id must be present on the user or client".to_string(),
            ));
        }
        Ok(())
    }
}

/// Response envelope returned by [`Orchestrator::orchestrate`](crate::orchestrator::Orchestrator::orchestrate)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorResponse {
    /// Whether the request produced a usable answer
    pub success: bool,

    /// Final synthesized answer
    pub data: String,

    /// Execution metadata (workflow name, step counts, timings)
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Structured error when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl OrchestratorResponse {
    /// Build a success response.
    pub fn ok(data: impl Into<String>) -> Self {
        Self {
            success: true,
            data: data.into(),
            metadata: HashMap::new(),
            error: None,
        }
    }

    /// Build a failure response from an error.
    pub fn from_error(err: &crate::MaestroError) -> Self {
        Self {
            success: false,
            data: String::new(),
            metadata: HashMap::new(),
            error: Some(err.to_body()),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
