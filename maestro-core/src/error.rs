//! Error types for Maestro operations

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Result type for Maestro operations
pub type Result<T> = std::result::Result<T, MaestroError>;

/// Error types for the orchestration kernel
#[derive(Debug, thiserror::Error)]
pub enum MaestroError {
    /// Malformed or incomplete request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Workflow document failed validation
    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    /// Step type has no registered processor
    #[error("Unsupported step type: {0}")]
    UnsupportedStepType(String),

    /// Agent identifier not present in the registry
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    /// Request blocked at admission by policy
    #[error("Request blocked by policy")]
    RequestBlocked {
        /// Names of the policies that produced the block verdict
        policies: Vec<String>,
    },

    /// Attempted modification of the reserved system policy tier
    #[error("The system policy tier is immutable")]
    SystemTierImmutable,

    /// Organization-scope policies require enterprise deployment mode
    #[error("Organization-scope policies require enterprise deployment mode")]
    OrgTierEnterprise,

    /// Community-tier per-tenant policy cap reached
    #[error("Policy limit reached for tenant '{0}'")]
    PolicyLimitExceeded(String),

    /// A single provider invocation failed
    #[error("Provider '{provider}' error: {message}")]
    Provider { provider: String, message: String },

    /// Every configured provider failed for this request
    #[error("All providers failed: {0}")]
    AllProvidersFailed(String),

    /// Connector invocation failed
    #[error("Connector '{connector}' error: {message}")]
    Connector { connector: String, message: String },

    /// Step execution failed
    #[error("Step '{step}' failed: {message}")]
    StepFailed { step: String, message: String },

    /// Aggregation had nothing to work with
    #[error("No successful task results")]
    NoSuccessfulResults,

    /// Workflow exceeded its wall-clock budget
    #[error("Workflow timed out after {0:?}")]
    WorkflowTimeout(Duration),

    /// Execution identifier not found in storage
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    /// Execution is not in a resumable state
    #[error("Execution '{0}' is not paused")]
    NotPaused(String),

    /// Storage collaborator error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl MaestroError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            MaestroError::InvalidRequest(_) => "invalid_request",
            MaestroError::InvalidWorkflow(_) => "invalid_workflow",
            MaestroError::UnsupportedStepType(_) => "unsupported_step_type",
            MaestroError::UnknownAgent(_) => "unknown_agent",
            MaestroError::RequestBlocked { .. } => "request_blocked",
            MaestroError::SystemTierImmutable => "system_tier_immutable",
            MaestroError::OrgTierEnterprise => "org_tier_enterprise",
            MaestroError::PolicyLimitExceeded(_) => "policy_limit_exceeded",
            MaestroError::Provider { .. } => "provider_error",
            MaestroError::AllProvidersFailed(_) => "all_providers_failed",
            MaestroError::Connector { .. } => "connector_error",
            MaestroError::StepFailed { .. } => "step_failed",
            MaestroError::NoSuccessfulResults => "no_successful_results",
            MaestroError::WorkflowTimeout(_) => "workflow_timeout",
            MaestroError::ExecutionNotFound(_) => "execution_not_found",
            MaestroError::NotPaused(_) => "execution_not_paused",
            MaestroError::Storage(_) => "storage_error",
            MaestroError::Configuration(_) => "configuration_error",
            MaestroError::Serialization(_) => "serialization_error",
            MaestroError::Other(_) => "internal_error",
        }
    }

    /// Whether a retry of the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MaestroError::Provider { .. } | MaestroError::Storage(_)
        )
    }

    /// User-visible form of this error.
    ///
    /// The message never carries stack traces or backend identifiers;
    /// provider and storage failures are reported generically.
    pub fn to_body(&self) -> ErrorBody {
        let message = match self {
            MaestroError::Provider { .. } => "upstream model provider failure".to_string(),
            MaestroError::AllProvidersFailed(_) => {
                "no model provider is currently available".to_string()
            }
            MaestroError::Connector { .. } => "upstream connector failure".to_string(),
            MaestroError::Storage(_) => "storage temporarily unavailable".to_string(),
            other => other.to_string(),
        };

        let details = match self {
            MaestroError::RequestBlocked { policies } => Some(serde_json::json!({
                "applied_policies": policies,
            })),
            _ => None,
        };

        ErrorBody {
            code: self.code().to_string(),
            message,
            details,
        }
    }
}

impl From<String> for MaestroError {
    fn from(s: String) -> Self {
        MaestroError::Other(s)
    }
}

impl From<&str> for MaestroError {
    fn from(s: &str) -> Self {
        MaestroError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for MaestroError {
    fn from(err: anyhow::Error) -> Self {
        MaestroError::Other(err.to_string())
    }
}

/// Structured error payload returned to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable code
    pub code: String,
    /// Human-readable message, safe to display
    pub message: String,
    /// Optional structured context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(MaestroError::SystemTierImmutable.code(), "system_tier_immutable");
        assert_eq!(MaestroError::OrgTierEnterprise.code(), "org_tier_enterprise");
        assert_eq!(
            MaestroError::PolicyLimitExceeded("acme".to_string()).code(),
            "policy_limit_exceeded"
        );
    }

    #[test]
    fn test_body_hides_backend_identifiers() {
        let err = MaestroError::Provider {
            provider: "openai".to_string(),
            message: "connection reset by api.openai.com".to_string(),
        };

        let body = err.to_body();
        assert_eq!(body.code, "provider_error");
        assert!(!body.message.contains("openai"));
    }

    #[test]
    fn test_blocked_body_carries_policy_names() {
        let err = MaestroError::RequestBlocked {
            policies: vec!["high-risk-block".to_string()],
        };

        let body = err.to_body();
        let details = body.details.unwrap();
        assert_eq!(details["applied_policies"][0], "high-risk-block");
    }

    #[test]
    fn test_transient_classification() {
        assert!(MaestroError::Storage("reconnecting".to_string()).is_transient());
        assert!(!MaestroError::NoSuccessfulResults.is_transient());
    }
}
