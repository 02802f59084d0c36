//! # Maestro - LLM Orchestration Kernel
//!
//! Maestro translates free-form natural-language queries into executable
//! multi-step workflows, routes each step to the best available
//! language-model provider or external connector, enforces dynamic
//! per-tenant policy, and synthesizes intermediate results into a single
//! coherent answer.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use maestro_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = OrchestratorConfig::from_env()?;
//!     let orchestrator = Orchestrator::from_config(&config).await?;
//!     orchestrator.start();
//!
//!     let request = OrchestratorRequest::new(
//!         "req-1",
//!         "3-day trip to Paris for 2 people from NYC",
//!         UserContext::new("user", "traveler@example.com", "acme"),
//!     );
//!
//!     let response = orchestrator.orchestrate(request).await;
//!     println!("{}", response.data);
//!
//!     orchestrator.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The kernel is four tightly-coupled subsystems, wired together by the
//! [`Orchestrator`](orchestrator::Orchestrator):
//!
//! - **Planning engine** ([`planner`]): query analysis and workflow
//!   generation, LLM-assisted with deterministic fallbacks
//! - **Workflow engine** ([`workflow`]): mixed parallel/sequential
//!   scheduling, template substitution, per-step failure semantics
//! - **LLM router** ([`router`]): weighted/round-robin/failover provider
//!   selection with health tracking
//! - **Policy engine** ([`policy`]): per-tenant rules from durable storage
//!   behind a bounded-staleness snapshot cache
//!
//! External collaborators (providers, connectors, stores, HITL approval)
//! are traits injected at construction; the kernel holds no process-wide
//! state.

pub mod aggregator;
pub mod config;
pub mod connector;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod planner;
pub mod policy;
pub mod request;
pub mod router;
pub mod workflow;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use error::{MaestroError, Result};

/// Install a process-wide tracing subscriber honoring `RUST_LOG`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Re-export commonly used types
pub mod prelude {
    pub use crate::aggregator::{AggregationStats, ResultAggregator};
    pub use crate::config::{
        DeploymentMode, EngineSettings, OrchestratorConfig, PolicySettings, ProviderSettings,
        RoutingSettings,
    };
    pub use crate::connector::{ConnectorHandler, ConnectorInvoker, ConnectorRegistry};
    pub use crate::error::{ErrorBody, MaestroError, Result};
    pub use crate::llm::{
        LlmProvider, LlmResponse, ProviderResponse, RequestContext, RetryConfig,
    };
    pub use crate::orchestrator::{Orchestrator, OrchestratorBuilder};
    pub use crate::planner::{Domain, ExecutionMode, PlanningEngine, QueryAnalysis};
    pub use crate::policy::{
        ActionType, ConditionOperator, DefaultRiskCalculator, DynamicPolicy, InMemoryPolicyStore,
        PolicyAction, PolicyCondition, PolicyEngine, PolicyEvaluationResult, PolicyScope,
        PolicyStore, RiskCalculator,
    };
    pub use crate::request::{
        ClientContext, OrchestratorRequest, OrchestratorResponse, UserContext,
    };
    pub use crate::router::{LlmRouter, ProviderInfo, ProviderStatus, RoutingStrategy};
    pub use crate::workflow::{
        ExecutionStatus, ExecutionStore, InMemoryExecutionStore, StepExecution, StepKind,
        StepStatus, Workflow, WorkflowEngine, WorkflowExecution, WorkflowStep,
    };
}
