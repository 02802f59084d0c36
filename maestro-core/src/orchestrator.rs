//! Request orchestration
//!
//! The single logical entry point: admission policy check, planning,
//! workflow execution, and final synthesis, producing a response envelope.

use std::sync::Arc;
use tracing::{info, warn};

use crate::aggregator::ResultAggregator;
use crate::config::OrchestratorConfig;
use crate::connector::{ConnectorInvoker, ConnectorRegistry};
use crate::error::{ErrorBody, MaestroError, Result};
use crate::llm::providers::build_providers;
use crate::planner::{ExecutionMode, PlanningEngine, SEQUENTIAL_TAG};
use crate::policy::{DefaultRiskCalculator, InMemoryPolicyStore, PolicyEngine, PolicyStore, RiskCalculator};
use crate::request::{OrchestratorRequest, OrchestratorResponse};
use crate::router::LlmRouter;
use crate::workflow::execution::ExecutionStatus;
use crate::workflow::processors::ProcessorRegistry;
use crate::workflow::store::{ExecutionStore, InMemoryExecutionStore};
use crate::workflow::WorkflowEngine;

/// The orchestration kernel.
///
/// All collaborators are injected at construction; there are no process
/// globals. Build one with [`Orchestrator::builder`] or
/// [`Orchestrator::from_config`].
pub struct Orchestrator {
    router: Arc<LlmRouter>,
    policy: Arc<PolicyEngine>,
    planner: PlanningEngine,
    engine: WorkflowEngine,
    aggregator: ResultAggregator,
    enable_parallel: bool,
}

impl Orchestrator {
    /// Create a new orchestrator builder.
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Build an orchestrator from configuration with in-memory stores.
    pub async fn from_config(config: &OrchestratorConfig) -> Result<Self> {
        let mut router_builder = LlmRouter::builder()
            .strategy(config.routing.strategy)
            .weights(config.routing.weights.clone());
        for provider in build_providers(config) {
            router_builder = router_builder.provider(provider);
        }
        if let Some(default) = &config.routing.default_provider {
            router_builder = router_builder.default_provider(default.clone());
        }
        let router = Arc::new(router_builder.build());

        let policy = Arc::new(
            PolicyEngine::new(
                Arc::new(InMemoryPolicyStore::new()),
                Arc::new(DefaultRiskCalculator),
                config.policy.clone(),
                config.deployment_mode,
            )
            .await,
        );

        Self::builder()
            .router(router)
            .policy(policy)
            .settings(config.engine.clone())
            .build()
    }

    /// Start the background tasks (policy refresh, router health sweep).
    pub fn start(&self) {
        self.policy.start_refresh();
        self.router
            .start_health_sweep(std::time::Duration::from_secs(30));
    }

    /// Stop the background tasks.
    pub fn shutdown(&self) {
        self.policy.shutdown();
        self.router.shutdown();
    }

    /// Kernel health: at least one healthy provider and a healthy policy
    /// engine.
    pub fn is_healthy(&self) -> bool {
        self.router.is_healthy() && self.policy.is_healthy()
    }

    /// The router, for status endpoints and weight updates.
    pub fn router(&self) -> &Arc<LlmRouter> {
        &self.router
    }

    /// The policy engine, for policy administration.
    pub fn policy(&self) -> &Arc<PolicyEngine> {
        &self.policy
    }

    /// The workflow engine, for execution queries.
    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    /// Handle one request end-to-end.
    pub async fn orchestrate(&self, request: OrchestratorRequest) -> OrchestratorResponse {
        if let Err(e) = request.validate() {
            return OrchestratorResponse::from_error(&e);
        }

        info!(
            request_id = %request.request_id,
            tenant = request.tenant_id(),
            request_type = %request.request_type,
            "request admitted"
        );

        let verdict = self.policy.evaluate(&request).await;
        if !verdict.allowed {
            warn!(
                request_id = %request.request_id,
                policies = ?verdict.applied_policies,
                risk_score = verdict.risk_score,
                "request blocked by policy"
            );
            let err = MaestroError::RequestBlocked {
                policies: verdict.applied_policies.clone(),
            };
            return OrchestratorResponse::from_error(&err)
                .with_metadata("risk_score", serde_json::json!(verdict.risk_score));
        }

        let domain_hint = request
            .context
            .get("domain")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let execution_mode = match request.context.get("execution_mode").and_then(|v| v.as_str()) {
            Some("sequential") => ExecutionMode::Sequential,
            Some("parallel") => ExecutionMode::Parallel,
            _ => ExecutionMode::Auto,
        };

        let workflow = self
            .planner
            .generate_plan(
                &request.query,
                domain_hint.as_deref(),
                execution_mode,
                &request.client.id,
                &request.request_id,
                &request.context,
            )
            .await;

        let mut input = serde_json::Map::new();
        input.insert("query".to_string(), serde_json::json!(request.query));
        for (key, value) in &request.context {
            input.entry(key.clone()).or_insert_with(|| value.clone());
        }

        let sequential_tagged = workflow.metadata.tags.iter().any(|t| t == SEQUENTIAL_TAG);
        let enable_parallel = self.enable_parallel && !sequential_tagged;

        let execution = match self
            .engine
            .execute_with_parallelism(&workflow, input, &request, enable_parallel)
            .await
        {
            Ok(execution) => execution,
            Err(e) => return OrchestratorResponse::from_error(&e),
        };

        let mut response = match execution.status {
            ExecutionStatus::Completed => {
                let data = match self.final_answer(&execution, &request).await {
                    Ok(data) => data,
                    Err(e) => return OrchestratorResponse::from_error(&e),
                };
                OrchestratorResponse::ok(data)
            }
            ExecutionStatus::Paused => OrchestratorResponse {
                success: false,
                data: String::new(),
                metadata: Default::default(),
                error: Some(ErrorBody {
                    code: "approval_required".to_string(),
                    message: "execution paused awaiting approval".to_string(),
                    details: Some(serde_json::json!({
                        "paused_at_step": execution.paused_at_step,
                    })),
                }),
            },
            _ => {
                let message = execution
                    .error
                    .clone()
                    .unwrap_or_else(|| "workflow failed".to_string());
                OrchestratorResponse {
                    success: false,
                    data: String::new(),
                    metadata: Default::default(),
                    error: Some(ErrorBody {
                        code: "workflow_failed".to_string(),
                        message,
                        details: None,
                    }),
                }
            }
        };

        let stats = ResultAggregator::stats(&execution.steps);
        response = response
            .with_metadata("request_id", serde_json::json!(request.request_id))
            .with_metadata("workflow", serde_json::json!(workflow.metadata.name))
            .with_metadata("execution_id", serde_json::json!(execution.id))
            .with_metadata("risk_score", serde_json::json!(verdict.risk_score))
            .with_metadata("steps_total", serde_json::json!(stats.total))
            .with_metadata("steps_successful", serde_json::json!(stats.successful))
            .with_metadata("steps_failed", serde_json::json!(stats.failed));

        response
    }

    /// Resume a paused execution after approval.
    pub async fn resume(
        &self,
        execution_id: &str,
        request: &OrchestratorRequest,
    ) -> OrchestratorResponse {
        let execution = match self.engine.resume(execution_id, request).await {
            Ok(execution) => execution,
            Err(e) => return OrchestratorResponse::from_error(&e),
        };

        match execution.status {
            ExecutionStatus::Completed => {
                match self.final_answer(&execution, request).await {
                    Ok(data) => OrchestratorResponse::ok(data)
                        .with_metadata("execution_id", serde_json::json!(execution.id)),
                    Err(e) => OrchestratorResponse::from_error(&e),
                }
            }
            _ => {
                let message = execution
                    .error
                    .clone()
                    .unwrap_or_else(|| "workflow failed".to_string());
                OrchestratorResponse {
                    success: false,
                    data: String::new(),
                    metadata: Default::default(),
                    error: Some(ErrorBody {
                        code: "workflow_failed".to_string(),
                        message,
                        details: None,
                    }),
                }
            }
        }
    }

    /// The final answer: the resolved `result` output when present,
    /// otherwise aggregator synthesis over the step results.
    async fn final_answer(
        &self,
        execution: &crate::workflow::execution::WorkflowExecution,
        request: &OrchestratorRequest,
    ) -> Result<String> {
        if let Some(result) = execution.output.get("result").and_then(|v| v.as_str()) {
            if !result.trim().is_empty() && !result.contains("{{") {
                return Ok(result.to_string());
            }
        }

        self.aggregator
            .aggregate(&execution.steps, &request.query, &request.user)
            .await
    }
}

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder {
    router: Option<Arc<LlmRouter>>,
    policy: Option<Arc<PolicyEngine>>,
    connectors: Option<Arc<dyn ConnectorInvoker>>,
    execution_store: Option<Arc<dyn ExecutionStore>>,
    settings: crate::config::EngineSettings,
    travel_connector: Option<String>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            router: None,
            policy: None,
            connectors: None,
            execution_store: None,
            settings: crate::config::EngineSettings::default(),
            travel_connector: None,
        }
    }

    /// Set the router (required).
    pub fn router(mut self, router: Arc<LlmRouter>) -> Self {
        self.router = Some(router);
        self
    }

    /// Set the policy engine (required).
    pub fn policy(mut self, policy: Arc<PolicyEngine>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Set the connector invoker; defaults to an empty registry.
    pub fn connectors(mut self, connectors: Arc<dyn ConnectorInvoker>) -> Self {
        self.connectors = Some(connectors);
        self
    }

    /// Set the execution store; defaults to in-memory.
    pub fn execution_store(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.execution_store = Some(store);
        self
    }

    /// Set workflow engine settings.
    pub fn settings(mut self, settings: crate::config::EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the connector name used for travel rewrites.
    pub fn travel_connector(mut self, name: impl Into<String>) -> Self {
        self.travel_connector = Some(name.into());
        self
    }

    /// Build the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the router or policy engine is
    /// missing.
    pub fn build(self) -> Result<Orchestrator> {
        let router = self
            .router
            .ok_or_else(|| MaestroError::Configuration("router is required".to_string()))?;
        let policy = self
            .policy
            .ok_or_else(|| MaestroError::Configuration("policy engine is required".to_string()))?;
        let connectors = self
            .connectors
            .unwrap_or_else(|| Arc::new(ConnectorRegistry::new()));
        let store = self
            .execution_store
            .unwrap_or_else(|| Arc::new(InMemoryExecutionStore::new()));

        let processors = Arc::new(ProcessorRegistry::standard(
            Arc::clone(&router),
            connectors,
        ));
        let engine = WorkflowEngine::new(processors, store, self.settings.clone())
            .with_policy(Arc::clone(&policy));

        let mut planner = PlanningEngine::new(Arc::clone(&router));
        if let Some(name) = self.travel_connector {
            planner = planner.with_travel_connector(name);
        }

        let aggregator = ResultAggregator::new(Arc::clone(&router));

        Ok(Orchestrator {
            router,
            policy,
            planner,
            engine,
            aggregator,
            enable_parallel: self.settings.enable_parallel,
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a policy engine over an arbitrary store; convenience for
/// embedders wiring their own storage.
pub async fn policy_engine_with_store(
    store: Arc<dyn PolicyStore>,
    risk: Arc<dyn RiskCalculator>,
    config: &OrchestratorConfig,
) -> Arc<PolicyEngine> {
    Arc::new(
        PolicyEngine::new(store, risk, config.policy.clone(), config.deployment_mode).await,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeploymentMode, PolicySettings};
    use crate::llm::{LlmProvider, ProviderResponse, RequestContext, RetryConfig};
    use crate::policy::{ActionType, ConditionOperator, DynamicPolicy, PolicyAction, PolicyCondition};
    use crate::request::UserContext;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingProvider {
        calls: AtomicU64,
    }

    #[async_trait]
    impl LlmProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        async fn generate(&self, ctx: &RequestContext) -> Result<ProviderResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ProviderResponse {
                content: format!("echo: {}", ctx.query),
                model: "counting-model".to_string(),
                tokens_used: 1,
                metadata: Default::default(),
            })
        }
    }

    async fn orchestrator_with(
        provider: Arc<dyn LlmProvider>,
        policies: Vec<DynamicPolicy>,
    ) -> Orchestrator {
        let router = Arc::new(
            LlmRouter::builder()
                .provider(provider)
                .retry(RetryConfig::no_retry())
                .build(),
        );
        let policy = Arc::new(
            PolicyEngine::new(
                Arc::new(InMemoryPolicyStore::with_policies(policies).unwrap()),
                Arc::new(DefaultRiskCalculator),
                PolicySettings::default(),
                DeploymentMode::Community,
            )
            .await,
        );

        Orchestrator::builder()
            .router(router)
            .policy(policy)
            .build()
            .unwrap()
    }

    fn request(query: &str) -> OrchestratorRequest {
        OrchestratorRequest::new(
            "req-1",
            query,
            UserContext::new("user", "a@example.com", "acme"),
        )
    }

    #[tokio::test]
    async fn test_happy_path_produces_answer() {
        let orchestrator = orchestrator_with(
            Arc::new(CountingProvider {
                calls: AtomicU64::new(0),
            }),
            vec![],
        )
        .await;

        let response = orchestrator.orchestrate(request("summarize rust syntax")).await;

        assert!(response.success, "error: {:?}", response.error);
        assert!(!response.data.is_empty());
        assert!(response.metadata.contains_key("execution_id"));
        assert_eq!(response.metadata["steps_failed"], 0);
    }

    #[tokio::test]
    async fn test_blocked_request_never_reaches_planner() {
        let block = DynamicPolicy::new("p1", "high-risk-block")
            .when(PolicyCondition::new(
                "risk_score",
                ConditionOperator::GreaterThan,
                serde_json::json!(0.8),
            ))
            .then(PolicyAction::new(ActionType::Block));

        let provider = Arc::new(CountingProvider {
            calls: AtomicU64::new(0),
        });
        let orchestrator = orchestrator_with(provider.clone(), vec![block]).await;

        let response = orchestrator.orchestrate(request("DROP TABLE users")).await;

        assert!(!response.success);
        let error = response.error.unwrap();
        assert_eq!(error.code, "request_blocked");
        assert_eq!(
            error.details.unwrap()["applied_policies"][0],
            "high-risk-block"
        );
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_request_rejected() {
        let orchestrator = orchestrator_with(
            Arc::new(CountingProvider {
                calls: AtomicU64::new(0),
            }),
            vec![],
        )
        .await;

        let mut bad = request("hello");
        bad.request_id = String::new();

        let response = orchestrator.orchestrate(bad).await;
        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, "invalid_request");
    }

    #[tokio::test]
    async fn test_builder_requires_router_and_policy() {
        assert!(Orchestrator::builder().build().is_err());
    }

    #[tokio::test]
    async fn test_from_config_without_providers() {
        let config = OrchestratorConfig::default();
        let orchestrator = Orchestrator::from_config(&config).await.unwrap();

        // No providers: planning and synthesis still fall back
        // deterministically, so a response is produced either way.
        let response = orchestrator.orchestrate(request("plan something")).await;
        assert!(response.error.is_some() || response.success);
    }
}
