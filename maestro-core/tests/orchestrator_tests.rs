//! End-to-end orchestration tests
//!
//! These assemble the full kernel (planner, router, policy engine,
//! workflow engine, aggregator) with stubbed providers and connectors and
//! drive it through the request entry point.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use maestro_core::config::{DeploymentMode, PolicySettings};
use maestro_core::prelude::*;

/// Provider that always fails, forcing every deterministic fallback path.
struct DownProvider;

#[async_trait]
impl LlmProvider for DownProvider {
    fn name(&self) -> &str {
        "down"
    }

    async fn generate(&self, _ctx: &RequestContext) -> Result<ProviderResponse> {
        Err(MaestroError::Provider {
            provider: "down".to_string(),
            message: "unavailable".to_string(),
        })
    }
}

/// Provider that echoes its prompt, counting invocations.
struct EchoProvider {
    calls: AtomicU64,
}

impl EchoProvider {
    fn new() -> Self {
        Self {
            calls: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl LlmProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, ctx: &RequestContext) -> Result<ProviderResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ProviderResponse {
            content: format!("echo: {}", ctx.query),
            model: "echo-model".to_string(),
            tokens_used: 3,
            metadata: Default::default(),
        })
    }
}

/// Travel connector stub with canned flight and hotel inventories.
struct TravelStub;

#[async_trait]
impl ConnectorHandler for TravelStub {
    async fn call(
        &self,
        operation: &str,
        _statement: Option<&str>,
        parameters: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value> {
        match operation {
            "search_flights" => Ok(serde_json::json!({
                "flights": [
                    {"from": parameters["origin"], "to": parameters["destination"], "price": 420},
                    {"from": parameters["origin"], "to": parameters["destination"], "price": 510},
                ],
                "destination_city": "Paris"
            })),
            "search_hotels" => Ok(serde_json::json!({
                "hotels": [
                    {"name": "Hotel Lumière", "city": "Paris", "nightly": 180},
                    {"name": "Le Petit Marais", "city": "Paris", "nightly": 140},
                ]
            })),
            other => Err(MaestroError::Connector {
                connector: "travel-api".to_string(),
                message: format!("unsupported operation '{}'", other),
            }),
        }
    }
}

async fn policy_engine(policies: Vec<DynamicPolicy>) -> Arc<PolicyEngine> {
    Arc::new(
        PolicyEngine::new(
            Arc::new(InMemoryPolicyStore::with_policies(policies).unwrap()),
            Arc::new(DefaultRiskCalculator),
            PolicySettings::default(),
            DeploymentMode::Community,
        )
        .await,
    )
}

async fn orchestrator(
    provider: Arc<dyn LlmProvider>,
    policies: Vec<DynamicPolicy>,
) -> Orchestrator {
    let router = Arc::new(
        LlmRouter::builder()
            .provider(provider)
            .retry(RetryConfig::no_retry())
            .build(),
    );
    let connectors: Arc<dyn ConnectorInvoker> =
        Arc::new(ConnectorRegistry::new().register("travel-api", Arc::new(TravelStub)));

    Orchestrator::builder()
        .router(router)
        .policy(policy_engine(policies).await)
        .connectors(connectors)
        .build()
        .unwrap()
}

fn request(query: &str) -> OrchestratorRequest {
    OrchestratorRequest::new(
        "req-e2e",
        query,
        UserContext::new("user", "traveler@example.com", "acme"),
    )
}

#[tokio::test]
async fn test_travel_happy_path() {
    // With the model down, planning takes the heuristic/template path and
    // synthesis concatenates; the connector results carry the answer.
    let orchestrator = orchestrator(Arc::new(DownProvider), vec![]).await;

    let req = request("3-day trip to Paris for 2 people from NYC")
        .with_context("domain", serde_json::json!("travel"));

    let response = orchestrator.orchestrate(req).await;
    assert!(response.success, "error: {:?}", response.error);

    // The workflow had both travel connector calls
    let execution_id = response.metadata["execution_id"].as_str().unwrap();
    let execution = orchestrator
        .engine()
        .get_execution(execution_id)
        .await
        .unwrap()
        .unwrap();

    let connector_steps: Vec<&StepExecution> = execution
        .steps
        .iter()
        .filter(|s| s.output.get("connector").is_some())
        .collect();
    assert!(connector_steps.len() >= 2);

    let operations: Vec<&str> = connector_steps
        .iter()
        .filter_map(|s| s.output.get("operation").and_then(|v| v.as_str()))
        .collect();
    assert!(operations.contains(&"search_flights"));
    assert!(operations.contains(&"search_hotels"));

    let workflow = execution.workflow.as_ref().unwrap();
    assert!(workflow
        .spec
        .steps
        .iter()
        .any(|s| s.name == "synthesize-results"));

    // Final answer is non-empty and mentions the destination
    assert!(!response.data.is_empty());
    assert!(response.data.contains("Paris"));
}

#[tokio::test]
async fn test_parallel_mixed_success() {
    // Direct engine drive: A succeeds, B fails, synthesis references only A
    let provider = Arc::new(EchoProvider::new());
    let orchestrator = orchestrator(provider, vec![]).await;

    let workflow = Workflow::new(
        "mixed",
        vec![
            WorkflowStep::llm_call("alpha", "describe topic alpha-topic"),
            WorkflowStep::connector_call(
                "beta",
                "travel-api",
                "unsupported_op",
                serde_json::Map::new(),
            ),
            WorkflowStep::llm_call("synthesize-results", "Combine the findings."),
        ],
    )
    .with_output("result", "{{steps.synthesize-results.output.response}}");

    let req = request("mixed run");
    let execution = orchestrator
        .engine()
        .execute(&workflow, serde_json::Map::new(), &req)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(
        execution.step("alpha").unwrap().status,
        StepStatus::Completed
    );
    assert_eq!(execution.step("beta").unwrap().status, StepStatus::Failed);

    let synthesis = execution.output["result"].as_str().unwrap();
    assert!(synthesis.contains("alpha-topic"));
    assert!(!synthesis.contains("unsupported_op"));
}

#[tokio::test]
async fn test_policy_block_short_circuits() {
    let block = DynamicPolicy::new("p1", "high-risk-block")
        .when(PolicyCondition::new(
            "risk_score",
            ConditionOperator::GreaterThan,
            serde_json::json!(0.8),
        ))
        .then(PolicyAction::new(ActionType::Block));

    let provider = Arc::new(EchoProvider::new());
    let orchestrator = orchestrator(provider.clone(), vec![block]).await;

    let response = orchestrator.orchestrate(request("DROP TABLE users")).await;

    assert!(!response.success);
    let error = response.error.unwrap();
    assert_eq!(error.code, "request_blocked");
    assert_eq!(
        error.details.unwrap()["applied_policies"][0],
        "high-risk-block"
    );
    // The planner never ran
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_router_failover_scenario() {
    struct AlwaysFails;

    #[async_trait]
    impl LlmProvider for AlwaysFails {
        fn name(&self) -> &str {
            "primary"
        }

        async fn generate(&self, _ctx: &RequestContext) -> Result<ProviderResponse> {
            Err(MaestroError::Provider {
                provider: "primary".to_string(),
                message: "always down".to_string(),
            })
        }
    }

    struct AlwaysWorks;

    #[async_trait]
    impl LlmProvider for AlwaysWorks {
        fn name(&self) -> &str {
            "secondary"
        }

        async fn generate(&self, _ctx: &RequestContext) -> Result<ProviderResponse> {
            Ok(ProviderResponse {
                content: "ok".to_string(),
                model: "secondary-model".to_string(),
                tokens_used: 1,
                metadata: Default::default(),
            })
        }
    }

    let router = LlmRouter::builder()
        .provider(Arc::new(AlwaysFails))
        .provider(Arc::new(AlwaysWorks))
        .strategy(RoutingStrategy::Failover)
        .retry(RetryConfig::no_retry())
        .build();

    let ctx = RequestContext::from_prompt("hello");
    let rounds = 8;
    for _ in 0..rounds {
        let (response, info) = router.route(&ctx).await.unwrap();
        assert_eq!(info.name, "secondary");
        assert_eq!(response.content, "ok");
    }

    let status = router.provider_status();
    assert!(status["primary"].error_count > 0);
    assert_eq!(status["secondary"].request_count, rounds);
    assert!(router.is_healthy());
}

#[tokio::test(start_paused = true)]
async fn test_policy_cache_staleness() {
    let block = DynamicPolicy::new("p1", "some-policy");
    let engine = policy_engine(vec![block]).await;

    assert!(engine.is_healthy());

    // Freeze storage and advance six minutes without a refresh
    tokio::time::advance(std::time::Duration::from_secs(6 * 60)).await;

    assert!(!engine.is_healthy());

    let result = engine
        .evaluate(&request("anything at all"))
        .await;
    assert!(result.degraded);
    assert!(result.allowed);
}

#[tokio::test]
async fn test_template_substitution_between_steps() {
    struct FixedProvider;

    #[async_trait]
    impl LlmProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn generate(&self, ctx: &RequestContext) -> Result<ProviderResponse> {
            let content = if ctx.query.contains("produce the value") {
                "X=42".to_string()
            } else {
                format!("got[{}]", ctx.query)
            };
            Ok(ProviderResponse {
                content,
                model: "fixed-model".to_string(),
                tokens_used: 1,
                metadata: Default::default(),
            })
        }
    }

    let orchestrator = orchestrator(Arc::new(FixedProvider), vec![]).await;

    let workflow = Workflow::new(
        "substitution",
        vec![
            WorkflowStep::llm_call("step1", "produce the value"),
            WorkflowStep::llm_call("step2", "derived: {{steps.step1.output.response}}"),
        ],
    )
    .with_output("result", "{{steps.step2.output.response}}");

    let execution = orchestrator
        .engine()
        .execute(&workflow, serde_json::Map::new(), &request("sub"))
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    // step2 saw exactly the resolved prompt
    assert_eq!(
        execution.output["result"].as_str().unwrap(),
        "got[derived: X=42]"
    );
}

#[tokio::test]
async fn test_zero_healthy_providers_degrades_gracefully() {
    let orchestrator = orchestrator(Arc::new(DownProvider), vec![]).await;

    // A workflow whose only llm step fails, after a connector succeeds
    let workflow = Workflow::new(
        "degraded",
        vec![
            WorkflowStep::connector_call(
                "search-hotels",
                "travel-api",
                "search_hotels",
                serde_json::Map::new(),
            ),
            WorkflowStep::llm_call("synthesize-results", "Combine."),
        ],
    )
    .with_output("result", "{{steps.synthesize-results.output.response}}");

    let execution = orchestrator
        .engine()
        .execute(&workflow, serde_json::Map::new(), &request("degraded"))
        .await
        .unwrap();

    // The synthesis step fell back to concatenation over the connector
    // output rather than failing the workflow
    assert_eq!(execution.status, ExecutionStatus::Completed);
    let result = execution.output["result"].as_str().unwrap();
    assert!(result.contains("Paris"));
    assert!(result.contains("without model assistance"));
}

#[tokio::test]
async fn test_tenant_isolation_of_executions() {
    let orchestrator = orchestrator(Arc::new(EchoProvider::new()), vec![]).await;

    let acme = orchestrator.orchestrate(request("first question")).await;
    assert!(acme.success);

    let other = OrchestratorRequest::new(
        "req-2",
        "second question",
        UserContext::new("user", "b@example.com", "globex"),
    );
    assert!(orchestrator.orchestrate(other).await.success);

    let acme_runs = orchestrator.engine().list_by_tenant("acme").await.unwrap();
    let globex_runs = orchestrator.engine().list_by_tenant("globex").await.unwrap();
    assert_eq!(acme_runs.len(), 1);
    assert_eq!(globex_runs.len(), 1);
    assert_ne!(acme_runs[0].id, globex_runs[0].id);
}
