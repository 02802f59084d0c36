//! Dynamic policy engine
//!
//! Evaluates per-request rules against an in-memory snapshot of the policy
//! store. The snapshot is copy-on-write: readers clone an `Arc` and never
//! block the background refresh task that publishes replacements.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{DeploymentMode, PolicySettings};
use crate::error::{MaestroError, Result};
use crate::request::OrchestratorRequest;

mod cache;
mod model;
mod risk;
mod snapshot;
mod store;

pub use model::{
    ActionType, ConditionOperator, DynamicPolicy, PolicyAction, PolicyCondition,
    PolicyEvaluationResult, PolicyRow, PolicyScope,
};
pub use risk::{DefaultRiskCalculator, RiskCalculator};
pub use store::{InMemoryPolicyStore, PolicyMetric, PolicyStore};

use cache::EvaluationCache;
use snapshot::{CompiledCondition, PolicySnapshot};

/// Evaluates requests against the active policy set.
pub struct PolicyEngine {
    store: Arc<dyn PolicyStore>,
    risk: Arc<dyn RiskCalculator>,
    snapshot: RwLock<Arc<PolicySnapshot>>,
    cache: EvaluationCache,
    settings: PolicySettings,
    mode: DeploymentMode,
    store_reachable: AtomicBool,
    refresh_cancel: CancellationToken,
    refresh_handle: Mutex<Option<JoinHandle<()>>>,
}

impl PolicyEngine {
    /// Create an engine and load the initial snapshot.
    ///
    /// When the store is unreachable at startup the engine installs a
    /// minimal built-in policy set and runs degraded but functional.
    pub async fn new(
        store: Arc<dyn PolicyStore>,
        risk: Arc<dyn RiskCalculator>,
        settings: PolicySettings,
        mode: DeploymentMode,
    ) -> Self {
        let (snapshot, reachable) = match Self::load_snapshot(store.as_ref()).await {
            Ok(snapshot) => {
                info!(policies = snapshot.len(), "policy snapshot loaded");
                (snapshot, true)
            }
            Err(e) => {
                warn!(error = %e, "policy store unavailable at startup; using built-in policies");
                (PolicySnapshot::build(Self::builtin_policies(), false), false)
            }
        };

        Self {
            store,
            risk,
            snapshot: RwLock::new(Arc::new(snapshot)),
            cache: EvaluationCache::new(settings.cache_ttl),
            settings,
            mode,
            store_reachable: AtomicBool::new(reachable),
            refresh_cancel: CancellationToken::new(),
            refresh_handle: Mutex::new(None),
        }
    }

    /// Minimal policy set used when storage is unavailable.
    fn builtin_policies() -> Vec<DynamicPolicy> {
        vec![DynamicPolicy::new("builtin-high-risk", "default-high-risk-block")
            .with_priority(100)
            .when(PolicyCondition::new(
                "risk_score",
                ConditionOperator::GreaterThan,
                serde_json::json!(0.9),
            ))
            .then(PolicyAction::new(ActionType::Block))]
    }

    async fn load_snapshot(store: &dyn PolicyStore) -> Result<PolicySnapshot> {
        let rows = store.list_enabled_policies().await?;

        let mut policies = Vec::with_capacity(rows.len());
        for row in rows {
            match row.parse() {
                Ok(policy) => policies.push(policy),
                Err(e) => warn!(policy = %row.name, error = %e, "skipping corrupt policy row"),
            }
        }

        Ok(PolicySnapshot::build(policies, true))
    }

    /// Start the background snapshot refresh.
    pub fn start_refresh(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let cancel = self.refresh_cancel.clone();
        let interval = self.settings.refresh_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it, the constructor
            // already loaded a snapshot.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => engine.refresh().await,
                }
            }
        });

        *self.refresh_handle.lock().unwrap() = Some(handle);
    }

    /// Refresh the snapshot from the store, keeping the previous one on
    /// failure.
    pub async fn refresh(&self) {
        match Self::load_snapshot(self.store.as_ref()).await {
            Ok(snapshot) => {
                debug!(policies = snapshot.len(), "policy snapshot refreshed");
                self.store_reachable.store(true, Ordering::SeqCst);
                *self.snapshot.write().unwrap() = Arc::new(snapshot);
            }
            Err(e) => {
                warn!(error = %e, "policy refresh failed; retaining previous snapshot");
                self.store_reachable.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Stop the background refresh.
    pub fn shutdown(&self) {
        self.refresh_cancel.cancel();
        if let Some(handle) = self.refresh_handle.lock().unwrap().take() {
            handle.abort();
        }
    }

    fn current_snapshot(&self) -> Arc<PolicySnapshot> {
        self.snapshot.read().unwrap().clone()
    }

    fn snapshot_degraded(&self, snapshot: &PolicySnapshot) -> bool {
        !snapshot.from_store || snapshot.age() > self.settings.max_staleness
    }

    /// Evaluate a request, returning the aggregated verdict.
    ///
    /// Never fails: evaluation always produces a result, possibly flagged
    /// `degraded` when the snapshot is stale or built-in.
    pub async fn evaluate(&self, request: &OrchestratorRequest) -> PolicyEvaluationResult {
        let started = std::time::Instant::now();

        if let Some(mut hit) = self.cache.get(request) {
            hit.database_accessed = false;
            hit.processing_time_ms = started.elapsed().as_millis() as u64;
            return hit;
        }

        let snapshot = self.current_snapshot();
        let mut risk_score = self.risk.score(request).clamp(0.0, 1.0);

        let mut result = PolicyEvaluationResult::permissive();
        result.database_accessed = snapshot.from_store;
        result.degraded = self.snapshot_degraded(&snapshot);

        let tenant_id = request.tenant_id().to_string();

        for compiled in snapshot.applicable(&tenant_id) {
            let matched = compiled
                .conditions
                .iter()
                .all(|condition| evaluate_condition(condition, request, risk_score));
            if !matched {
                continue;
            }

            result.applied_policies.push(compiled.policy.name.clone());

            for action in &compiled.policy.actions {
                match action.action {
                    ActionType::Block => result.allowed = false,
                    ActionType::Redact => {
                        result.required_actions.insert("redact".to_string());
                    }
                    ActionType::ModifyRisk => {
                        let modifier = action
                            .config
                            .get("modifier")
                            .and_then(|v| v.as_f64())
                            .filter(|v| v.is_finite())
                            .unwrap_or(1.0);
                        risk_score = (risk_score * modifier).clamp(0.0, 1.0);
                    }
                    ActionType::RequireApproval => {
                        result.required_actions.insert("require_approval".to_string());
                    }
                    ActionType::Log => {
                        debug!(policy = %compiled.policy.name, request_id = %request.request_id, "policy log action");
                    }
                    ActionType::Warn => {
                        warn!(policy = %compiled.policy.name, request_id = %request.request_id, "policy warn action");
                    }
                }
            }
        }

        result.risk_score = risk_score;
        result.processing_time_ms = started.elapsed().as_millis() as u64;

        self.cache.put(request, result.clone());
        self.record_metrics(&result, &tenant_id);

        result
    }

    fn record_metrics(&self, result: &PolicyEvaluationResult, tenant_id: &str) {
        if result.applied_policies.is_empty() {
            return;
        }

        let store = Arc::clone(&self.store);
        let names = result.applied_policies.clone();
        let duration_ms = result.processing_time_ms;
        let success = result.allowed;
        let tenant = tenant_id.to_string();

        tokio::spawn(async move {
            for name in names {
                store.insert_metric(&name, duration_ms, success, &tenant).await;
            }
        });
    }

    /// Every active policy, in priority order.
    pub fn list_active(&self) -> Vec<DynamicPolicy> {
        self.current_snapshot().all().cloned().collect()
    }

    /// Find an active policy by name.
    pub fn get_policy(&self, name: &str) -> Option<DynamicPolicy> {
        self.current_snapshot().get(name).cloned()
    }

    /// Engine health: store reachable, snapshot fresh, and at least one
    /// policy loaded.
    pub fn is_healthy(&self) -> bool {
        let snapshot = self.current_snapshot();
        self.store_reachable.load(Ordering::SeqCst)
            && snapshot.age() <= self.settings.max_staleness
            && !snapshot.is_empty()
    }

    /// Enforce the deployment-tier rules for a policy write.
    ///
    /// # Errors
    ///
    /// - `system_tier_immutable` for any write to the system tier
    /// - `org_tier_enterprise` for organization-scope writes under the
    ///   community tier
    /// - `policy_limit_exceeded` when a community tenant is at its cap
    pub async fn authorize_policy_write(&self, scope: PolicyScope, tenant_id: &str) -> Result<()> {
        match scope {
            PolicyScope::System => Err(MaestroError::SystemTierImmutable),
            PolicyScope::Organization => {
                if self.mode == DeploymentMode::Community {
                    Err(MaestroError::OrgTierEnterprise)
                } else {
                    Ok(())
                }
            }
            PolicyScope::Tenant => {
                if self.mode == DeploymentMode::Community {
                    let count = self.store.count_by_tenant(tenant_id).await?;
                    if count >= self.settings.community_policy_limit {
                        return Err(MaestroError::PolicyLimitExceeded(tenant_id.to_string()));
                    }
                }
                Ok(())
            }
        }
    }
}

impl Drop for PolicyEngine {
    fn drop(&mut self) {
        self.refresh_cancel.cancel();
    }
}

/// Evaluate one condition against the request and the running risk score.
fn evaluate_condition(
    compiled: &CompiledCondition,
    request: &OrchestratorRequest,
    risk_score: f64,
) -> bool {
    let condition = &compiled.condition;
    let Some(field) = field_value(request, risk_score, &condition.field) else {
        return false;
    };

    match condition.operator {
        ConditionOperator::Equals => loose_eq(&field, &condition.value),
        ConditionOperator::NotEquals => !loose_eq(&field, &condition.value),
        ConditionOperator::GreaterThan => numeric_cmp(&field, &condition.value, |a, b| a > b),
        ConditionOperator::LessThan => numeric_cmp(&field, &condition.value, |a, b| a < b),
        ConditionOperator::GreaterOrEqual => numeric_cmp(&field, &condition.value, |a, b| a >= b),
        ConditionOperator::LessOrEqual => numeric_cmp(&field, &condition.value, |a, b| a <= b),
        ConditionOperator::Contains => match &field {
            serde_json::Value::String(haystack) => {
                haystack.contains(string_form(&condition.value).as_str())
            }
            serde_json::Value::Array(items) => {
                items.iter().any(|item| loose_eq(item, &condition.value))
            }
            _ => false,
        },
        ConditionOperator::Regex => match &compiled.regex {
            Some(regex) => regex.is_match(&string_form(&field)),
            // Invalid patterns were rejected at snapshot build time
            None => false,
        },
        ConditionOperator::In => match &condition.value {
            serde_json::Value::Array(candidates) => {
                candidates.iter().any(|candidate| loose_eq(&field, candidate))
            }
            _ => false,
        },
    }
}

/// Extract a dotted-path field from the request.
fn field_value(
    request: &OrchestratorRequest,
    risk_score: f64,
    path: &str,
) -> Option<serde_json::Value> {
    match path {
        "query" => Some(serde_json::json!(request.query)),
        "request_type" => Some(serde_json::json!(request.request_type)),
        "risk_score" => Some(serde_json::json!(risk_score)),
        "user.role" => Some(serde_json::json!(request.user.role)),
        "user.email" => Some(serde_json::json!(request.user.email)),
        "user.tenant_id" => Some(serde_json::json!(request.user.tenant_id)),
        "user.permissions" => {
            let mut permissions: Vec<&String> = request.user.permissions.iter().collect();
            permissions.sort();
            Some(serde_json::json!(permissions))
        }
        "client.id" => Some(serde_json::json!(request.client.id)),
        "client.org_id" => Some(serde_json::json!(request.client.org_id)),
        "client.tenant_id" => Some(serde_json::json!(request.client.tenant_id)),
        path => {
            let key = path.strip_prefix("context.")?;
            let (head, rest) = match key.split_once('.') {
                Some((head, rest)) => (head, Some(rest)),
                None => (key, None),
            };

            let mut value = request.context.get(head)?;
            if let Some(rest) = rest {
                for segment in rest.split('.') {
                    value = value.get(segment)?;
                }
            }
            Some(value.clone())
        }
    }
}

fn string_form(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn loose_eq(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    a == b || string_form(a) == string_form(b)
}

fn numeric_cmp(a: &serde_json::Value, b: &serde_json::Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (as_number(a), as_number(b)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

fn as_number(value: &serde_json::Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::UserContext;
    use std::time::Duration;

    fn request(query: &str, role: &str) -> OrchestratorRequest {
        OrchestratorRequest::new(
            "req-1",
            query,
            UserContext::new(role, "a@example.com", "acme"),
        )
    }

    fn block_high_risk() -> DynamicPolicy {
        DynamicPolicy::new("p-block", "high-risk-block")
            .with_priority(10)
            .when(PolicyCondition::new(
                "risk_score",
                ConditionOperator::GreaterThan,
                serde_json::json!(0.8),
            ))
            .then(PolicyAction::new(ActionType::Block))
    }

    async fn engine_with(policies: Vec<DynamicPolicy>) -> PolicyEngine {
        let store = Arc::new(InMemoryPolicyStore::with_policies(policies).unwrap());
        PolicyEngine::new(
            store,
            Arc::new(DefaultRiskCalculator),
            PolicySettings::default(),
            DeploymentMode::Community,
        )
        .await
    }

    #[tokio::test]
    async fn test_high_risk_query_is_blocked() {
        let engine = engine_with(vec![block_high_risk()]).await;
        let result = engine.evaluate(&request("DROP TABLE users", "user")).await;

        assert!(!result.allowed);
        assert!(result.risk_score > 0.8);
        assert!(result
            .applied_policies
            .contains(&"high-risk-block".to_string()));
    }

    #[tokio::test]
    async fn test_benign_query_is_allowed() {
        let engine = engine_with(vec![block_high_risk()]).await;
        let result = engine.evaluate(&request("plan a trip", "user")).await;

        assert!(result.allowed);
        assert!(result.applied_policies.is_empty());
        assert!(!result.degraded);
        assert!(result.database_accessed);
    }

    #[tokio::test]
    async fn test_risk_score_stays_in_bounds() {
        let inflate = DynamicPolicy::new("p-inflate", "inflate")
            .with_priority(99)
            .when(PolicyCondition::new(
                "user.role",
                ConditionOperator::Equals,
                serde_json::json!("admin"),
            ))
            .then(PolicyAction::new(ActionType::ModifyRisk).with_config("modifier", serde_json::json!(100.0)));

        let engine = engine_with(vec![inflate]).await;
        let result = engine.evaluate(&request("hello", "admin")).await;

        assert_eq!(result.risk_score, 1.0);
    }

    #[tokio::test]
    async fn test_modify_risk_feeds_later_policies() {
        // Higher priority halves the risk before the block policy sees it
        let dampen = DynamicPolicy::new("p-dampen", "dampen")
            .with_priority(50)
            .when(PolicyCondition::new(
                "user.role",
                ConditionOperator::Equals,
                serde_json::json!("user"),
            ))
            .then(PolicyAction::new(ActionType::ModifyRisk).with_config("modifier", serde_json::json!(0.5)));

        let engine = engine_with(vec![dampen, block_high_risk()]).await;
        let result = engine.evaluate(&request("DROP TABLE users", "user")).await;

        // 0.9 * 0.5 = 0.45 which no longer exceeds the block threshold
        assert!(result.allowed);
        assert!((result.risk_score - 0.45).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_tenant_scoping() {
        let other_tenant = DynamicPolicy::new("p-other", "other-tenant-block")
            .for_tenant("other")
            .then(PolicyAction::new(ActionType::Block));

        let engine = engine_with(vec![other_tenant]).await;
        let result = engine.evaluate(&request("hello", "user")).await;

        assert!(result.allowed);
        assert!(result.applied_policies.is_empty());
    }

    #[tokio::test]
    async fn test_condition_operators() {
        let req = {
            let mut r = request("find hotels in Paris", "user");
            r.context
                .insert("channel".to_string(), serde_json::json!("mobile"));
            r
        };

        let cases = vec![
            (
                PolicyCondition::new("query", ConditionOperator::Contains, serde_json::json!("Paris")),
                true,
            ),
            (
                PolicyCondition::new("query", ConditionOperator::Regex, serde_json::json!("(?i)hotels?")),
                true,
            ),
            (
                PolicyCondition::new(
                    "user.role",
                    ConditionOperator::In,
                    serde_json::json!(["user", "guest"]),
                ),
                true,
            ),
            (
                PolicyCondition::new("context.channel", ConditionOperator::Equals, serde_json::json!("mobile")),
                true,
            ),
            (
                PolicyCondition::new("context.channel", ConditionOperator::NotEquals, serde_json::json!("web")),
                true,
            ),
            (
                PolicyCondition::new("context.missing", ConditionOperator::Equals, serde_json::json!("x")),
                false,
            ),
        ];

        for (condition, expected) in cases {
            let policy = DynamicPolicy::new("p", "probe")
                .when(condition.clone())
                .then(PolicyAction::new(ActionType::Log));
            let engine = engine_with(vec![policy]).await;
            let result = engine.evaluate(&req).await;

            assert_eq!(
                !result.applied_policies.is_empty(),
                expected,
                "condition {:?}",
                condition
            );
        }
    }

    #[tokio::test]
    async fn test_evaluation_is_memoised() {
        let engine = engine_with(vec![block_high_risk()]).await;
        let req = request("hello", "user");

        let first = engine.evaluate(&req).await;
        assert!(first.database_accessed);

        let second = engine.evaluate(&req).await;
        assert!(!second.database_accessed);
        assert_eq!(second.allowed, first.allowed);
    }

    #[tokio::test]
    async fn test_require_approval_surfaces() {
        let approval = DynamicPolicy::new("p-appr", "approval-gate")
            .when(PolicyCondition::new(
                "request_type",
                ConditionOperator::Equals,
                serde_json::json!("workflow"),
            ))
            .then(PolicyAction::new(ActionType::RequireApproval));

        let engine = engine_with(vec![approval]).await;
        let result = engine.evaluate(&request("hello", "user")).await;

        assert!(result.allowed);
        assert!(result.requires_approval());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_snapshot_reports_unhealthy_and_degraded() {
        let engine = engine_with(vec![block_high_risk()]).await;
        assert!(engine.is_healthy());

        tokio::time::advance(Duration::from_secs(6 * 60)).await;

        assert!(!engine.is_healthy());
        let result = engine.evaluate(&request("hello", "user")).await;
        assert!(result.degraded);
        assert!(result.allowed);
    }

    #[tokio::test]
    async fn test_startup_outage_falls_back_to_builtin() {
        let store = Arc::new(InMemoryPolicyStore::new());
        store.set_reachable(false);

        let engine = PolicyEngine::new(
            store,
            Arc::new(DefaultRiskCalculator),
            PolicySettings::default(),
            DeploymentMode::Community,
        )
        .await;

        assert!(!engine.is_healthy());
        assert_eq!(engine.list_active().len(), 1);

        let result = engine.evaluate(&request("DROP TABLE users", "user")).await;
        assert!(result.degraded);
        assert!(!result.database_accessed);
        // Built-in policy still blocks the worst inputs
        assert!(result.allowed); // risk 0.9 is not > 0.9
    }

    #[tokio::test]
    async fn test_refresh_failure_retains_snapshot() {
        let store = Arc::new(InMemoryPolicyStore::with_policies(vec![block_high_risk()]).unwrap());
        let engine = PolicyEngine::new(
            Arc::clone(&store) as Arc<dyn PolicyStore>,
            Arc::new(DefaultRiskCalculator),
            PolicySettings::default(),
            DeploymentMode::Community,
        )
        .await;

        store.set_reachable(false);
        engine.refresh().await;

        assert!(!engine.is_healthy());
        assert_eq!(engine.list_active().len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_rows_are_skipped() {
        let store = Arc::new(InMemoryPolicyStore::with_policies(vec![block_high_risk()]).unwrap());
        store
            .insert_row(PolicyRow {
                id: "bad".to_string(),
                name: "corrupt".to_string(),
                tenant_id: String::new(),
                priority: 0,
                enabled: true,
                conditions_json: "{broken".to_string(),
                actions_json: "[]".to_string(),
            })
            .await;

        let engine = PolicyEngine::new(
            store,
            Arc::new(DefaultRiskCalculator),
            PolicySettings::default(),
            DeploymentMode::Community,
        )
        .await;

        let active = engine.list_active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "high-risk-block");
    }

    #[tokio::test]
    async fn test_get_policy() {
        let engine = engine_with(vec![block_high_risk()]).await;

        assert!(engine.get_policy("high-risk-block").is_some());
        assert!(engine.get_policy("missing").is_none());
    }

    #[tokio::test]
    async fn test_tier_rules_community() {
        let policies: Vec<DynamicPolicy> = (0..10)
            .map(|i| DynamicPolicy::new(format!("p{}", i), format!("p{}", i)).for_tenant("acme"))
            .collect();
        let engine = engine_with(policies).await;

        assert!(matches!(
            engine
                .authorize_policy_write(PolicyScope::System, "acme")
                .await,
            Err(MaestroError::SystemTierImmutable)
        ));
        assert!(matches!(
            engine
                .authorize_policy_write(PolicyScope::Organization, "acme")
                .await,
            Err(MaestroError::OrgTierEnterprise)
        ));
        assert!(matches!(
            engine
                .authorize_policy_write(PolicyScope::Tenant, "acme")
                .await,
            Err(MaestroError::PolicyLimitExceeded(_))
        ));
        assert!(engine
            .authorize_policy_write(PolicyScope::Tenant, "fresh-tenant")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_tier_rules_enterprise() {
        let store = Arc::new(InMemoryPolicyStore::new());
        let engine = PolicyEngine::new(
            store,
            Arc::new(DefaultRiskCalculator),
            PolicySettings::default(),
            DeploymentMode::Enterprise,
        )
        .await;

        assert!(engine
            .authorize_policy_write(PolicyScope::Organization, "acme")
            .await
            .is_ok());
        assert!(matches!(
            engine
                .authorize_policy_write(PolicyScope::System, "acme")
                .await,
            Err(MaestroError::SystemTierImmutable)
        ));
    }
}
