//! Policy storage interface

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::model::{DynamicPolicy, PolicyRow};
use crate::error::{MaestroError, Result};

/// Durable source of truth for policies.
///
/// The engine never reads the store on the request path; a background task
/// refreshes an in-memory snapshot from it.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// All enabled policy rows.
    async fn list_enabled_policies(&self) -> Result<Vec<PolicyRow>>;

    /// Number of policies scoped to a tenant.
    async fn count_by_tenant(&self, tenant_id: &str) -> Result<usize>;

    /// Record an evaluation metric. Fire-and-forget; failures are ignored.
    async fn insert_metric(&self, policy_name: &str, duration_ms: u64, success: bool, tenant_id: &str);
}

/// Recorded evaluation metric
#[derive(Debug, Clone)]
pub struct PolicyMetric {
    pub policy_name: String,
    pub duration_ms: u64,
    pub success: bool,
    pub tenant_id: String,
}

/// In-memory policy store.
///
/// Serves tests and DATABASE_URL-less deployments. Reachability can be
/// toggled to exercise degraded paths.
pub struct InMemoryPolicyStore {
    rows: RwLock<Vec<PolicyRow>>,
    metrics: RwLock<Vec<PolicyMetric>>,
    reachable: AtomicBool,
}

impl InMemoryPolicyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
            metrics: RwLock::new(Vec::new()),
            reachable: AtomicBool::new(true),
        }
    }

    /// Create a store seeded with policies.
    pub fn with_policies(policies: Vec<DynamicPolicy>) -> Result<Self> {
        let rows = policies
            .iter()
            .map(PolicyRow::from_policy)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            rows: RwLock::new(rows),
            metrics: RwLock::new(Vec::new()),
            reachable: AtomicBool::new(true),
        })
    }

    /// Add a policy.
    pub async fn insert_policy(&self, policy: &DynamicPolicy) -> Result<()> {
        let row = PolicyRow::from_policy(policy)?;
        self.rows.write().await.push(row);
        Ok(())
    }

    /// Add a raw row (tests use this to plant corrupt rows).
    pub async fn insert_row(&self, row: PolicyRow) {
        self.rows.write().await.push(row);
    }

    /// Simulate an outage.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Recorded metrics, oldest first.
    pub async fn metrics(&self) -> Vec<PolicyMetric> {
        self.metrics.read().await.clone()
    }
}

impl Default for InMemoryPolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn list_enabled_policies(&self) -> Result<Vec<PolicyRow>> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(MaestroError::Storage("policy store unreachable".to_string()));
        }
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .filter(|row| row.enabled)
            .cloned()
            .collect())
    }

    async fn count_by_tenant(&self, tenant_id: &str) -> Result<usize> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(MaestroError::Storage("policy store unreachable".to_string()));
        }
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .filter(|row| row.tenant_id == tenant_id)
            .count())
    }

    async fn insert_metric(&self, policy_name: &str, duration_ms: u64, success: bool, tenant_id: &str) {
        self.metrics.write().await.push(PolicyMetric {
            policy_name: policy_name.to_string(),
            duration_ms,
            success,
            tenant_id: tenant_id.to_string(),
        });
    }
}
