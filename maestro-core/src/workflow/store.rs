//! Execution storage interface

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::execution::WorkflowExecution;
use crate::error::{MaestroError, Result};

/// Pluggable persistence for workflow executions.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Persist a new execution.
    async fn save(&self, execution: &WorkflowExecution) -> Result<()>;

    /// Fetch an execution by id.
    async fn get(&self, id: &str) -> Result<Option<WorkflowExecution>>;

    /// Persist an updated execution.
    async fn update(&self, execution: &WorkflowExecution) -> Result<()>;

    /// Executions belonging to a tenant, newest first.
    async fn list_by_tenant(&self, tenant_id: &str) -> Result<Vec<WorkflowExecution>>;
}

/// In-memory execution store for tests and DATABASE_URL-less deployments.
pub struct InMemoryExecutionStore {
    executions: RwLock<HashMap<String, WorkflowExecution>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self {
            executions: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored executions.
    pub async fn len(&self) -> usize {
        self.executions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.executions.read().await.is_empty()
    }
}

impl Default for InMemoryExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn save(&self, execution: &WorkflowExecution) -> Result<()> {
        let mut executions = self.executions.write().await;
        if executions.contains_key(&execution.id) {
            return Err(MaestroError::Storage(format!(
                "execution '{}' already exists",
                execution.id
            )));
        }
        executions.insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<WorkflowExecution>> {
        Ok(self.executions.read().await.get(id).cloned())
    }

    async fn update(&self, execution: &WorkflowExecution) -> Result<()> {
        self.executions
            .write()
            .await
            .insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn list_by_tenant(&self, tenant_id: &str) -> Result<Vec<WorkflowExecution>> {
        let mut executions: Vec<WorkflowExecution> = self
            .executions
            .read()
            .await
            .values()
            .filter(|e| e.user_context.tenant_id == tenant_id)
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(executions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::UserContext;
    use crate::workflow::model::{Workflow, WorkflowStep};

    fn execution(tenant: &str) -> WorkflowExecution {
        let workflow = Workflow::new("test", vec![WorkflowStep::llm_call("a", "p")]);
        WorkflowExecution::new(
            &workflow,
            serde_json::Map::new(),
            UserContext::new("user", "a@example.com", tenant),
        )
    }

    #[tokio::test]
    async fn test_save_get_update() {
        let store = InMemoryExecutionStore::new();
        let mut exec = execution("acme");

        store.save(&exec).await.unwrap();
        assert!(store.save(&exec).await.is_err()); // duplicate id

        exec.fail("boom");
        store.update(&exec).await.unwrap();

        let fetched = store.get(&exec.id).await.unwrap().unwrap();
        assert_eq!(fetched.error.as_deref(), Some("boom"));
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_tenant() {
        let store = InMemoryExecutionStore::new();
        store.save(&execution("acme")).await.unwrap();
        store.save(&execution("acme")).await.unwrap();
        store.save(&execution("other")).await.unwrap();

        assert_eq!(store.list_by_tenant("acme").await.unwrap().len(), 2);
        assert_eq!(store.list_by_tenant("other").await.unwrap().len(), 1);
        assert!(store.list_by_tenant("none").await.unwrap().is_empty());
    }
}
