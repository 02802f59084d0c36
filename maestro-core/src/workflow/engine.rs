//! Workflow execution engine
//!
//! Schedules step groups (mixed parallel/sequential), applies per-step and
//! per-workflow timeouts, performs policy pre-checks on sensitive steps,
//! and resolves the workflow's output templates when the last group
//! completes.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineSettings;
use crate::error::{MaestroError, Result};
use crate::policy::PolicyEngine;
use crate::request::OrchestratorRequest;
use crate::workflow::execution::{ExecutionStatus, StepStatus, WorkflowExecution};
use crate::workflow::model::{StepKind, Workflow, WorkflowStep};
use crate::workflow::processors::{ProcessorContext, ProcessorRegistry};
use crate::workflow::store::ExecutionStore;
use crate::workflow::template::{self, TemplateContext};

/// A contiguous run of steps scheduled together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepGroup {
    /// Indices into the workflow step list
    pub indices: Vec<usize>,
    /// Whether members run concurrently
    pub parallel: bool,
}

/// Partition steps into execution groups.
///
/// A group is parallel iff it has more than one member and none of them is
/// a synthesis step. Synthesis steps and the final step always form their
/// own sequential group. With parallelism disabled, everything runs in one
/// sequential group.
pub fn group_steps(steps: &[WorkflowStep], enable_parallel: bool) -> Vec<StepGroup> {
    if steps.is_empty() {
        return Vec::new();
    }

    if !enable_parallel {
        return vec![StepGroup {
            indices: (0..steps.len()).collect(),
            parallel: false,
        }];
    }

    let last = steps.len() - 1;
    let mut groups = Vec::new();
    let mut current: Vec<usize> = Vec::new();

    for (index, step) in steps.iter().enumerate() {
        if step.is_synthesis() || index == last {
            if !current.is_empty() {
                let parallel = current.len() > 1;
                groups.push(StepGroup {
                    indices: std::mem::take(&mut current),
                    parallel,
                });
            }
            groups.push(StepGroup {
                indices: vec![index],
                parallel: false,
            });
        } else {
            current.push(index);
        }
    }

    if !current.is_empty() {
        let parallel = current.len() > 1;
        groups.push(StepGroup {
            indices: current,
            parallel,
        });
    }

    groups
}

enum StepOutcome {
    Completed(serde_json::Map<String, serde_json::Value>),
    Failed(String),
    Cancelled,
    NeedsApproval,
}

enum GroupOutcome {
    Continue,
    Paused(usize),
    Aborted,
}

/// Executes workflows against the processor registry.
pub struct WorkflowEngine {
    processors: Arc<ProcessorRegistry>,
    store: Arc<dyn ExecutionStore>,
    policy: Option<Arc<PolicyEngine>>,
    settings: EngineSettings,
}

impl WorkflowEngine {
    pub fn new(
        processors: Arc<ProcessorRegistry>,
        store: Arc<dyn ExecutionStore>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            processors,
            store,
            policy: None,
            settings,
        }
    }

    /// Attach a policy engine for per-step pre-checks on sensitive steps.
    pub fn with_policy(mut self, policy: Arc<PolicyEngine>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Execute a workflow under the configured parallelism setting.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        input: serde_json::Map<String, serde_json::Value>,
        request: &OrchestratorRequest,
    ) -> Result<WorkflowExecution> {
        self.execute_with_parallelism(workflow, input, request, self.settings.enable_parallel)
            .await
    }

    /// Execute a workflow with an explicit parallelism toggle.
    pub async fn execute_with_parallelism(
        &self,
        workflow: &Workflow,
        input: serde_json::Map<String, serde_json::Value>,
        request: &OrchestratorRequest,
        enable_parallel: bool,
    ) -> Result<WorkflowExecution> {
        workflow.validate()?;

        let mut execution = WorkflowExecution::new(workflow, input, request.user.clone());
        execution.parallel_enabled = enable_parallel;
        self.store.save(&execution).await?;

        info!(
            execution_id = %execution.id,
            workflow = %workflow.metadata.name,
            request_id = %request.request_id,
            parallel = enable_parallel,
            "workflow execution started"
        );

        self.drive(&mut execution, workflow, request, 0, enable_parallel, false)
            .await;

        self.store.update(&execution).await?;
        Ok(execution)
    }

    /// Resume a paused execution from its recorded pause point.
    ///
    /// Approval is considered granted for the whole execution: the resumed
    /// run skips approval pre-checks, re-running the paused step and any
    /// cancelled siblings with the original input snapshot.
    pub async fn resume(
        &self,
        execution_id: &str,
        request: &OrchestratorRequest,
    ) -> Result<WorkflowExecution> {
        let mut execution = self
            .store
            .get(execution_id)
            .await?
            .ok_or_else(|| MaestroError::ExecutionNotFound(execution_id.to_string()))?;

        if execution.status != ExecutionStatus::Paused {
            return Err(MaestroError::NotPaused(execution_id.to_string()));
        }

        let workflow = execution.workflow.clone().ok_or_else(|| {
            MaestroError::InvalidWorkflow("paused execution has no workflow document".to_string())
        })?;

        let from_step = execution.paused_at_step.unwrap_or(0);
        execution.status = ExecutionStatus::Running;
        execution.paused_at_step = None;

        info!(execution_id, from_step, "resuming paused execution");

        let parallel = execution.parallel_enabled;
        self.drive(&mut execution, &workflow, request, from_step, parallel, true)
            .await;

        self.store.update(&execution).await?;
        Ok(execution)
    }

    /// Fetch an execution by id.
    pub async fn get_execution(&self, id: &str) -> Result<Option<WorkflowExecution>> {
        self.store.get(id).await
    }

    /// Executions belonging to a tenant.
    pub async fn list_by_tenant(&self, tenant_id: &str) -> Result<Vec<WorkflowExecution>> {
        self.store.list_by_tenant(tenant_id).await
    }

    async fn drive(
        &self,
        execution: &mut WorkflowExecution,
        workflow: &Workflow,
        request: &OrchestratorRequest,
        from_step: usize,
        enable_parallel: bool,
        approvals_granted: bool,
    ) {
        let cancel = CancellationToken::new();
        let request = Arc::new(request.clone());
        let budget = workflow.spec.timeout;

        let run = self.run_groups(
            execution,
            workflow,
            &request,
            from_step,
            enable_parallel,
            approvals_granted,
            &cancel,
        );

        if tokio::time::timeout(budget, run).await.is_err() {
            cancel.cancel();
            for step in &mut execution.steps {
                match step.status {
                    StepStatus::Running => step.fail("cancelled"),
                    StepStatus::Pending => step.skip(),
                    _ => {}
                }
            }
            execution.fail(format!("workflow timed out after {:?}", budget));
            warn!(execution_id = %execution.id, "workflow timed out");
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_groups(
        &self,
        execution: &mut WorkflowExecution,
        workflow: &Workflow,
        request: &Arc<OrchestratorRequest>,
        from_step: usize,
        enable_parallel: bool,
        approvals_granted: bool,
        cancel: &CancellationToken,
    ) {
        let groups = group_steps(&workflow.spec.steps, enable_parallel);
        let start_group = groups
            .iter()
            .position(|g| g.indices.contains(&from_step))
            .unwrap_or(0);
        let semaphore = Arc::new(Semaphore::new(self.settings.max_parallel_steps.max(1)));

        for group in groups.into_iter().skip(start_group) {
            let outcome = if group.parallel {
                self.run_parallel_group(
                    execution,
                    workflow,
                    request,
                    &group.indices,
                    cancel,
                    &semaphore,
                    approvals_granted,
                )
                .await
            } else {
                self.run_sequential_group(
                    execution,
                    workflow,
                    request,
                    &group.indices,
                    cancel,
                    approvals_granted,
                )
                .await
            };

            match outcome {
                GroupOutcome::Continue => {}
                GroupOutcome::Paused(step_index) => {
                    execution.pause(step_index);
                    info!(
                        execution_id = %execution.id,
                        step = %workflow.spec.steps[step_index].name,
                        "execution paused awaiting approval"
                    );
                    return;
                }
                GroupOutcome::Aborted => return,
            }
        }

        let tpl = TemplateContext::new(&execution.input, &execution.steps);
        let mut output = serde_json::Map::new();
        for (name, template_str) in &workflow.spec.output {
            output.insert(
                name.clone(),
                serde_json::json!(template::resolve(template_str, &tpl)),
            );
        }
        execution.complete(output);
    }

    async fn run_sequential_group(
        &self,
        execution: &mut WorkflowExecution,
        workflow: &Workflow,
        request: &Arc<OrchestratorRequest>,
        indices: &[usize],
        cancel: &CancellationToken,
        approvals_granted: bool,
    ) -> GroupOutcome {
        for &index in indices {
            if execution.steps[index].status == StepStatus::Completed {
                continue;
            }

            let step = &workflow.spec.steps[index];

            if !approvals_granted && is_sensitive(step) {
                if let Some(policy) = &self.policy {
                    let verdict = policy.evaluate(request).await;
                    if verdict.requires_approval() {
                        return GroupOutcome::Paused(index);
                    }
                    if !verdict.allowed {
                        let input = execution.input.clone();
                        execution.steps[index].start(input);
                        execution.steps[index].fail("blocked by policy");
                        self.skip_pending(execution);
                        execution.fail(format!("step '{}' blocked by policy", step.name));
                        return GroupOutcome::Aborted;
                    }
                }
            }

            match self.run_step(index, step, execution, request, cancel).await {
                StepOutcome::Completed(output) => {
                    execution.steps[index].complete(output);
                    debug!(step = %step.name, "step completed");
                }
                StepOutcome::Failed(message) => {
                    execution.steps[index].fail(message.clone());
                    self.skip_pending(execution);
                    execution.fail(format!("step '{}' failed: {}", step.name, message));
                    return GroupOutcome::Aborted;
                }
                StepOutcome::Cancelled => {
                    execution.steps[index].fail("cancelled");
                    self.skip_pending(execution);
                    execution.fail("cancelled");
                    return GroupOutcome::Aborted;
                }
                StepOutcome::NeedsApproval => return GroupOutcome::Paused(index),
            }
        }

        GroupOutcome::Continue
    }

    async fn run_step(
        &self,
        index: usize,
        step: &WorkflowStep,
        execution: &mut WorkflowExecution,
        request: &Arc<OrchestratorRequest>,
        cancel: &CancellationToken,
    ) -> StepOutcome {
        let input = execution.input.clone();
        execution.steps[index].start(input.clone());

        let ctx = ProcessorContext {
            input,
            execution: execution.clone(),
            request: Arc::clone(request),
            cancel: cancel.child_token(),
        };

        let budget = step.timeout.unwrap_or(self.settings.default_step_timeout);
        let work = self.processors.process(step, &ctx);

        tokio::select! {
            _ = cancel.cancelled() => StepOutcome::Cancelled,
            result = tokio::time::timeout(budget, work) => match result {
                Err(_) => StepOutcome::Failed(format!("timed out after {:?}", budget)),
                Ok(Ok(output)) => StepOutcome::Completed(output),
                Ok(Err(e)) => StepOutcome::Failed(e.to_string()),
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_parallel_group(
        &self,
        execution: &mut WorkflowExecution,
        workflow: &Workflow,
        request: &Arc<OrchestratorRequest>,
        indices: &[usize],
        cancel: &CancellationToken,
        semaphore: &Arc<Semaphore>,
        approvals_granted: bool,
    ) -> GroupOutcome {
        let group_cancel = cancel.child_token();

        let input = execution.input.clone();
        for &index in indices {
            execution.steps[index].start(input.clone());
        }
        // Siblings resolve {{steps.*}} against this shared dispatch snapshot
        let snapshot = execution.clone();

        let mut handles = Vec::with_capacity(indices.len());
        for &index in indices {
            let step = workflow.spec.steps[index].clone();
            let ctx = ProcessorContext {
                input: input.clone(),
                execution: snapshot.clone(),
                request: Arc::clone(request),
                cancel: group_cancel.child_token(),
            };
            let processors = Arc::clone(&self.processors);
            let policy = self.policy.clone();
            let semaphore = Arc::clone(semaphore);
            let group_cancel = group_cancel.clone();
            let budget = step.timeout.unwrap_or(self.settings.default_step_timeout);
            let check_policy = !approvals_granted && is_sensitive(&step);

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();

                if group_cancel.is_cancelled() {
                    return (index, StepOutcome::Cancelled);
                }

                if check_policy {
                    if let Some(policy) = &policy {
                        let verdict = policy.evaluate(&ctx.request).await;
                        if verdict.requires_approval() {
                            group_cancel.cancel();
                            return (index, StepOutcome::NeedsApproval);
                        }
                        if !verdict.allowed {
                            return (index, StepOutcome::Failed("blocked by policy".to_string()));
                        }
                    }
                }

                let work = processors.process(&step, &ctx);
                tokio::select! {
                    _ = group_cancel.cancelled() => (index, StepOutcome::Cancelled),
                    result = tokio::time::timeout(budget, work) => match result {
                        Err(_) => (index, StepOutcome::Failed(format!("timed out after {:?}", budget))),
                        Ok(Ok(output)) => (index, StepOutcome::Completed(output)),
                        Ok(Err(e)) => (index, StepOutcome::Failed(e.to_string())),
                    },
                }
            }));
        }

        let joined = futures::future::join_all(handles).await;
        let mut outcomes: Vec<(usize, StepOutcome)> =
            joined.into_iter().filter_map(|r| r.ok()).collect();
        outcomes.sort_by_key(|(index, _)| *index);

        let pause_at = outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, StepOutcome::NeedsApproval))
            .map(|(index, _)| *index)
            .min();

        if let Some(pause_index) = pause_at {
            // Started siblings were cancelled; reset the whole group so it
            // re-runs on resume with the same input snapshot.
            for &index in indices {
                execution.steps[index].reset();
            }
            return GroupOutcome::Paused(pause_index);
        }

        let mut any_completed = false;
        for (index, outcome) in outcomes {
            match outcome {
                StepOutcome::Completed(output) => {
                    execution.steps[index].complete(output);
                    any_completed = true;
                }
                StepOutcome::Failed(message) => {
                    warn!(step = %execution.steps[index].name, error = %message, "parallel step failed");
                    execution.steps[index].fail(message);
                }
                StepOutcome::Cancelled => execution.steps[index].fail("cancelled"),
                StepOutcome::NeedsApproval => unreachable!("handled above"),
            }
        }

        // A panicked or dropped task leaves its step running
        for &index in indices {
            if execution.steps[index].status == StepStatus::Running {
                execution.steps[index].fail("cancelled");
            }
        }

        if !any_completed {
            self.skip_pending(execution);
            execution.fail("all steps in parallel group failed");
            return GroupOutcome::Aborted;
        }

        GroupOutcome::Continue
    }

    fn skip_pending(&self, execution: &mut WorkflowExecution) {
        for step in &mut execution.steps {
            if step.status == StepStatus::Pending {
                step.skip();
            }
        }
    }
}

/// Connector calls touch external systems; they are the sensitive steps
/// gated by per-step policy checks.
fn is_sensitive(step: &WorkflowStep) -> bool {
    matches!(step.kind, StepKind::ConnectorCall { .. })
}
