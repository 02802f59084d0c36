//! Workflow execution records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::request::UserContext;
use crate::workflow::model::Workflow;

/// Lifecycle state of a workflow execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Paused,
    Aborted,
}

/// Lifecycle state of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Record of one step's execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub name: String,
    pub status: StepStatus,

    /// Snapshot of the step input at dispatch time
    pub input: serde_json::Map<String, serde_json::Value>,

    /// Step output map; empty until completed
    #[serde(default)]
    pub output: serde_json::Map<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,

    /// Human-readable elapsed time ("850ms", "2.3s")
    #[serde(default)]
    pub process_time: String,
}

impl StepExecution {
    /// Create a pending step record.
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Pending,
            input: serde_json::Map::new(),
            output: serde_json::Map::new(),
            error: None,
            start_time: None,
            end_time: None,
            process_time: String::new(),
        }
    }

    /// Mark the step running with its input snapshot.
    pub fn start(&mut self, input: serde_json::Map<String, serde_json::Value>) {
        self.status = StepStatus::Running;
        self.input = input;
        self.start_time = Some(Utc::now());
    }

    /// Mark the step completed with its output.
    pub fn complete(&mut self, output: serde_json::Map<String, serde_json::Value>) {
        self.status = StepStatus::Completed;
        self.output = output;
        self.finish();
    }

    /// Mark the step failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
        self.finish();
    }

    /// Mark the step skipped.
    pub fn skip(&mut self) {
        self.status = StepStatus::Skipped;
    }

    /// Reset to pending, clearing any prior outcome.
    pub fn reset(&mut self) {
        self.status = StepStatus::Pending;
        self.output = serde_json::Map::new();
        self.error = None;
        self.start_time = None;
        self.end_time = None;
        self.process_time = String::new();
    }

    fn finish(&mut self) {
        let end = Utc::now();
        self.end_time = Some(end);
        if let Some(start) = self.start_time {
            let elapsed_ms = (end - start).num_milliseconds().max(0) as u64;
            self.process_time = format_elapsed(elapsed_ms);
        }
    }

    /// Elapsed milliseconds, when both timestamps are present.
    pub fn elapsed_ms(&self) -> Option<u64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }
}

/// Format an elapsed duration for humans.
pub fn format_elapsed(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{:.1}m", ms as f64 / 60_000.0)
    }
}

/// Record of one workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: String,
    pub workflow_name: String,
    pub status: ExecutionStatus,

    /// Initial request input
    pub input: serde_json::Map<String, serde_json::Value>,

    /// Resolved output templates; empty until completion
    #[serde(default)]
    pub output: serde_json::Map<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,

    /// Step records, in workflow order
    pub steps: Vec<StepExecution>,

    pub user_context: UserContext,

    /// Index of the step awaiting approval, when paused
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_at_step: Option<usize>,

    /// Whether parallel scheduling was enabled for this run
    #[serde(default)]
    pub parallel_enabled: bool,

    /// The workflow document, retained so a paused execution can resume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<Workflow>,
}

impl WorkflowExecution {
    /// Create a running execution for a workflow.
    pub fn new(
        workflow: &Workflow,
        input: serde_json::Map<String, serde_json::Value>,
        user_context: UserContext,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_name: workflow.metadata.name.clone(),
            status: ExecutionStatus::Running,
            input,
            output: serde_json::Map::new(),
            error: None,
            start_time: Utc::now(),
            end_time: None,
            steps: workflow
                .spec
                .steps
                .iter()
                .map(|s| StepExecution::pending(&s.name))
                .collect(),
            user_context,
            paused_at_step: None,
            parallel_enabled: false,
            workflow: Some(workflow.clone()),
        }
    }

    /// Find a step record by name.
    pub fn step(&self, name: &str) -> Option<&StepExecution> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Steps that completed successfully.
    pub fn completed_steps(&self) -> Vec<&StepExecution> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .collect()
    }

    /// Mark the execution completed.
    pub fn complete(&mut self, output: serde_json::Map<String, serde_json::Value>) {
        self.status = ExecutionStatus::Completed;
        self.output = output;
        self.end_time = Some(Utc::now());
    }

    /// Mark the execution failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.error = Some(error.into());
        self.end_time = Some(Utc::now());
    }

    /// Pause the execution at a step awaiting approval.
    pub fn pause(&mut self, step_index: usize) {
        self.status = ExecutionStatus::Paused;
        self.paused_at_step = Some(step_index);
    }
}
