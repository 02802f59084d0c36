//! Step processors
//!
//! Each step type is executed by a processor registered under its type tag.
//! The registry is open: embedders can add processors for new step types at
//! construction time.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::connector::ConnectorInvoker;
use crate::error::{MaestroError, Result};
use crate::request::OrchestratorRequest;
use crate::router::LlmRouter;
use crate::workflow::execution::WorkflowExecution;
use crate::workflow::model::WorkflowStep;
use crate::workflow::template::TemplateContext;

mod conditional;
mod connector_call;
mod function_call;
mod llm_call;

pub use conditional::ConditionalProcessor;
pub use connector_call::ConnectorCallProcessor;
pub use function_call::FunctionCallProcessor;
pub use llm_call::LlmCallProcessor;

/// Execution context handed to a processor.
///
/// Carries a snapshot of the in-progress execution taken at dispatch time,
/// so `{{steps.*}}` references resolve against a consistent view.
#[derive(Clone)]
pub struct ProcessorContext {
    /// Initial request input
    pub input: serde_json::Map<String, serde_json::Value>,

    /// Snapshot of the execution at dispatch
    pub execution: WorkflowExecution,

    /// The originating request
    pub request: Arc<OrchestratorRequest>,

    /// Cooperative cancellation signal
    pub cancel: CancellationToken,
}

impl ProcessorContext {
    /// Template resolution scope over this context.
    pub fn template_context(&self) -> TemplateContext<'_> {
        TemplateContext::new(&self.input, &self.execution.steps)
    }
}

/// Executes one kind of workflow step.
#[async_trait]
pub trait StepProcessor: Send + Sync {
    /// The step type tag this processor handles.
    fn step_type(&self) -> &'static str;

    /// Execute the step, returning its output map.
    async fn process(
        &self,
        step: &WorkflowStep,
        ctx: &ProcessorContext,
    ) -> Result<serde_json::Map<String, serde_json::Value>>;
}

/// Type-tag keyed processor registry.
pub struct ProcessorRegistry {
    processors: HashMap<&'static str, Arc<dyn StepProcessor>>,
}

impl ProcessorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            processors: HashMap::new(),
        }
    }

    /// Registry with the four standard processors.
    pub fn standard(router: Arc<LlmRouter>, connectors: Arc<dyn ConnectorInvoker>) -> Self {
        Self::new()
            .register(Arc::new(LlmCallProcessor::new(router)))
            .register(Arc::new(ConnectorCallProcessor::new(connectors)))
            .register(Arc::new(ConditionalProcessor))
            .register(Arc::new(FunctionCallProcessor::new()))
    }

    /// Register a processor under its type tag.
    pub fn register(mut self, processor: Arc<dyn StepProcessor>) -> Self {
        self.processors.insert(processor.step_type(), processor);
        self
    }

    /// Look up the processor for a step type.
    pub fn get(&self, step_type: &str) -> Option<&Arc<dyn StepProcessor>> {
        self.processors.get(step_type)
    }

    /// Dispatch a step to its processor.
    pub async fn process(
        &self,
        step: &WorkflowStep,
        ctx: &ProcessorContext,
    ) -> Result<serde_json::Map<String, serde_json::Value>> {
        let processor = self
            .get(step.type_name())
            .ok_or_else(|| MaestroError::UnsupportedStepType(step.type_name().to_string()))?;

        processor.process(step, ctx).await
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::request::UserContext;
    use crate::workflow::model::Workflow;

    /// Build a context over a workflow with the given completed steps.
    pub(crate) fn context_for(
        workflow: &Workflow,
        input: serde_json::Map<String, serde_json::Value>,
    ) -> ProcessorContext {
        let request = OrchestratorRequest::new(
            "req-test",
            "test query",
            UserContext::new("user", "test@example.com", "acme"),
        );

        ProcessorContext {
            input: input.clone(),
            execution: WorkflowExecution::new(workflow, input, request.user.clone()),
            request: Arc::new(request),
            cancel: CancellationToken::new(),
        }
    }
}
