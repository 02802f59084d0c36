//! Workflow model and execution engine

pub mod engine;
pub mod execution;
pub mod model;
pub mod processors;
pub mod store;
pub mod template;

pub use engine::{group_steps, StepGroup, WorkflowEngine};
pub use execution::{
    format_elapsed, ExecutionStatus, StepExecution, StepStatus, WorkflowExecution,
};
pub use model::{is_synthesis_step, StepKind, Workflow, WorkflowMetadata, WorkflowSpec, WorkflowStep};
pub use processors::{
    ConditionalProcessor, ConnectorCallProcessor, FunctionCallProcessor, LlmCallProcessor,
    ProcessorContext, ProcessorRegistry, StepProcessor,
};
pub use store::{ExecutionStore, InMemoryExecutionStore};
pub use template::{resolve, resolve_map, TemplateContext};
