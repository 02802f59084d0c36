//! Workflow document model
//!
//! Workflows are self-describing JSON documents: metadata plus an ordered
//! step list and an output template map. Loading and re-emitting a document
//! produces an equivalent workflow modulo key ordering.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use crate::error::{MaestroError, Result};
use crate::workflow::template;

/// Name fragments that mark a step as a synthesis step
pub const SYNTHESIS_KEYWORDS: &[&str] =
    &["synthesize", "combine", "final", "aggregate", "merge", "summary"];

/// Whether a step name denotes a synthesis step.
pub fn is_synthesis_step(name: &str) -> bool {
    let lower = name.to_lowercase();
    SYNTHESIS_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// A declarative multi-step workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub metadata: WorkflowMetadata,
    pub spec: WorkflowSpec,
}

/// Descriptive workflow metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub tags: Vec<String>,
}

/// Executable workflow body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    /// Wall-clock budget for the whole workflow
    #[serde(default = "default_workflow_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Retry budget for transient step failures
    #[serde(default)]
    pub retries: u32,

    /// Ordered step list
    pub steps: Vec<WorkflowStep>,

    /// Output name -> template string, resolved after the last step
    #[serde(default)]
    pub output: BTreeMap<String, String>,
}

fn default_workflow_timeout() -> Duration {
    Duration::from_secs(120)
}

/// A single typed unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Unique within the workflow
    pub name: String,

    /// Per-step wall-clock budget
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// Token budget for llm-call steps
    #[serde(default)]
    pub max_tokens: Option<u32>,

    #[serde(flatten)]
    pub kind: StepKind,
}

/// Variant payload of a step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StepKind {
    /// Prompt a language model through the router
    LlmCall {
        /// Prompt template
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        system_prompt: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temperature: Option<f32>,
    },

    /// Invoke an external connector operation
    ConnectorCall {
        connector: String,
        operation: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        statement: Option<String>,
        /// Parameter name -> value template
        #[serde(default)]
        parameters: serde_json::Map<String, serde_json::Value>,
    },

    /// Evaluate a boolean expression over prior outputs
    Conditional {
        /// `<lhs> <op> <rhs>` where both sides may be templates
        condition: String,
    },

    /// Dispatch to a registered built-in function
    FunctionCall { function: String },
}

impl WorkflowStep {
    /// The step's type tag, as it appears in documents.
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            StepKind::LlmCall { .. } => "llm-call",
            StepKind::ConnectorCall { .. } => "connector-call",
            StepKind::Conditional { .. } => "conditional",
            StepKind::FunctionCall { .. } => "function-call",
        }
    }

    /// Whether this step synthesizes prior results.
    pub fn is_synthesis(&self) -> bool {
        is_synthesis_step(&self.name)
    }

    /// Convenience constructor for llm-call steps.
    pub fn llm_call(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timeout: None,
            max_tokens: None,
            kind: StepKind::LlmCall {
                prompt: prompt.into(),
                provider: None,
                model: None,
                system_prompt: None,
                temperature: None,
            },
        }
    }

    /// Convenience constructor for connector-call steps.
    pub fn connector_call(
        name: impl Into<String>,
        connector: impl Into<String>,
        operation: impl Into<String>,
        parameters: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            name: name.into(),
            timeout: None,
            max_tokens: None,
            kind: StepKind::ConnectorCall {
                connector: connector.into(),
                operation: operation.into(),
                statement: None,
                parameters,
            },
        }
    }

    /// Convenience constructor for conditional steps.
    pub fn conditional(name: impl Into<String>, condition: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timeout: None,
            max_tokens: None,
            kind: StepKind::Conditional {
                condition: condition.into(),
            },
        }
    }

    /// Convenience constructor for function-call steps.
    pub fn function_call(name: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timeout: None,
            max_tokens: None,
            kind: StepKind::FunctionCall {
                function: function.into(),
            },
        }
    }

    /// Template strings carried by this step.
    fn templates(&self) -> Vec<&str> {
        match &self.kind {
            StepKind::LlmCall { prompt, .. } => vec![prompt.as_str()],
            StepKind::ConnectorCall { parameters, statement, .. } => {
                let mut templates: Vec<&str> = parameters
                    .values()
                    .filter_map(|v| v.as_str())
                    .collect();
                if let Some(statement) = statement {
                    templates.push(statement.as_str());
                }
                templates
            }
            StepKind::Conditional { condition } => vec![condition.as_str()],
            StepKind::FunctionCall { .. } => Vec::new(),
        }
    }
}

impl Workflow {
    /// Create a workflow with the given name and steps.
    pub fn new(name: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self {
            metadata: WorkflowMetadata {
                name: name.into(),
                description: String::new(),
                version: "1".to_string(),
                tags: Vec::new(),
            },
            spec: WorkflowSpec {
                timeout: default_workflow_timeout(),
                retries: 0,
                steps,
                output: BTreeMap::new(),
            },
        }
    }

    /// Set an output template.
    pub fn with_output(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.spec.output.insert(name.into(), template.into());
        self
    }

    /// Parse a workflow document from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let workflow: Workflow = serde_json::from_str(json)
            .map_err(|e| MaestroError::InvalidWorkflow(format!("parse error: {}", e)))?;
        workflow.validate()?;
        Ok(workflow)
    }

    /// Validate structural invariants.
    ///
    /// Step names must be unique, and every `{{steps.N.output.K}}`
    /// reference must resolve to a step that appears earlier in execution
    /// order.
    pub fn validate(&self) -> Result<()> {
        if self.spec.steps.is_empty() {
            return Err(MaestroError::InvalidWorkflow(
                "workflow has no steps".to_string(),
            ));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for step in &self.spec.steps {
            if step.name.is_empty() {
                return Err(MaestroError::InvalidWorkflow(
                    "step name must not be empty".to_string(),
                ));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(MaestroError::InvalidWorkflow(format!(
                    "duplicate step name '{}'",
                    step.name
                )));
            }
        }

        // Step templates may only reference earlier steps
        let mut earlier: HashSet<&str> = HashSet::new();
        for step in &self.spec.steps {
            for text in step.templates() {
                for referenced in template::referenced_steps(text) {
                    if !earlier.contains(referenced.as_str()) {
                        return Err(MaestroError::InvalidWorkflow(format!(
                            "step '{}' references '{}' which does not appear earlier",
                            step.name, referenced
                        )));
                    }
                }
            }
            earlier.insert(step.name.as_str());
        }

        // Output templates may reference any step
        let all: HashSet<&str> = self.spec.steps.iter().map(|s| s.name.as_str()).collect();
        for (output_name, text) in &self.spec.output {
            for referenced in template::referenced_steps(text) {
                if !all.contains(referenced.as_str()) {
                    return Err(MaestroError::InvalidWorkflow(format!(
                        "output '{}' references unknown step '{}'",
                        output_name, referenced
                    )));
                }
            }
        }

        Ok(())
    }

    /// Find a step by name.
    pub fn step(&self, name: &str) -> Option<&WorkflowStep> {
        self.spec.steps.iter().find(|s| s.name == name)
    }
}
