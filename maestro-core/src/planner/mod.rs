//! Planning engine
//!
//! Turns a natural-language query into an executable [`Workflow`]. Both the
//! query analysis and the workflow generation are LLM-assisted with
//! deterministic fallbacks, so planning never fails: the template path
//! always yields a valid, non-empty workflow.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{MaestroError, Result};
use crate::llm::RequestContext;
use crate::router::LlmRouter;
use crate::workflow::model::{StepKind, Workflow, WorkflowStep};

pub mod analysis;
pub mod domains;
pub mod travel;

pub use analysis::QueryAnalysis;
pub use domains::Domain;
pub use travel::TravelParams;

/// Caller preference for scheduling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Let analysis decide
    #[default]
    Auto,
    Sequential,
    Parallel,
}

/// Tag recorded on generated workflows when execution should be sequential
pub const SEQUENTIAL_TAG: &str = "sequential";

/// Generates workflows from queries.
pub struct PlanningEngine {
    router: Arc<LlmRouter>,
    travel_connector: String,
}

impl PlanningEngine {
    pub fn new(router: Arc<LlmRouter>) -> Self {
        Self {
            router,
            travel_connector: "travel-api".to_string(),
        }
    }

    /// Override the connector name used for travel rewrites.
    pub fn with_travel_connector(mut self, name: impl Into<String>) -> Self {
        self.travel_connector = name.into();
        self
    }

    /// Generate an executable workflow for a query.
    ///
    /// Never fails: any LLM-dependent failure falls back to a template
    /// workflow built from heuristics.
    pub async fn generate_plan(
        &self,
        query: &str,
        domain_hint: Option<&str>,
        execution_mode: ExecutionMode,
        client_id: &str,
        request_id: &str,
        _context: &HashMap<String, serde_json::Value>,
    ) -> Workflow {
        let analysis = analysis::analyze(self.router.as_ref(), query, domain_hint).await;

        let domain = match domain_hint {
            Some(hint) => Domain::from_name(hint),
            None => Domain::from_name(&analysis.domain),
        };

        debug!(
            request_id,
            client_id,
            domain = domain.as_str(),
            complexity = analysis.complexity,
            "query analyzed"
        );

        let mut workflow = match self.generate_via_llm(query, domain, &analysis).await {
            Ok(workflow) => workflow,
            Err(e) => {
                debug!(error = %e, "workflow generation fell back to template");
                template_workflow(query, domain, &analysis)
            }
        };

        let sequential = match execution_mode {
            ExecutionMode::Sequential => true,
            ExecutionMode::Parallel => false,
            ExecutionMode::Auto => !analysis.requires_parallel,
        };
        if sequential && !workflow.metadata.tags.iter().any(|t| t == SEQUENTIAL_TAG) {
            workflow.metadata.tags.push(SEQUENTIAL_TAG.to_string());
        }

        if domain == Domain::Travel {
            travel::rewrite_travel_steps(&mut workflow, query, &self.travel_connector);
        }
        apply_synthesis_prompts(&mut workflow, domain, query);
        ensure_output(&mut workflow);

        // Post-processing must not have broken the document
        if workflow.validate().is_err() {
            let mut fallback = template_workflow(query, domain, &analysis);
            if domain == Domain::Travel {
                travel::rewrite_travel_steps(&mut fallback, query, &self.travel_connector);
            }
            apply_synthesis_prompts(&mut fallback, domain, query);
            ensure_output(&mut fallback);
            return fallback;
        }

        workflow
    }

    async fn generate_via_llm(
        &self,
        query: &str,
        domain: Domain,
        analysis: &QueryAnalysis,
    ) -> Result<Workflow> {
        let prompt = generation_prompt(query, domain, analysis);
        let ctx = RequestContext {
            query: prompt,
            request_type: "planning".to_string(),
            temperature: Some(0.2),
            ..RequestContext::default()
        };

        let (response, _) = self.router.route(&ctx).await?;

        let json = analysis::extract_json(&response.content).ok_or_else(|| {
            MaestroError::InvalidWorkflow("generation response contained no JSON object".to_string())
        })?;

        let workflow: Workflow = serde_json::from_str(json)
            .map_err(|e| MaestroError::InvalidWorkflow(format!("generated document: {}", e)))?;
        workflow.validate()?;

        if workflow.spec.steps.is_empty() {
            return Err(MaestroError::InvalidWorkflow(
                "generated workflow is empty".to_string(),
            ));
        }

        Ok(workflow)
    }
}

fn generation_prompt(query: &str, domain: Domain, analysis: &QueryAnalysis) -> String {
    let template = domains::template_for(domain);

    format!(
        "Generate a workflow document as a single JSON object, no prose.\n\
         Schema: {{\"metadata\": {{\"name\", \"description\", \"version\", \
         \"tags\"}}, \"spec\": {{\"timeout\", \"retries\", \"steps\", \
         \"output\"}}}}. Each step has a unique kebab-case name and a type \
         of llm-call (with prompt), connector-call (connector, operation, \
         parameters), conditional (condition) or function-call (function). \
         Steps may reference earlier results with \
         {{{{steps.<name>.output.<key>}}}} and the request with \
         {{{{input.query}}}}. End with a synthesize-results llm-call step.\n\
         Domain: {}. {}\n\
         Typical tasks: {}.\n\
         Aim for about {} steps before synthesis.\n\
         Request: {}",
        domain.as_str(),
        template.hint,
        template.tasks.join(", "),
        analysis.complexity,
        query
    )
}

/// Deterministic template workflow: one llm-call per suggested task, capped
/// at the analyzed complexity, plus a final synthesis step.
fn template_workflow(query: &str, domain: Domain, analysis: &QueryAnalysis) -> Workflow {
    let count = analysis.complexity.clamp(1, 5) as usize;

    let mut tasks: Vec<String> = analysis
        .suggested_tasks
        .iter()
        .filter(|t| !t.is_empty())
        .take(count)
        .cloned()
        .collect();
    if tasks.is_empty() {
        tasks = domains::template_for(domain)
            .tasks
            .iter()
            .take(count.max(1))
            .map(|t| t.to_string())
            .collect();
    }

    let mut steps: Vec<WorkflowStep> = tasks
        .iter()
        .map(|task| {
            WorkflowStep::llm_call(
                task,
                format!("Work on the task '{}' for this request: {{{{input.query}}}}", task),
            )
        })
        .collect();
    steps.push(WorkflowStep::llm_call(
        "synthesize-results",
        domains::synthesis_prompt(domain, query),
    ));

    let mut workflow = Workflow::new(format!("{}-workflow", domain.as_str()), steps);
    workflow.metadata.description = format!("Generated plan for: {}", query);
    workflow
        .with_output("result", "{{steps.synthesize-results.output.response}}")
}

/// Replace the prompt of every synthesis-named llm-call step with the
/// domain-specific synthesis prompt.
fn apply_synthesis_prompts(workflow: &mut Workflow, domain: Domain, query: &str) {
    for step in &mut workflow.spec.steps {
        if !step.is_synthesis() {
            continue;
        }
        if let StepKind::LlmCall { prompt, .. } = &mut step.kind {
            *prompt = domains::synthesis_prompt(domain, query);
        }
    }
}

/// Guarantee a resolvable output map.
fn ensure_output(workflow: &mut Workflow) {
    if !workflow.spec.output.is_empty() {
        return;
    }
    if let Some(last) = workflow.spec.steps.last() {
        let template = format!("{{{{steps.{}.output.response}}}}", last.name);
        workflow.spec.output.insert("result".to_string(), template);
    }
}
