//! Result aggregation
//!
//! Collapses completed step outputs into one synthesized answer. Synthesis
//! is LLM-assisted through the router; when routing fails the aggregator
//! falls back to a deterministic plain-text concatenation, which never
//! fails.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::error::{MaestroError, Result};
use crate::llm::RequestContext;
use crate::request::UserContext;
use crate::router::LlmRouter;
use crate::workflow::execution::{StepExecution, StepStatus};
use crate::workflow::template;

/// Summary statistics over a step result set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub total_time_ms: u64,
}

/// Steps eligible for aggregation: completed with a non-empty output.
pub fn successful_steps(steps: &[StepExecution]) -> Vec<&StepExecution> {
    steps
        .iter()
        .filter(|s| s.status == StepStatus::Completed && !s.output.is_empty())
        .collect()
}

/// Extract the text content of a step output.
///
/// Prefers `output.response`; serialized LLM responses contribute their
/// `content` field; anything else is stringified.
pub fn extract_content(step: &StepExecution) -> String {
    if let Some(response) = step.output.get("response") {
        return template::render_value(response);
    }

    if step.output.is_empty() {
        String::new()
    } else {
        serde_json::Value::Object(step.output.clone()).to_string()
    }
}

/// Deterministic plain-text synthesis of step results.
///
/// A pure function of its inputs; used whenever LLM-assisted synthesis is
/// unavailable.
pub fn fallback_concatenation(steps: &[&StepExecution]) -> String {
    let mut out = String::new();

    for (index, step) in steps.iter().enumerate() {
        let elapsed = if step.process_time.is_empty() {
            "n/a"
        } else {
            step.process_time.as_str()
        };
        out.push_str(&format!(
            "{}. {} (in {})\n   {}\n",
            index + 1,
            step.name,
            elapsed,
            extract_content(step)
        ));
    }

    out.push_str("\nNote: results were combined without model assistance.");
    out
}

/// LLM-assisted synthesis of multi-step results.
pub struct ResultAggregator {
    router: Arc<LlmRouter>,
}

impl ResultAggregator {
    pub fn new(router: Arc<LlmRouter>) -> Self {
        Self { router }
    }

    /// Synthesize step results into a single answer.
    ///
    /// # Errors
    ///
    /// Fails only when no step completed with output; router failures fall
    /// back to [`fallback_concatenation`].
    pub async fn aggregate(
        &self,
        steps: &[StepExecution],
        original_query: &str,
        user: &UserContext,
    ) -> Result<String> {
        let successful = successful_steps(steps);
        if successful.is_empty() {
            return Err(MaestroError::NoSuccessfulResults);
        }

        let mut prompt = format!(
            "Synthesize the results of a multi-step workflow into a single, \
             coherent answer to the original request.\n\nOriginal request: {}\n",
            original_query
        );
        prompt.push_str(&results_listing(&successful));
        prompt.push_str("\nAnswer the original request directly, weaving the task results together.");

        self.synthesize(prompt, &successful, user).await
    }

    /// Synthesize with a caller-supplied prompt; the results listing is
    /// appended.
    pub async fn aggregate_with_custom_prompt(
        &self,
        steps: &[StepExecution],
        custom_prompt: &str,
        user: &UserContext,
    ) -> Result<String> {
        let successful = successful_steps(steps);
        if successful.is_empty() {
            return Err(MaestroError::NoSuccessfulResults);
        }

        let mut prompt = custom_prompt.to_string();
        prompt.push_str(&results_listing(&successful));

        self.synthesize(prompt, &successful, user).await
    }

    async fn synthesize(
        &self,
        prompt: String,
        successful: &[&StepExecution],
        user: &UserContext,
    ) -> Result<String> {
        let ctx = RequestContext {
            query: prompt,
            request_type: "aggregation".to_string(),
            user_role: user.role.clone(),
            tenant_id: user.tenant_id.clone(),
            ..RequestContext::default()
        };

        match self.router.route(&ctx).await {
            Ok((response, _)) if !response.content.trim().is_empty() => Ok(response.content),
            Ok(_) => {
                warn!("synthesis returned empty content; using fallback concatenation");
                Ok(fallback_concatenation(successful))
            }
            Err(e) => {
                warn!(error = %e, "synthesis routing failed; using fallback concatenation");
                Ok(fallback_concatenation(successful))
            }
        }
    }

    /// Summary statistics for a step result set.
    pub fn stats(steps: &[StepExecution]) -> AggregationStats {
        let total = steps.len();
        let successful = steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count();
        let failed = steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .count();
        let total_time_ms = steps.iter().filter_map(|s| s.elapsed_ms()).sum();

        AggregationStats {
            total,
            successful,
            failed,
            success_rate: if total == 0 {
                0.0
            } else {
                successful as f64 / total as f64
            },
            total_time_ms,
        }
    }
}

fn results_listing(successful: &[&StepExecution]) -> String {
    let mut listing = String::from("\nTask results:\n");
    for step in successful {
        let elapsed = if step.process_time.is_empty() {
            "n/a"
        } else {
            step.process_time.as_str()
        };
        listing.push_str(&format!(
            "- {} [completed] (in {})\n  {}\n",
            step.name,
            elapsed,
            extract_content(step)
        ));
    }
    listing
}
