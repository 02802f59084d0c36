//! llm-call step processor

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use crate::aggregator;
use crate::error::{MaestroError, Result};
use crate::llm::RequestContext;
use crate::router::LlmRouter;
use crate::workflow::execution::{StepExecution, StepStatus};
use crate::workflow::model::{is_synthesis_step, StepKind, WorkflowStep};
use crate::workflow::template;

use super::{ProcessorContext, StepProcessor};

/// Output fields that are bookkeeping, not content; excluded from the
/// previous-outputs context handed to synthesis steps.
const INTERNAL_OUTPUT_FIELDS: &[&str] = &[
    "provider",
    "model",
    "tokens_used",
    "response_time",
    "duration",
    "cached",
    "connector",
];

/// Executes llm-call steps through the router.
///
/// Synthesis steps additionally receive a context block built from every
/// prior completed non-synthesis step, and fall back to deterministic
/// concatenation when routing fails.
pub struct LlmCallProcessor {
    router: Arc<LlmRouter>,
}

impl LlmCallProcessor {
    pub fn new(router: Arc<LlmRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl StepProcessor for LlmCallProcessor {
    fn step_type(&self) -> &'static str {
        "llm-call"
    }

    async fn process(
        &self,
        step: &WorkflowStep,
        ctx: &ProcessorContext,
    ) -> Result<serde_json::Map<String, serde_json::Value>> {
        let StepKind::LlmCall {
            prompt,
            provider,
            model,
            system_prompt,
            temperature,
        } = &step.kind
        else {
            return Err(MaestroError::UnsupportedStepType(step.type_name().to_string()));
        };

        let tpl = ctx.template_context();
        let mut resolved_prompt = template::resolve(prompt, &tpl);

        if step.is_synthesis() {
            if let Some(block) = previous_outputs_context(&ctx.execution.steps) {
                resolved_prompt.push_str(&block);
            }
        }

        let mut request_ctx =
            RequestContext::from_request(&ctx.request).with_prompt(resolved_prompt);
        if provider.is_some() {
            request_ctx.provider = provider.clone();
        }
        if model.is_some() {
            request_ctx.model = model.clone();
        }
        if let Some(system_prompt) = system_prompt {
            request_ctx.system_prompt = Some(template::resolve(system_prompt, &tpl));
        }
        if temperature.is_some() {
            request_ctx.temperature = *temperature;
        }
        if step.max_tokens.is_some() {
            request_ctx.max_tokens = step.max_tokens;
        }

        match self.router.route(&request_ctx).await {
            Ok((response, info)) => {
                let mut output = serde_json::Map::new();
                output.insert("provider".to_string(), serde_json::json!(info.name));
                output.insert("model".to_string(), serde_json::json!(info.model));
                output.insert(
                    "tokens_used".to_string(),
                    serde_json::json!(response.tokens_used),
                );
                output.insert(
                    "response_time".to_string(),
                    serde_json::json!(response.response_time_ms),
                );
                output.insert("response".to_string(), serde_json::to_value(&response)?);
                Ok(output)
            }
            Err(e) if step.is_synthesis() => {
                let successful: Vec<&StepExecution> = ctx
                    .execution
                    .steps
                    .iter()
                    .filter(|s| {
                        s.status == StepStatus::Completed
                            && !s.output.is_empty()
                            && !is_synthesis_step(&s.name)
                    })
                    .collect();

                if successful.is_empty() {
                    return Err(e);
                }

                warn!(step = %step.name, error = %e, "synthesis routing failed; concatenating prior results");

                let mut output = serde_json::Map::new();
                output.insert(
                    "response".to_string(),
                    serde_json::json!(aggregator::fallback_concatenation(&successful)),
                );
                output.insert("fallback".to_string(), serde_json::json!(true));
                Ok(output)
            }
            Err(e) => Err(e),
        }
    }
}

/// Build the previous-outputs context for a synthesis step.
///
/// Includes every prior completed non-synthesis step: its `response`
/// content plus all non-internal scalar output fields. Failed steps are
/// omitted.
fn previous_outputs_context(steps: &[StepExecution]) -> Option<String> {
    let mut block = String::from("\n\nPrevious task results:\n");
    let mut any = false;

    for step in steps {
        if step.status != StepStatus::Completed || is_synthesis_step(&step.name) {
            continue;
        }
        any = true;

        block.push_str(&format!("\n[{}]\n", step.name));

        if let Some(response) = step.output.get("response") {
            block.push_str(&template::render_value(response));
            block.push('\n');
        }

        for (key, value) in &step.output {
            if key == "response" || INTERNAL_OUTPUT_FIELDS.contains(&key.as_str()) {
                continue;
            }
            if value.is_string() || value.is_number() || value.is_boolean() {
                block.push_str(&format!("{}: {}\n", key, template::render_value(value)));
            }
        }
    }

    any.then_some(block)
}
