//! function-call step processor
//!
//! Dispatches to a small registry of built-in pure functions. Each function
//! is a map-to-map transformation over the workflow input.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::{MaestroError, Result};
use crate::workflow::model::{StepKind, WorkflowStep};

use super::{ProcessorContext, StepProcessor};

type BuiltinFunction =
    fn(&serde_json::Map<String, serde_json::Value>) -> Result<serde_json::Map<String, serde_json::Value>>;

/// Executes function-call steps against the built-in registry.
pub struct FunctionCallProcessor {
    functions: HashMap<&'static str, BuiltinFunction>,
}

impl FunctionCallProcessor {
    /// Create a processor with the standard built-ins registered.
    pub fn new() -> Self {
        let mut functions: HashMap<&'static str, BuiltinFunction> = HashMap::new();
        functions.insert("data-validator", data_validator);
        functions.insert("risk-calculator", risk_calculator);
        functions.insert("auto-moderate", auto_moderate);
        functions.insert("synthesize", synthesize);
        Self { functions }
    }

    /// Registered function names.
    pub fn function_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.functions.keys().copied().collect();
        names.sort();
        names
    }
}

impl Default for FunctionCallProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepProcessor for FunctionCallProcessor {
    fn step_type(&self) -> &'static str {
        "function-call"
    }

    async fn process(
        &self,
        step: &WorkflowStep,
        ctx: &ProcessorContext,
    ) -> Result<serde_json::Map<String, serde_json::Value>> {
        let StepKind::FunctionCall { function } = &step.kind else {
            return Err(MaestroError::UnsupportedStepType(step.type_name().to_string()));
        };

        let builtin = self.functions.get(function.as_str()).ok_or_else(|| {
            MaestroError::StepFailed {
                step: step.name.clone(),
                message: format!("unknown function '{}'", function),
            }
        })?;

        builtin(&ctx.input)
    }
}

/// Check that the fields named in `required_fields` are present and
/// non-null.
fn data_validator(
    input: &serde_json::Map<String, serde_json::Value>,
) -> Result<serde_json::Map<String, serde_json::Value>> {
    let required: Vec<String> = input
        .get("required_fields")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();

    let missing: Vec<&String> = required
        .iter()
        .filter(|field| input.get(field.as_str()).is_none_or(|v| v.is_null()))
        .collect();

    let mut output = serde_json::Map::new();
    output.insert("valid".to_string(), serde_json::json!(missing.is_empty()));
    output.insert("missing".to_string(), serde_json::json!(missing));
    Ok(output)
}

/// Average the numeric values under `signals`, clamped to [0, 1].
fn risk_calculator(
    input: &serde_json::Map<String, serde_json::Value>,
) -> Result<serde_json::Map<String, serde_json::Value>> {
    let signals: Vec<f64> = input
        .get("signals")
        .and_then(|v| v.as_object())
        .map(|map| map.values().filter_map(|v| v.as_f64()).collect())
        .unwrap_or_default();

    let score = if signals.is_empty() {
        0.0
    } else {
        (signals.iter().sum::<f64>() / signals.len() as f64).clamp(0.0, 1.0)
    };

    let mut output = serde_json::Map::new();
    output.insert("risk_score".to_string(), serde_json::json!(score));
    output.insert("signal_count".to_string(), serde_json::json!(signals.len()));
    Ok(output)
}

const MODERATION_BLOCKLIST: &[&str] = &["hate", "violence", "weapon", "exploit"];

/// Flag string fields containing blocklisted terms.
fn auto_moderate(
    input: &serde_json::Map<String, serde_json::Value>,
) -> Result<serde_json::Map<String, serde_json::Value>> {
    let mut matches: Vec<String> = Vec::new();

    for (key, value) in input {
        if let Some(text) = value.as_str() {
            let lower = text.to_lowercase();
            for term in MODERATION_BLOCKLIST {
                if lower.contains(term) {
                    matches.push(format!("{}:{}", key, term));
                }
            }
        }
    }

    let mut output = serde_json::Map::new();
    output.insert("flagged".to_string(), serde_json::json!(!matches.is_empty()));
    output.insert("matches".to_string(), serde_json::json!(matches));
    Ok(output)
}

/// Concatenate the string fields of the input, key order.
fn synthesize(
    input: &serde_json::Map<String, serde_json::Value>,
) -> Result<serde_json::Map<String, serde_json::Value>> {
    let mut keys: Vec<&String> = input.keys().collect();
    keys.sort();

    let summary = keys
        .iter()
        .filter_map(|key| input[key.as_str()].as_str().map(|text| format!("{}: {}", key, text)))
        .collect::<Vec<_>>()
        .join("\n");

    let mut output = serde_json::Map::new();
    output.insert("summary".to_string(), serde_json::json!(summary));
    Ok(output)
}
