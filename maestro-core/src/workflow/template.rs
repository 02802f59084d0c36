//! Variable substitution for workflow templates
//!
//! Tokens have two forms: `{{input.K}}` resolves from the initial request
//! input, `{{steps.N.output.K}}` from a prior step's output map. Unresolved
//! tokens are left literal and logged.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::llm::LlmResponse;
use crate::workflow::execution::{StepExecution, StepStatus};

static TOKEN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_\-.]+)\s*\}\}").unwrap());

/// Resolution scope for template tokens
pub struct TemplateContext<'a> {
    pub input: &'a serde_json::Map<String, serde_json::Value>,
    pub steps: &'a [StepExecution],
}

impl<'a> TemplateContext<'a> {
    pub fn new(
        input: &'a serde_json::Map<String, serde_json::Value>,
        steps: &'a [StepExecution],
    ) -> Self {
        Self { input, steps }
    }
}

/// Resolve every token in `template`, leaving unknown tokens literal.
pub fn resolve(template: &str, ctx: &TemplateContext<'_>) -> String {
    TOKEN_PATTERN
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let path = &caps[1];
            match lookup(path, ctx) {
                Some(value) => render_value(&value),
                None => {
                    warn!(token = path, "unresolved template token left literal");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

/// Resolve string-valued templates inside a parameter map, recursively.
pub fn resolve_map(
    parameters: &serde_json::Map<String, serde_json::Value>,
    ctx: &TemplateContext<'_>,
) -> serde_json::Map<String, serde_json::Value> {
    parameters
        .iter()
        .map(|(key, value)| (key.clone(), resolve_value(value, ctx)))
        .collect()
}

fn resolve_value(value: &serde_json::Value, ctx: &TemplateContext<'_>) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => serde_json::Value::String(resolve(s, ctx)),
        serde_json::Value::Object(map) => serde_json::Value::Object(resolve_map(map, ctx)),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(|v| resolve_value(v, ctx)).collect())
        }
        other => other.clone(),
    }
}

/// Step names referenced by `{{steps.N...}}` tokens in `text`.
pub fn referenced_steps(text: &str) -> Vec<String> {
    TOKEN_PATTERN
        .captures_iter(text)
        .filter_map(|caps| {
            let path = caps.get(1)?.as_str();
            let rest = path.strip_prefix("steps.")?;
            rest.split('.').next().map(|s| s.to_string())
        })
        .collect()
}

fn lookup(path: &str, ctx: &TemplateContext<'_>) -> Option<serde_json::Value> {
    let mut parts = path.split('.');

    match parts.next()? {
        "input" => {
            let head = parts.next()?;
            let mut value = ctx.input.get(head)?;
            for segment in parts {
                value = value.get(segment)?;
            }
            Some(value.clone())
        }
        "steps" => {
            let step_name = parts.next()?;
            let step = ctx
                .steps
                .iter()
                .find(|s| s.name == step_name && s.status == StepStatus::Completed)?;

            if parts.next()? != "output" {
                return None;
            }

            let key = parts.next()?;
            let mut value = step.output.get(key)?;
            for segment in parts {
                value = value.get(segment)?;
            }
            Some(value.clone())
        }
        _ => None,
    }
}

/// Render a resolved value as template text.
///
/// Serialized LLM responses substitute their `content` field; strings are
/// inserted verbatim; everything else is compact JSON.
pub fn render_value(value: &serde_json::Value) -> String {
    if LlmResponse::is_response_value(value) {
        return value
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();
    }

    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed_step(name: &str, output: serde_json::Value) -> StepExecution {
        let mut step = StepExecution::pending(name);
        step.start(serde_json::Map::new());
        step.complete(output.as_object().cloned().unwrap_or_default());
        step
    }

    #[test]
    fn test_input_token_resolution() {
        let mut input = serde_json::Map::new();
        input.insert("query".to_string(), serde_json::json!("trip to Paris"));
        let ctx = TemplateContext::new(&input, &[]);

        assert_eq!(
            resolve("Plan: {{input.query}}", &ctx),
            "Plan: trip to Paris"
        );
    }

    #[test]
    fn test_step_output_resolution() {
        let input = serde_json::Map::new();
        let steps = vec![completed_step(
            "step1",
            serde_json::json!({"response": "X=42"}),
        )];
        let ctx = TemplateContext::new(&input, &steps);

        assert_eq!(
            resolve("derived: {{steps.step1.output.response}}", &ctx),
            "derived: X=42"
        );
    }

    #[test]
    fn test_llm_response_substitutes_content() {
        let input = serde_json::Map::new();
        let steps = vec![completed_step(
            "ask",
            serde_json::json!({
                "response": {
                    "content": "the answer",
                    "model": "stub-model",
                    "tokens_used": 5,
                    "response_time_ms": 10
                }
            }),
        )];
        let ctx = TemplateContext::new(&input, &steps);

        assert_eq!(
            resolve("{{steps.ask.output.response}}", &ctx),
            "the answer"
        );
    }

    #[test]
    fn test_unresolved_token_left_literal() {
        let input = serde_json::Map::new();
        let ctx = TemplateContext::new(&input, &[]);

        assert_eq!(
            resolve("hello {{steps.missing.output.x}}", &ctx),
            "hello {{steps.missing.output.x}}"
        );
    }

    #[test]
    fn test_failed_step_outputs_are_invisible() {
        let input = serde_json::Map::new();
        let mut failed = StepExecution::pending("broken");
        failed.start(serde_json::Map::new());
        failed.fail("boom");
        let steps = vec![failed];
        let ctx = TemplateContext::new(&input, &steps);

        assert_eq!(
            resolve("{{steps.broken.output.response}}", &ctx),
            "{{steps.broken.output.response}}"
        );
    }

    #[test]
    fn test_nested_path_resolution() {
        let input = serde_json::Map::new();
        let steps = vec![completed_step(
            "fetch",
            serde_json::json!({"response": {"city": {"code": "PAR"}}}),
        )];
        let ctx = TemplateContext::new(&input, &steps);

        assert_eq!(resolve("{{steps.fetch.output.response.city.code}}", &ctx), "PAR");
    }

    #[test]
    fn test_non_string_values_render_as_json() {
        let mut input = serde_json::Map::new();
        input.insert("count".to_string(), serde_json::json!(3));
        let ctx = TemplateContext::new(&input, &[]);

        assert_eq!(resolve("n={{input.count}}", &ctx), "n=3");
    }

    #[test]
    fn test_resolve_map_recurses() {
        let mut input = serde_json::Map::new();
        input.insert("city".to_string(), serde_json::json!("PAR"));
        let ctx = TemplateContext::new(&input, &[]);

        let mut params = serde_json::Map::new();
        params.insert("destination".to_string(), serde_json::json!("{{input.city}}"));
        params.insert(
            "nested".to_string(),
            serde_json::json!({"inner": "{{input.city}}", "fixed": 5}),
        );

        let resolved = resolve_map(&params, &ctx);
        assert_eq!(resolved["destination"], "PAR");
        assert_eq!(resolved["nested"]["inner"], "PAR");
        assert_eq!(resolved["nested"]["fixed"], 5);
    }

    #[test]
    fn test_referenced_steps_extraction() {
        let refs = referenced_steps(
            "{{steps.a.output.x}} and {{steps.b-2.output.y}} but not {{input.q}}",
        );
        assert_eq!(refs, vec!["a", "b-2"]);
    }
}
