//! conditional step processor

use async_trait::async_trait;

use crate::error::{MaestroError, Result};
use crate::workflow::model::{StepKind, WorkflowStep};
use crate::workflow::template;

use super::{ProcessorContext, StepProcessor};

/// Two-character operators must be matched before their one-character
/// prefixes.
const OPERATORS: &[&str] = &[">=", "<=", "==", "!=", ">", "<"];

/// Evaluates `<lhs> <op> <rhs>` expressions over resolved templates.
pub struct ConditionalProcessor;

#[async_trait]
impl StepProcessor for ConditionalProcessor {
    fn step_type(&self) -> &'static str {
        "conditional"
    }

    async fn process(
        &self,
        step: &WorkflowStep,
        ctx: &ProcessorContext,
    ) -> Result<serde_json::Map<String, serde_json::Value>> {
        let StepKind::Conditional { condition } = &step.kind else {
            return Err(MaestroError::UnsupportedStepType(step.type_name().to_string()));
        };

        let tpl = ctx.template_context();
        let resolved = template::resolve(condition, &tpl);

        let result = evaluate(&resolved).ok_or_else(|| MaestroError::StepFailed {
            step: step.name.clone(),
            message: format!("unparseable condition '{}'", resolved),
        })?;

        let mut output = serde_json::Map::new();
        output.insert("condition_result".to_string(), serde_json::json!(result));
        output.insert(
            "branch_taken".to_string(),
            serde_json::json!(if result { "if_true" } else { "if_false" }),
        );
        Ok(output)
    }
}

/// Evaluate a resolved comparison expression.
///
/// Both sides compare numerically when they parse as numbers, otherwise as
/// trimmed strings.
fn evaluate(expression: &str) -> Option<bool> {
    let (lhs, operator, rhs) = split_expression(expression)?;

    if let (Ok(lhs), Ok(rhs)) = (lhs.parse::<f64>(), rhs.parse::<f64>()) {
        return Some(match operator {
            "==" => lhs == rhs,
            "!=" => lhs != rhs,
            ">" => lhs > rhs,
            "<" => lhs < rhs,
            ">=" => lhs >= rhs,
            "<=" => lhs <= rhs,
            _ => return None,
        });
    }

    Some(match operator {
        "==" => lhs == rhs,
        "!=" => lhs != rhs,
        ">" => lhs > rhs,
        "<" => lhs < rhs,
        ">=" => lhs >= rhs,
        "<=" => lhs <= rhs,
        _ => return None,
    })
}

fn split_expression(expression: &str) -> Option<(&str, &str, &str)> {
    for operator in OPERATORS {
        if let Some(position) = expression.find(operator) {
            let lhs = expression[..position].trim();
            let rhs = expression[position + operator.len()..].trim();
            if lhs.is_empty() || rhs.is_empty() {
                return None;
            }
            return Some((lhs, operator, rhs));
        }
    }
    None
}
