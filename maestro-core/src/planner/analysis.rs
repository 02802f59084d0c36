//! Query analysis
//!
//! Planning starts by classifying the query: domain, complexity, and
//! whether the work can fan out. The classification is LLM-assisted with a
//! deterministic keyword fallback, so analysis never fails.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::llm::RequestContext;
use crate::planner::domains::{self, Domain};
use crate::router::LlmRouter;

/// Structured result of query analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub domain: String,

    /// 1 (trivial) to 5 (multi-faceted)
    pub complexity: u32,

    pub requires_parallel: bool,

    #[serde(default)]
    pub suggested_tasks: Vec<String>,

    #[serde(default)]
    pub reasoning: String,
}

const TRAVEL_KEYWORDS: &[&str] = &["trip", "flight", "hotel"];
const HEALTHCARE_KEYWORDS: &[&str] = &["diagnose", "symptom", "patient"];
const FINANCE_KEYWORDS: &[&str] = &["invest", "stock", "market"];

/// Markers that force sequential execution
const SEQUENTIAL_MARKERS: &[&str] = &["step by step", "then", "after"];

/// Extract the JSON object between the first `{` and the last `}`.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Parse an analysis document out of model output.
pub fn parse_analysis(content: &str) -> Option<QueryAnalysis> {
    let json = extract_json(content)?;
    let mut analysis: QueryAnalysis = serde_json::from_str(json).ok()?;
    analysis.complexity = analysis.complexity.clamp(1, 5);
    Some(analysis)
}

/// Deterministic keyword-based analysis.
pub fn heuristic_analysis(query: &str, domain_hint: Option<&str>) -> QueryAnalysis {
    let lower = query.to_lowercase();

    let domain = match domain_hint {
        Some(hint) => Domain::from_name(hint),
        None => {
            if TRAVEL_KEYWORDS.iter().any(|k| lower.contains(k)) {
                Domain::Travel
            } else if HEALTHCARE_KEYWORDS.iter().any(|k| lower.contains(k)) {
                Domain::Healthcare
            } else if FINANCE_KEYWORDS.iter().any(|k| lower.contains(k)) {
                Domain::Finance
            } else {
                Domain::Generic
            }
        }
    };

    let requires_parallel = !SEQUENTIAL_MARKERS.iter().any(|m| lower.contains(m));

    let mut complexity: u32 = 3;
    if query.len() < 20 {
        complexity -= 1;
    }
    if query.len() > 120 {
        complexity += 1;
    }
    if lower.contains(" and ") {
        complexity += 1;
    }
    let complexity = complexity.clamp(1, 5);

    QueryAnalysis {
        domain: domain.as_str().to_string(),
        complexity,
        requires_parallel,
        suggested_tasks: domains::template_for(domain)
            .tasks
            .iter()
            .map(|t| t.to_string())
            .collect(),
        reasoning: "keyword heuristics".to_string(),
    }
}

fn analysis_prompt(query: &str, domain_hint: Option<&str>) -> String {
    let hint_line = match domain_hint {
        Some(hint) => format!(
            "Domain hint: {} — {}\n",
            hint,
            domains::template_for(Domain::from_name(hint)).hint
        ),
        None => String::new(),
    };

    format!(
        "Analyze the following request and respond with a single JSON \
         object, no prose.\n\
         Fields: domain (travel|healthcare|finance|generic), complexity \
         (integer 1-5), requires_parallel (boolean), suggested_tasks (array \
         of short kebab-case task names), reasoning (one sentence).\n\
         {}Request: {}",
        hint_line, query
    )
}

/// Analyze a query, falling back to [`heuristic_analysis`] when routing or
/// parsing fails.
pub async fn analyze(router: &LlmRouter, query: &str, domain_hint: Option<&str>) -> QueryAnalysis {
    let ctx = RequestContext {
        query: analysis_prompt(query, domain_hint),
        request_type: "planning".to_string(),
        temperature: Some(0.2),
        ..RequestContext::default()
    };

    match router.route(&ctx).await {
        Ok((response, _)) => match parse_analysis(&response.content) {
            Some(analysis) => analysis,
            None => {
                debug!("analysis response was not parseable JSON; using heuristics");
                heuristic_analysis(query, domain_hint)
            }
        },
        Err(e) => {
            debug!(error = %e, "analysis routing failed; using heuristics");
            heuristic_analysis(query, domain_hint)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json() {
        assert_eq!(
            extract_json("prefix {\"a\": 1} suffix"),
            Some("{\"a\": 1}")
        );
        assert_eq!(extract_json("no braces"), None);
        assert_eq!(extract_json("} reversed {"), None);

        // Nested objects span first-to-last brace
        let nested = "x {\"a\": {\"b\": 2}} y";
        assert_eq!(extract_json(nested), Some("{\"a\": {\"b\": 2}}"));
    }

    #[test]
    fn test_parse_analysis_clamps_complexity() {
        let analysis = parse_analysis(
            r#"{"domain": "travel", "complexity": 99, "requires_parallel": true}"#,
        )
        .unwrap();
        assert_eq!(analysis.complexity, 5);
        assert_eq!(analysis.domain, "travel");
    }

    #[test]
    fn test_heuristic_domain_detection() {
        assert_eq!(heuristic_analysis("book me a flight", None).domain, "travel");
        assert_eq!(
            heuristic_analysis("patient reports these symptoms", None).domain,
            "healthcare"
        );
        assert_eq!(
            heuristic_analysis("should I invest in bonds", None).domain,
            "finance"
        );
        assert_eq!(heuristic_analysis("write a poem", None).domain, "generic");
    }

    #[test]
    fn test_hint_overrides_keywords() {
        let analysis = heuristic_analysis("book me a flight", Some("finance"));
        assert_eq!(analysis.domain, "finance");
    }

    #[test]
    fn test_sequential_markers_force_sequential() {
        assert!(!heuristic_analysis("do this step by step", None).requires_parallel);
        assert!(!heuristic_analysis("fetch data, then summarize it", None).requires_parallel);
        assert!(heuristic_analysis("compare three destinations", None).requires_parallel);
    }

    #[test]
    fn test_empty_query_still_analyzable() {
        let analysis = heuristic_analysis("", None);
        assert_eq!(analysis.domain, "generic");
        assert!(analysis.complexity >= 1);
        assert!(!analysis.suggested_tasks.is_empty());
    }

    #[test]
    fn test_complexity_scales_with_query() {
        let short = heuristic_analysis("hi", None);
        let long = heuristic_analysis(
            "compare flights and hotels and activities across Paris, Rome, and Madrid \
             for a two week family vacation in late summer with a moderate budget",
            None,
        );
        assert!(long.complexity > short.complexity);
    }
}
