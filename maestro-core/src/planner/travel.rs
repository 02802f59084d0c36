//! Travel-domain post-processing
//!
//! Rewrites flight and hotel steps from llm-call to connector-call against
//! the travel connector, with parameters extracted from the query text.

use chrono::{Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::workflow::model::{StepKind, Workflow};

/// Extracted search parameters with fixed defaults
#[derive(Debug, Clone, PartialEq)]
pub struct TravelParams {
    pub origin: String,
    pub destination: String,
    /// ISO date (YYYY-MM-DD)
    pub departure_date: String,
    pub adults: u32,
    pub max_results: u32,
    pub days: Option<u32>,
}

const DEFAULT_ORIGIN: &str = "NYC";
const DEFAULT_DESTINATION: &str = "PAR";
const DEFAULT_ADULTS: u32 = 1;
const DEFAULT_MAX_RESULTS: u32 = 5;

static FROM_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bfrom\s+([a-z][a-z\s]*?)(?:\s+(?:to|for|on|in)\b|[,.!?]|$)").unwrap()
});
static TO_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bto\s+([a-z][a-z\s]*?)(?:\s+(?:from|for|on|in)\b|[,.!?]|$)").unwrap()
});
static DAYS_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(\d+)[-\s]*day").unwrap());
static ADULTS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+)\s*(?:adults?|people|persons?|travell?ers?)").unwrap()
});

/// Map a city name to its IATA-style code; unknown cities pass through
/// uppercased when they already look like codes.
fn city_code(name: &str) -> Option<String> {
    let normalized = name.trim().to_lowercase();
    let code = match normalized.as_str() {
        "new york" | "new york city" | "nyc" => "NYC",
        "paris" | "par" => "PAR",
        "london" | "lon" => "LON",
        "tokyo" | "tyo" => "TYO",
        "rome" | "rom" => "ROM",
        "madrid" | "mad" => "MAD",
        "berlin" | "ber" => "BER",
        "amsterdam" | "ams" => "AMS",
        "san francisco" | "sfo" => "SFO",
        "los angeles" | "lax" => "LAX",
        _ => {
            let trimmed = name.trim();
            if trimmed.len() == 3 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
                return Some(trimmed.to_uppercase());
            }
            return None;
        }
    };
    Some(code.to_string())
}

/// Extract travel parameters from free text, with defaults.
pub fn extract_params(query: &str) -> TravelParams {
    let origin = FROM_PATTERN
        .captures(query)
        .and_then(|c| city_code(&c[1]))
        .unwrap_or_else(|| DEFAULT_ORIGIN.to_string());

    let destination = TO_PATTERN
        .captures(query)
        .and_then(|c| city_code(&c[1]))
        .unwrap_or_else(|| DEFAULT_DESTINATION.to_string());

    let days = DAYS_PATTERN
        .captures(query)
        .and_then(|c| c[1].parse::<u32>().ok());

    let adults = ADULTS_PATTERN
        .captures(query)
        .and_then(|c| c[1].parse::<u32>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_ADULTS);

    let departure_date = (Utc::now().date_naive() + Duration::days(7))
        .format("%Y-%m-%d")
        .to_string();

    TravelParams {
        origin,
        destination,
        departure_date,
        adults,
        max_results: DEFAULT_MAX_RESULTS,
        days,
    }
}

/// Rewrite flight/hotel-named steps into connector calls.
pub fn rewrite_travel_steps(workflow: &mut Workflow, query: &str, connector: &str) {
    let params = extract_params(query);

    for step in &mut workflow.spec.steps {
        let lower = step.name.to_lowercase();

        if lower.contains("flight") {
            let mut parameters = serde_json::Map::new();
            parameters.insert("origin".to_string(), serde_json::json!(params.origin));
            parameters.insert(
                "destination".to_string(),
                serde_json::json!(params.destination),
            );
            parameters.insert(
                "departure_date".to_string(),
                serde_json::json!(params.departure_date),
            );
            parameters.insert("adults".to_string(), serde_json::json!(params.adults));
            parameters.insert(
                "max_results".to_string(),
                serde_json::json!(params.max_results),
            );

            step.kind = StepKind::ConnectorCall {
                connector: connector.to_string(),
                operation: "search_flights".to_string(),
                statement: None,
                parameters,
            };
        } else if lower.contains("hotel") {
            let mut parameters = serde_json::Map::new();
            parameters.insert(
                "city_code".to_string(),
                serde_json::json!(params.destination),
            );
            parameters.insert(
                "check_in".to_string(),
                serde_json::json!(params.departure_date),
            );
            parameters.insert("adults".to_string(), serde_json::json!(params.adults));
            if let Some(days) = params.days {
                parameters.insert("nights".to_string(), serde_json::json!(days));
            }
            parameters.insert(
                "max_results".to_string(),
                serde_json::json!(params.max_results),
            );

            step.kind = StepKind::ConnectorCall {
                connector: connector.to_string(),
                operation: "search_hotels".to_string(),
                statement: None,
                parameters,
            };
        }
    }
}
