//! Request risk scoring

use once_cell::sync::Lazy;
use regex::Regex;

use crate::request::OrchestratorRequest;

/// Signal weights; triggered weights are summed and clamped to [0, 1]
const SQL_INJECTION_WEIGHT: f64 = 0.9;
const SENSITIVE_KEYWORD_WEIGHT: f64 = 0.7;
const ADMIN_ROLE_WEIGHT: f64 = 0.5;
const LARGE_RESULT_WEIGHT: f64 = 0.3;

/// Rows above this limit trigger the large-result signal
const LARGE_RESULT_LIMIT: u64 = 1000;

static SQL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\bdrop\s+table\b",
        r"(?i)\bdelete\s+from\b",
        r"(?i)\btruncate\s+table\b",
        r"(?i)\bunion\s+select\b",
        r"(?i)\binsert\s+into\b",
        r"(?i)\bupdate\s+\w+\s+set\b",
        r"(?i);\s*--",
        r"(?i)\bor\s+1\s*=\s*1\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static SENSITIVE_KEYWORDS: &[&str] = &[
    "password",
    "credential",
    "ssn",
    "social security",
    "credit card",
    "api key",
    "secret key",
    "private key",
];

static LARGE_RESULT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(all|every)\s+(records?|rows?|users?|accounts?)\b").unwrap()
});

/// Computes a saturating [0, 1] danger score for a request.
pub trait RiskCalculator: Send + Sync {
    fn score(&self, request: &OrchestratorRequest) -> f64;
}

/// Default calculator combining injection, keyword, role, and result-size
/// signals.
#[derive(Debug, Default)]
pub struct DefaultRiskCalculator;

impl DefaultRiskCalculator {
    fn large_result_requested(request: &OrchestratorRequest) -> bool {
        for key in ["max_results", "limit", "result_limit"] {
            if let Some(value) = request.context.get(key) {
                if value.as_u64().is_some_and(|n| n > LARGE_RESULT_LIMIT) {
                    return true;
                }
            }
        }
        LARGE_RESULT_PATTERN.is_match(&request.query)
    }
}

impl RiskCalculator for DefaultRiskCalculator {
    fn score(&self, request: &OrchestratorRequest) -> f64 {
        let mut score = 0.0;
        let query = request.query.to_lowercase();

        if SQL_PATTERNS.iter().any(|p| p.is_match(&request.query)) {
            score += SQL_INJECTION_WEIGHT;
        }

        if SENSITIVE_KEYWORDS.iter().any(|k| query.contains(k)) {
            score += SENSITIVE_KEYWORD_WEIGHT;
        }

        if request.user.role.eq_ignore_ascii_case("admin") {
            score += ADMIN_ROLE_WEIGHT;
        }

        if Self::large_result_requested(request) {
            score += LARGE_RESULT_WEIGHT;
        }

        score.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::UserContext;

    fn request(query: &str, role: &str) -> OrchestratorRequest {
        OrchestratorRequest::new(
            "req-1",
            query,
            UserContext::new(role, "a@example.com", "acme"),
        )
    }

    #[test]
    fn test_benign_query_scores_zero() {
        let calc = DefaultRiskCalculator;
        assert_eq!(calc.score(&request("plan a trip to Paris", "user")), 0.0);
    }

    #[test]
    fn test_sql_injection_scores_high() {
        let calc = DefaultRiskCalculator;
        let score = calc.score(&request("DROP TABLE users", "user"));
        assert!(score >= 0.9);
    }

    #[test]
    fn test_score_saturates_at_one() {
        let calc = DefaultRiskCalculator;
        // Injection + sensitive keyword + admin role sums past 1.0
        let score = calc.score(&request("DROP TABLE users; -- get password", "admin"));
        assert_eq!(score, 1.0);
    }

    #[test]
    fn test_sensitive_keyword_signal() {
        let calc = DefaultRiskCalculator;
        let score = calc.score(&request("what is the admin password", "user"));
        assert!((score - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_admin_role_signal() {
        let calc = DefaultRiskCalculator;
        let score = calc.score(&request("hello", "admin"));
        assert!((score - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_large_result_signal_from_context() {
        let calc = DefaultRiskCalculator;
        let mut req = request("list things", "user");
        req.context
            .insert("max_results".to_string(), serde_json::json!(5000));
        let score = calc.score(&req);
        assert!((score - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_large_result_signal_from_query() {
        let calc = DefaultRiskCalculator;
        let score = calc.score(&request("export all records please", "user"));
        assert!((score - 0.3).abs() < f64::EPSILON);
    }
}
