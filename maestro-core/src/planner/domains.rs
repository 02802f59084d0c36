//! Domain templates for planning

use serde::{Deserialize, Serialize};

/// Known planning domains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Travel,
    Healthcare,
    Finance,
    Generic,
}

impl Domain {
    /// Parse a domain name; unknown names map to `Generic`.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "travel" => Domain::Travel,
            "healthcare" => Domain::Healthcare,
            "finance" => Domain::Finance,
            _ => Domain::Generic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Travel => "travel",
            Domain::Healthcare => "healthcare",
            Domain::Finance => "finance",
            Domain::Generic => "generic",
        }
    }
}

/// Common task names and a planning hint for a domain
pub struct DomainTemplate {
    pub tasks: &'static [&'static str],
    pub hint: &'static str,
}

static TRAVEL: DomainTemplate = DomainTemplate {
    tasks: &[
        "search-flights",
        "search-hotels",
        "plan-itinerary",
        "estimate-budget",
    ],
    hint: "Travel requests usually need flight and hotel availability, an \
           itinerary matched to the trip length, and a budget estimate.",
};

static HEALTHCARE: DomainTemplate = DomainTemplate {
    tasks: &[
        "gather-symptoms",
        "research-conditions",
        "review-guidelines",
        "summarize-findings",
    ],
    hint: "Healthcare requests need careful symptom gathering, literature \
           review, and a clinically-phrased summary.",
};

static FINANCE: DomainTemplate = DomainTemplate {
    tasks: &[
        "analyze-market",
        "assess-risk",
        "compare-instruments",
        "draft-recommendation",
    ],
    hint: "Finance requests need current market context, a risk assessment, \
           and a clearly-caveated recommendation.",
};

static GENERIC: DomainTemplate = DomainTemplate {
    tasks: &["research-topic", "analyze-findings"],
    hint: "Break the request into research and analysis, then synthesize.",
};

/// Template for a domain.
pub fn template_for(domain: Domain) -> &'static DomainTemplate {
    match domain {
        Domain::Travel => &TRAVEL,
        Domain::Healthcare => &HEALTHCARE,
        Domain::Finance => &FINANCE,
        Domain::Generic => &GENERIC,
    }
}

/// Detailed synthesis prompt for a domain.
///
/// Replaces the prompt of every synthesis-named step during planning
/// post-processing.
pub fn synthesis_prompt(domain: Domain, query: &str) -> String {
    match domain {
        Domain::Travel => format!(
            "Create a complete travel plan answering: {}\n\
             Include the best flight options, hotel recommendations, a \
             day-by-day itinerary, suggested activities, and an estimated \
             total budget. Present it as a friendly, well-organized answer.",
            query
        ),
        Domain::Healthcare => format!(
            "Produce a clinical summary answering: {}\n\
             Cover the reported findings, relevant conditions to consider, \
             recommended next steps, and when to seek urgent care. Use \
             precise, neutral clinical language and note that this is not a \
             diagnosis.",
            query
        ),
        Domain::Finance => format!(
            "Produce an investment recommendation answering: {}\n\
             Cover the market context, key risks, suggested allocation or \
             instruments, and time horizon. State assumptions explicitly and \
             include a standard not-financial-advice caveat.",
            query
        ),
        Domain::Generic => format!(
            "Synthesize the gathered results into a single, coherent answer \
             to: {}\n\
             Resolve contradictions, keep the answer focused, and surface \
             the most decision-relevant facts first.",
            query
        ),
    }
}
