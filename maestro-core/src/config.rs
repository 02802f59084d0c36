//! Configuration types for the orchestration kernel
//!
//! Configuration is environment-keyed (see the enumerated keys on
//! [`OrchestratorConfig::from_env`]) and loaded through figment so callers
//! can layer their own providers on top when embedding the kernel.

use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{MaestroError, Result};
use crate::router::RoutingStrategy;

/// Deployment tier derived from `DEPLOYMENT_MODE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// Community tier: per-tenant policy count is capped
    Community,
    /// Enterprise tier (saas, enterprise, dedicated, ...)
    Enterprise,
}

impl DeploymentMode {
    /// Any value other than `community` selects the enterprise tier.
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("community") {
            DeploymentMode::Community
        } else {
            DeploymentMode::Enterprise
        }
    }
}

impl Default for DeploymentMode {
    fn default() -> Self {
        DeploymentMode::Community
    }
}

/// Router configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingSettings {
    /// Provider selection strategy
    #[serde(default)]
    pub strategy: RoutingStrategy,

    /// Per-provider sampling weights for the weighted strategy
    #[serde(default)]
    pub weights: HashMap<String, f64>,

    /// Provider used when the request supplies no override
    #[serde(default)]
    pub default_provider: Option<String>,
}

/// Provider credentials; an absent key disables that provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub openai_api_key: Option<String>,

    #[serde(default)]
    pub anthropic_api_key: Option<String>,

    /// Base URL of a local Ollama instance
    #[serde(default)]
    pub ollama_base_url: Option<String>,
}

impl ProviderSettings {
    /// Whether at least one provider is configured.
    pub fn any_enabled(&self) -> bool {
        self.openai_api_key.is_some()
            || self.anthropic_api_key.is_some()
            || self.ollama_base_url.is_some()
    }
}

/// Policy engine tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySettings {
    /// Cadence of the background snapshot refresh
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,

    /// Maximum snapshot age before the engine reports unhealthy
    #[serde(with = "humantime_serde")]
    pub max_staleness: Duration,

    /// TTL of the per-request evaluation cache
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,

    /// Per-tenant policy cap under the community tier
    pub community_policy_limit: usize,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30),
            max_staleness: Duration::from_secs(300),
            cache_ttl: Duration::from_secs(60),
            community_policy_limit: 10,
        }
    }
}

/// Workflow engine tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Whether eligible step groups run concurrently
    pub enable_parallel: bool,

    /// Width cap for a parallel group; excess steps degrade to sequential
    pub max_parallel_steps: usize,

    /// Timeout applied to steps that declare none
    #[serde(with = "humantime_serde")]
    pub default_step_timeout: Duration,

    /// Wall-clock budget for workflows that declare none
    #[serde(with = "humantime_serde")]
    pub default_workflow_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            enable_parallel: true,
            max_parallel_steps: 10,
            default_step_timeout: Duration::from_secs(30),
            default_workflow_timeout: Duration::from_secs(120),
        }
    }
}

/// Top-level kernel configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// DSN for policy and execution storage; absent selects the in-memory
    /// fallback stores
    #[serde(default)]
    pub database_url: Option<String>,

    /// Deployment tier
    #[serde(default)]
    pub deployment_mode: DeploymentMode,

    /// Router configuration
    #[serde(default)]
    pub routing: RoutingSettings,

    /// Provider credentials
    #[serde(default)]
    pub providers: ProviderSettings,

    /// Policy engine tunables
    #[serde(default)]
    pub policy: PolicySettings,

    /// Workflow engine tunables
    #[serde(default)]
    pub engine: EngineSettings,
}

/// Flat view of the environment keys the kernel understands
#[derive(Debug, Default, Serialize, Deserialize)]
struct RawEnv {
    database_url: Option<String>,
    deployment_mode: Option<String>,
    routing_strategy: Option<String>,
    provider_weights: Option<String>,
    default_provider: Option<String>,
    openai_api_key: Option<String>,
    anthropic_api_key: Option<String>,
    ollama_base_url: Option<String>,
}

const ENV_KEYS: &[&str] = &[
    "DATABASE_URL",
    "DEPLOYMENT_MODE",
    "ROUTING_STRATEGY",
    "PROVIDER_WEIGHTS",
    "DEFAULT_PROVIDER",
    "OPENAI_API_KEY",
    "ANTHROPIC_API_KEY",
    "OLLAMA_BASE_URL",
];

impl OrchestratorConfig {
    /// Load configuration from the process environment.
    ///
    /// Recognized keys: `DATABASE_URL`, `DEPLOYMENT_MODE`,
    /// `ROUTING_STRATEGY`, `PROVIDER_WEIGHTS`, `DEFAULT_PROVIDER`,
    /// `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `OLLAMA_BASE_URL`.
    ///
    /// # Errors
    ///
    /// Returns an error if `ROUTING_STRATEGY` names an unknown strategy or
    /// `PROVIDER_WEIGHTS` fails to parse.
    pub fn from_env() -> Result<Self> {
        let raw: RawEnv = Figment::from(Serialized::defaults(RawEnv::default()))
            .merge(Env::raw().only(ENV_KEYS))
            .extract()
            .map_err(|e| MaestroError::Configuration(e.to_string()))?;

        Self::from_raw(raw)
    }

    fn from_raw(raw: RawEnv) -> Result<Self> {
        let strategy = match raw.routing_strategy.as_deref() {
            Some(value) => value.parse::<RoutingStrategy>()?,
            None => RoutingStrategy::default(),
        };

        let weights = match raw.provider_weights.as_deref() {
            Some(value) => parse_weights(value)?,
            None => HashMap::new(),
        };

        Ok(Self {
            database_url: raw.database_url,
            deployment_mode: raw
                .deployment_mode
                .as_deref()
                .map(DeploymentMode::parse)
                .unwrap_or_default(),
            routing: RoutingSettings {
                strategy,
                weights,
                default_provider: raw.default_provider,
            },
            providers: ProviderSettings {
                openai_api_key: raw.openai_api_key,
                anthropic_api_key: raw.anthropic_api_key,
                ollama_base_url: raw.ollama_base_url,
            },
            policy: PolicySettings::default(),
            engine: EngineSettings::default(),
        })
    }
}

/// Parse a serialized provider-weight mapping.
///
/// Accepts a JSON object (`{"openai": 0.7, "ollama": 0.3}`) or a
/// comma-separated list (`openai=0.7,ollama=0.3`).
pub fn parse_weights(value: &str) -> Result<HashMap<String, f64>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(HashMap::new());
    }

    let parsed: HashMap<String, f64> = if trimmed.starts_with('{') {
        serde_json::from_str(trimmed).map_err(|e| {
            MaestroError::Configuration(format!("invalid PROVIDER_WEIGHTS json: {}", e))
        })?
    } else {
        let mut map = HashMap::new();
        for pair in trimmed.split(',') {
            let (name, weight) = pair.split_once('=').ok_or_else(|| {
                MaestroError::Configuration(format!("invalid PROVIDER_WEIGHTS entry: '{}'", pair))
            })?;
            let weight: f64 = weight.trim().parse().map_err(|_| {
                MaestroError::Configuration(format!("invalid weight for '{}'", name.trim()))
            })?;
            map.insert(name.trim().to_string(), weight);
        }
        map
    };

    for (name, weight) in &parsed {
        if !weight.is_finite() || *weight < 0.0 {
            return Err(MaestroError::Configuration(format!(
                "weight for '{}' must be a non-negative finite number",
                name
            )));
        }
    }

    Ok(parsed)
}
