//! LLM router
//!
//! Picks a provider for each request under the configured strategy, invokes
//! it with retry, and tracks per-provider metrics and health. Unhealthy
//! providers are skipped under every strategy.

use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{MaestroError, Result};
use crate::llm::{with_retry, LlmProvider, LlmResponse, RequestContext, RetryConfig};

mod health;
mod strategy;

pub use health::ProviderStatus;
pub use strategy::RoutingStrategy;

use health::HealthTracker;

/// Identity of the provider that served a routed request
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub model: String,
}

struct ProviderEntry {
    provider: Arc<dyn LlmProvider>,
    health: HealthTracker,
}

/// Routes requests across the configured provider set.
pub struct LlmRouter {
    entries: Vec<ProviderEntry>,
    by_name: HashMap<String, usize>,
    weights: RwLock<Arc<HashMap<String, f64>>>,
    strategy: RoutingStrategy,
    default_provider: Option<String>,
    retry: RetryConfig,
    rr_cursor: AtomicUsize,
    sweep_cancel: CancellationToken,
    sweep_handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for LlmRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmRouter")
            .field("providers", &self.by_name.keys().collect::<Vec<_>>())
            .field("strategy", &self.strategy)
            .finish()
    }
}

impl LlmRouter {
    /// Create a new router builder.
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Route a request: select a provider, invoke it, record metrics.
    ///
    /// An explicit `ctx.provider` override targets that provider directly,
    /// bypassing strategy selection (the caller asked for it by name). With
    /// no override, the configured default provider is preferred when
    /// healthy; otherwise the strategy picks among healthy candidates.
    pub async fn route(&self, ctx: &RequestContext) -> Result<(LlmResponse, ProviderInfo)> {
        if self.entries.is_empty() {
            return Err(MaestroError::AllProvidersFailed(
                "no providers configured".to_string(),
            ));
        }

        if let Some(name) = &ctx.provider {
            let index = *self.by_name.get(name).ok_or_else(|| {
                MaestroError::InvalidRequest(format!("unknown provider '{}'", name))
            })?;
            return self.invoke(index, ctx).await;
        }

        if let Some(name) = &self.default_provider {
            if let Some(&index) = self.by_name.get(name) {
                let entry = &self.entries[index];
                if entry.health.is_healthy() && (ctx.allow_local || !entry.provider.is_local()) {
                    return self.invoke(index, ctx).await;
                }
            }
        }

        let candidates = self.healthy_candidates(ctx.allow_local);
        if candidates.is_empty() {
            return Err(MaestroError::AllProvidersFailed(
                "no healthy providers".to_string(),
            ));
        }

        match self.strategy {
            RoutingStrategy::Weighted => {
                let weights = self.weights.read().unwrap().clone();
                let weighted: Vec<(usize, f64)> = candidates
                    .iter()
                    .map(|&i| {
                        let name = self.entries[i].provider.name();
                        (i, weights.get(name).copied().unwrap_or(1.0))
                    })
                    .collect();

                let index = strategy::pick_weighted(&weighted).ok_or_else(|| {
                    MaestroError::AllProvidersFailed("no healthy providers".to_string())
                })?;
                self.invoke(index, ctx).await
            }
            RoutingStrategy::RoundRobin => {
                let index = strategy::pick_round_robin(&candidates, &self.rr_cursor)
                    .ok_or_else(|| {
                        MaestroError::AllProvidersFailed("no healthy providers".to_string())
                    })?;
                self.invoke(index, ctx).await
            }
            RoutingStrategy::Failover => {
                let mut last_error = String::new();
                for index in candidates {
                    match self.invoke(index, ctx).await {
                        Ok(result) => return Ok(result),
                        Err(e) => {
                            debug!(provider = self.entries[index].provider.name(), error = %e, "failover to next provider");
                            last_error = e.to_string();
                        }
                    }
                }
                Err(MaestroError::AllProvidersFailed(last_error))
            }
        }
    }

    async fn invoke(&self, index: usize, ctx: &RequestContext) -> Result<(LlmResponse, ProviderInfo)> {
        let entry = &self.entries[index];
        let start = std::time::Instant::now();

        let result = with_retry(&self.retry, || entry.provider.generate(ctx)).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                entry.health.record_success(elapsed_ms);
                let info = ProviderInfo {
                    name: entry.provider.name().to_string(),
                    model: response.model.clone(),
                };
                Ok((LlmResponse::from_provider(response, elapsed_ms), info))
            }
            Err(e) => {
                entry.health.record_failure();
                Err(e)
            }
        }
    }

    fn healthy_candidates(&self, allow_local: bool) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.health.is_healthy())
            .filter(|(_, entry)| allow_local || !entry.provider.is_local())
            .map(|(i, _)| i)
            .collect()
    }

    /// True iff at least one provider is healthy.
    pub fn is_healthy(&self) -> bool {
        self.entries.iter().any(|entry| entry.health.is_healthy())
    }

    /// Snapshot status for every provider.
    pub fn provider_status(&self) -> HashMap<String, ProviderStatus> {
        let weights = self.weights.read().unwrap().clone();
        self.entries
            .iter()
            .map(|entry| {
                let name = entry.provider.name();
                let weight = weights.get(name).copied().unwrap_or(1.0);
                (name.to_string(), entry.health.status(name, weight))
            })
            .collect()
    }

    /// Atomically replace the weight map.
    ///
    /// Concurrent readers observe either the full old map or the full new
    /// one. Rejects negative or non-finite weights.
    pub fn update_weights(&self, weights: HashMap<String, f64>) -> Result<()> {
        for (name, weight) in &weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(MaestroError::InvalidRequest(format!(
                    "weight for '{}' must be a non-negative finite number",
                    name
                )));
            }
        }

        *self.weights.write().unwrap() = Arc::new(weights);
        Ok(())
    }

    /// Start the background transport-check sweep.
    pub fn start_health_sweep(self: &Arc<Self>, cadence: Duration) {
        let router = Arc::clone(self);
        let cancel = self.sweep_cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cadence);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        for entry in &router.entries {
                            let ok = entry.provider.health_check().await;
                            if !ok {
                                warn!(provider = entry.provider.name(), "transport check failed");
                            }
                            entry.health.record_transport(ok);
                        }
                    }
                }
            }
        });

        *self.sweep_handle.lock().unwrap() = Some(handle);
    }

    /// Stop the background sweep.
    pub fn shutdown(&self) {
        self.sweep_cancel.cancel();
        if let Some(handle) = self.sweep_handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}

/// Builder for [`LlmRouter`]
pub struct RouterBuilder {
    providers: Vec<Arc<dyn LlmProvider>>,
    strategy: RoutingStrategy,
    weights: HashMap<String, f64>,
    default_provider: Option<String>,
    retry: RetryConfig,
}

impl RouterBuilder {
    /// Create a new router builder.
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            strategy: RoutingStrategy::default(),
            weights: HashMap::new(),
            default_provider: None,
            retry: RetryConfig::default(),
        }
    }

    /// Add a provider. Order defines failover priority.
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Set the selection strategy.
    pub fn strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set initial provider weights.
    pub fn weights(mut self, weights: HashMap<String, f64>) -> Self {
        self.weights = weights;
        self
    }

    /// Set the provider used when a request supplies none.
    pub fn default_provider(mut self, name: impl Into<String>) -> Self {
        self.default_provider = Some(name.into());
        self
    }

    /// Set the per-invocation retry policy.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Build the router.
    pub fn build(self) -> LlmRouter {
        let mut by_name = HashMap::new();
        let entries: Vec<ProviderEntry> = self
            .providers
            .into_iter()
            .map(|provider| ProviderEntry {
                provider,
                health: HealthTracker::new(),
            })
            .collect();

        for (index, entry) in entries.iter().enumerate() {
            by_name.insert(entry.provider.name().to_string(), index);
        }

        LlmRouter {
            entries,
            by_name,
            weights: RwLock::new(Arc::new(self.weights)),
            strategy: self.strategy,
            default_provider: self.default_provider,
            retry: self.retry,
            rr_cursor: AtomicUsize::new(0),
            sweep_cancel: CancellationToken::new(),
            sweep_handle: Mutex::new(None),
        }
    }
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ProviderResponse;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct StubProvider {
        name: &'static str,
        fail: bool,
        local: bool,
        calls: AtomicU64,
    }

    impl StubProvider {
        fn ok(name: &'static str) -> Self {
            Self {
                name,
                fail: false,
                local: false,
                calls: AtomicU64::new(0),
            }
        }

        fn failing(name: &'static str) -> Self {
            Self {
                name,
                fail: true,
                local: false,
                calls: AtomicU64::new(0),
            }
        }

        fn local(name: &'static str) -> Self {
            Self {
                name,
                fail: false,
                local: true,
                calls: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for StubProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn is_local(&self) -> bool {
            self.local
        }

        async fn generate(&self, ctx: &RequestContext) -> Result<ProviderResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(MaestroError::Provider {
                    provider: self.name.to_string(),
                    message: "stubbed failure".to_string(),
                });
            }
            Ok(ProviderResponse {
                content: format!("{}: {}", self.name, ctx.query),
                model: "stub-model".to_string(),
                tokens_used: 7,
                metadata: Default::default(),
            })
        }
    }

    fn router_with(providers: Vec<Arc<dyn LlmProvider>>, strategy: RoutingStrategy) -> LlmRouter {
        let mut builder = LlmRouter::builder()
            .strategy(strategy)
            .retry(RetryConfig::no_retry());
        for provider in providers {
            builder = builder.provider(provider);
        }
        builder.build()
    }

    #[tokio::test]
    async fn test_route_with_single_provider() {
        let router = router_with(
            vec![Arc::new(StubProvider::ok("alpha"))],
            RoutingStrategy::Weighted,
        );

        let ctx = RequestContext::from_prompt("hello");
        let (response, info) = router.route(&ctx).await.unwrap();

        assert_eq!(response.content, "alpha: hello");
        assert_eq!(info.name, "alpha");
        assert!(router.is_healthy());
    }

    #[tokio::test]
    async fn test_failover_skips_failing_provider() {
        let failing = Arc::new(StubProvider::failing("alpha"));
        let healthy = Arc::new(StubProvider::ok("beta"));
        let router = router_with(
            vec![failing.clone(), healthy.clone()],
            RoutingStrategy::Failover,
        );

        let ctx = RequestContext::from_prompt("q");
        let rounds = 5;
        for _ in 0..rounds {
            let (_, info) = router.route(&ctx).await.unwrap();
            assert_eq!(info.name, "beta");
        }

        let status = router.provider_status();
        assert!(status["alpha"].error_count > 0);
        assert_eq!(status["beta"].request_count, rounds);
    }

    #[tokio::test]
    async fn test_all_providers_failed() {
        let router = router_with(
            vec![
                Arc::new(StubProvider::failing("alpha")),
                Arc::new(StubProvider::failing("beta")),
            ],
            RoutingStrategy::Failover,
        );

        let ctx = RequestContext::from_prompt("q");
        let err = router.route(&ctx).await.unwrap_err();
        assert_eq!(err.code(), "all_providers_failed");
    }

    #[tokio::test]
    async fn test_provider_override() {
        let router = router_with(
            vec![
                Arc::new(StubProvider::ok("alpha")),
                Arc::new(StubProvider::ok("beta")),
            ],
            RoutingStrategy::Weighted,
        );

        let mut ctx = RequestContext::from_prompt("q");
        ctx.provider = Some("beta".to_string());

        let (_, info) = router.route(&ctx).await.unwrap();
        assert_eq!(info.name, "beta");
    }

    #[tokio::test]
    async fn test_unknown_override_is_client_error() {
        let router = router_with(
            vec![Arc::new(StubProvider::ok("alpha"))],
            RoutingStrategy::Weighted,
        );

        let mut ctx = RequestContext::from_prompt("q");
        ctx.provider = Some("nope".to_string());

        let err = router.route(&ctx).await.unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[tokio::test]
    async fn test_local_provider_skipped_when_disallowed() {
        let local = Arc::new(StubProvider::local("ollama"));
        let remote = Arc::new(StubProvider::ok("alpha"));
        let router = router_with(vec![local, remote], RoutingStrategy::RoundRobin);

        let mut ctx = RequestContext::from_prompt("q");
        ctx.allow_local = false;

        for _ in 0..4 {
            let (_, info) = router.route(&ctx).await.unwrap();
            assert_eq!(info.name, "alpha");
        }
    }

    #[tokio::test]
    async fn test_round_robin_rotates() {
        let router = router_with(
            vec![
                Arc::new(StubProvider::ok("alpha")),
                Arc::new(StubProvider::ok("beta")),
            ],
            RoutingStrategy::RoundRobin,
        );

        let ctx = RequestContext::from_prompt("q");
        let (_, first) = router.route(&ctx).await.unwrap();
        let (_, second) = router.route(&ctx).await.unwrap();

        assert_ne!(first.name, second.name);
    }

    #[tokio::test]
    async fn test_default_provider_preferred() {
        let router = LlmRouter::builder()
            .provider(Arc::new(StubProvider::ok("alpha")))
            .provider(Arc::new(StubProvider::ok("beta")))
            .default_provider("beta")
            .retry(RetryConfig::no_retry())
            .build();

        let ctx = RequestContext::from_prompt("q");
        for _ in 0..3 {
            let (_, info) = router.route(&ctx).await.unwrap();
            assert_eq!(info.name, "beta");
        }
    }

    #[test]
    fn test_update_weights_validation() {
        let router = router_with(
            vec![Arc::new(StubProvider::ok("alpha"))],
            RoutingStrategy::Weighted,
        );

        assert!(router
            .update_weights(HashMap::from([("alpha".to_string(), 2.0)]))
            .is_ok());
        assert!(router
            .update_weights(HashMap::from([("alpha".to_string(), -1.0)]))
            .is_err());
        assert!(router
            .update_weights(HashMap::from([("alpha".to_string(), f64::NAN)]))
            .is_err());

        // The rejected updates left the previous map in place
        assert_eq!(router.provider_status()["alpha"].weight, 2.0);
    }

    #[tokio::test]
    async fn test_unhealthy_provider_skipped_by_weighted() {
        let failing = Arc::new(StubProvider::failing("alpha"));
        let healthy = Arc::new(StubProvider::ok("beta"));
        let router = router_with(
            vec![failing.clone(), healthy.clone()],
            RoutingStrategy::Weighted,
        );

        let ctx = RequestContext::from_prompt("q");

        // Drive alpha unhealthy through direct overrides
        let mut override_ctx = ctx.clone();
        override_ctx.provider = Some("alpha".to_string());
        for _ in 0..3 {
            let _ = router.route(&override_ctx).await;
        }
        assert!(!router.provider_status()["alpha"].healthy);

        // Strategy selection now only ever lands on beta
        for _ in 0..10 {
            let (_, info) = router.route(&ctx).await.unwrap();
            assert_eq!(info.name, "beta");
        }
    }
}
