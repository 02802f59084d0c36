//! Per-request evaluation memoisation

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::model::PolicyEvaluationResult;
use crate::request::OrchestratorRequest;

/// Entries beyond this trigger an expiry sweep on insert
const PRUNE_THRESHOLD: usize = 1024;

struct CacheEntry {
    result: PolicyEvaluationResult,
    inserted_at: tokio::time::Instant,
}

/// TTL cache keyed by a stable hash of the request identity
pub(crate) struct EvaluationCache {
    ttl: Duration,
    entries: Mutex<HashMap<[u8; 32], CacheEntry>>,
}

impl EvaluationCache {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Stable key over {user.email, user.role, request_type, query}.
    fn key(request: &OrchestratorRequest) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(request.user.email.as_bytes());
        hasher.update([0]);
        hasher.update(request.user.role.as_bytes());
        hasher.update([0]);
        hasher.update(request.request_type.as_bytes());
        hasher.update([0]);
        hasher.update(request.query.as_bytes());
        hasher.finalize().into()
    }

    pub(crate) fn get(&self, request: &OrchestratorRequest) -> Option<PolicyEvaluationResult> {
        let entries = self.entries.lock().unwrap();
        let entry = entries.get(&Self::key(request))?;
        if entry.inserted_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.result.clone())
    }

    pub(crate) fn put(&self, request: &OrchestratorRequest, result: PolicyEvaluationResult) {
        let mut entries = self.entries.lock().unwrap();

        if entries.len() >= PRUNE_THRESHOLD {
            let ttl = self.ttl;
            entries.retain(|_, entry| entry.inserted_at.elapsed() <= ttl);
        }

        entries.insert(
            Self::key(request),
            CacheEntry {
                result,
                inserted_at: tokio::time::Instant::now(),
            },
        );
    }
}
