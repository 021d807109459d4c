//! Process-wide provider cache keyed by `(provider, model)`.
//!
//! Entries carry a consecutive-failure count; repeated failures invalidate
//! the entry so the next lookup reconstructs the provider through the
//! factory (circuit-breaker style).

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::{ChatProvider, ProviderError, ProviderResult};

/// Cache key: provider name plus model identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderKey {
    pub provider: String,
    pub model: String,
}

impl ProviderKey {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

struct CacheEntry {
    provider: Arc<dyn ChatProvider>,
    consecutive_failures: u32,
}

/// Constructs a provider for a `(provider_name, model)` pair.
pub type ProviderFactory =
    dyn Fn(&str, &str) -> ProviderResult<Arc<dyn ChatProvider>> + Send + Sync;

/// Process-wide, thread-safe provider cache.
///
/// Lifecycle is bound to process lifetime; the supervisor shares one cache
/// across all workflows.
pub struct ProviderCache {
    entries: DashMap<ProviderKey, CacheEntry>,
    factory: Box<ProviderFactory>,
    failure_threshold: u32,
}

impl ProviderCache {
    const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

    pub fn new(
        factory: impl Fn(&str, &str) -> ProviderResult<Arc<dyn ChatProvider>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            factory: Box::new(factory),
            failure_threshold: Self::DEFAULT_FAILURE_THRESHOLD,
        }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Get the cached provider for `(provider, model)`, constructing it
    /// through the factory on a miss.
    pub fn get(&self, provider: &str, model: &str) -> ProviderResult<Arc<dyn ChatProvider>> {
        let key = ProviderKey::new(provider, model);
        if let Some(entry) = self.entries.get(&key) {
            return Ok(Arc::clone(&entry.provider));
        }

        let constructed = (self.factory)(provider, model)?;
        debug!(provider = %provider, model = %model, "Constructed provider");
        let entry = self
            .entries
            .entry(key)
            .or_insert_with(|| CacheEntry {
                provider: constructed,
                consecutive_failures: 0,
            });
        Ok(Arc::clone(&entry.provider))
    }

    /// Record a successful call, resetting the failure streak.
    pub fn record_success(&self, provider: &str, model: &str) {
        if let Some(mut entry) = self.entries.get_mut(&ProviderKey::new(provider, model)) {
            entry.consecutive_failures = 0;
        }
    }

    /// Record a failed call. At the configured threshold the entry is
    /// invalidated so the next `get` reconstructs it.
    pub fn record_failure(&self, provider: &str, model: &str) {
        let key = ProviderKey::new(provider, model);
        let mut evict = false;
        if let Some(mut entry) = self.entries.get_mut(&key) {
            entry.consecutive_failures += 1;
            if entry.consecutive_failures >= self.failure_threshold {
                evict = true;
            }
        }
        if evict {
            self.entries.remove(&key);
            warn!(
                provider = %provider,
                model = %model,
                threshold = self.failure_threshold,
                "Provider hit failure threshold, invalidating cache entry"
            );
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Convenience: complete a request through the cached provider,
    /// updating the failure accounting.
    pub async fn complete(
        &self,
        provider: &str,
        request: crate::ChatRequest,
    ) -> ProviderResult<crate::ChatResponse> {
        let model = request.model.clone();
        let client = self.get(provider, &model)?;
        match client.complete(request).await {
            Ok(response) => {
                self.record_success(provider, &model);
                Ok(response)
            }
            Err(err) => {
                self.record_failure(provider, &model);
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for ProviderCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCache")
            .field("entries", &self.entries.len())
            .field("failure_threshold", &self.failure_threshold)
            .finish()
    }
}

/// A cache whose factory rejects every name — useful as a default.
pub fn unavailable_factory(provider: &str, _model: &str) -> ProviderResult<Arc<dyn ChatProvider>> {
    Err(ProviderError::Unavailable(format!(
        "no factory registered for provider '{provider}'"
    )))
}
