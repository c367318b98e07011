//! Provider repository and principal resolution: the admin-CRUD-backed
//! store the orchestrator reads a snapshot from at request start, and the
//! external credential-to-identity boundary it logs against.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::models::{ModelMapping, Provider, ProviderBinding};

/// Read-only view over providers/mappings/bindings. Lifecycle (create,
/// disable, reorder) is owned by whatever admin surface populates the
/// backing store; the core only ever reads a snapshot per request.
#[async_trait]
pub trait ProviderRepo: Send + Sync {
    async fn get_mapping(&self, requested_model: &str) -> anyhow::Result<Option<ModelMapping>>;
    async fn get_bindings(&self, requested_model: &str) -> anyhow::Result<Vec<ProviderBinding>>;
    async fn get_providers(&self) -> anyhow::Result<HashMap<i64, Provider>>;
}

#[derive(Default)]
pub struct InMemoryProviderRepo {
    providers: HashMap<i64, Provider>,
    mappings: HashMap<String, ModelMapping>,
    bindings: Vec<ProviderBinding>,
}

impl InMemoryProviderRepo {
    pub fn new(providers: Vec<Provider>, mappings: Vec<ModelMapping>, bindings: Vec<ProviderBinding>) -> Self {
        Self {
            providers: providers.into_iter().map(|p| (p.id, p)).collect(),
            mappings: mappings.into_iter().map(|m| (m.requested_model.clone(), m)).collect(),
            bindings,
        }
    }
}

#[async_trait]
impl ProviderRepo for InMemoryProviderRepo {
    async fn get_mapping(&self, requested_model: &str) -> anyhow::Result<Option<ModelMapping>> {
        Ok(self.mappings.get(requested_model).cloned())
    }

    async fn get_bindings(&self, requested_model: &str) -> anyhow::Result<Vec<ProviderBinding>> {
        Ok(self.bindings.iter().filter(|b| b.requested_model == requested_model).cloned().collect())
    }

    async fn get_providers(&self) -> anyhow::Result<HashMap<i64, Provider>> {
        Ok(self.providers.clone())
    }
}

/// The resolved identity attributed to a request for logging purposes.
#[derive(Debug, Clone)]
pub struct Principal {
    pub api_key_id: i64,
    pub api_key_name: String,
}

/// External collaborator mapping an inbound credential to a [`Principal`].
/// The core depends only on this trait; a real deployment resolves
/// against its own key store.
#[async_trait]
pub trait KeyResolver: Send + Sync {
    async fn resolve(&self, credential: &str) -> Option<Principal>;
}

/// Development resolver: every request is attributed to one configured
/// principal, regardless of the credential presented. Keeps the proxy
/// runnable stand-alone.
pub struct StaticKeyResolver {
    principal: Principal,
}

impl StaticKeyResolver {
    pub fn new(api_key_id: i64, api_key_name: impl Into<String>) -> Self {
        Self { principal: Principal { api_key_id, api_key_name: api_key_name.into() } }
    }
}

#[async_trait]
impl KeyResolver for StaticKeyResolver {
    async fn resolve(&self, _credential: &str) -> Option<Principal> {
        Some(self.principal.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Protocol, StrategyKind};

    #[tokio::test]
    async fn in_memory_repo_filters_bindings_by_requested_model() {
        let provider = Provider { id: 1, name: "p".into(), base_url: "https://x".into(), protocol: Protocol::OpenAi, api_key: None, active: true };
        let mapping = ModelMapping { requested_model: "gpt-4".into(), strategy: StrategyKind::RoundRobin, matching_rules: None, active: true };
        let binding = ProviderBinding { id: 1, requested_model: "gpt-4".into(), provider_id: 1, target_model: "gpt-4-0613".into(), provider_rules: None, priority: 0, weight: 1, active: true };
        let other_binding = ProviderBinding { id: 2, requested_model: "gpt-3.5".into(), provider_id: 1, target_model: "gpt-3.5-turbo".into(), provider_rules: None, priority: 0, weight: 1, active: true };

        let repo = InMemoryProviderRepo::new(vec![provider], vec![mapping], vec![binding, other_binding]);

        assert!(repo.get_mapping("gpt-4").await.unwrap().is_some());
        assert!(repo.get_mapping("unknown").await.unwrap().is_none());
        assert_eq!(repo.get_bindings("gpt-4").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn static_key_resolver_always_resolves() {
        let resolver = StaticKeyResolver::new(1, "dev");
        let principal = resolver.resolve("anything").await.unwrap();
        assert_eq!(principal.api_key_id, 1);
        assert_eq!(principal.api_key_name, "dev");
    }
}
