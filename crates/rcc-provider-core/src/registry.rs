use std::collections::HashMap;
use std::sync::Arc;

use crate::adapter::ProviderAdapter;
use crate::errors::AdapterResult;

/// Owns the adapter instances for all configured providers.
///
/// Lookup is by provider id (not adapter kind): two providers of the same
/// kind with different endpoints or credentials are distinct entries.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters
            .insert(adapter.provider_id().to_string(), adapter);
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(provider_id).cloned()
    }

    pub fn contains(&self, provider_id: &str) -> bool {
        self.adapters.contains_key(provider_id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut out: Vec<String> = self.adapters.keys().cloned().collect();
        out.sort();
        out
    }

    pub async fn start_all(&self) -> AdapterResult<()> {
        for adapter in self.adapters.values() {
            adapter.start().await?;
        }
        Ok(())
    }

    pub async fn stop_all(&self) {
        for adapter in self.adapters.values() {
            adapter.stop().await;
        }
    }
}
