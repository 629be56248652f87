//! Backend en memoria.
//!
//! - Volátil: los registros viven lo que el proceso.
//! - Thread-safe vía dashmap; sirve como referencia de paridad para backends
//!   durables y para tests del intérprete.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::time::Instant;

use super::backend::{BackendHealth, ListCriteria, StorageBackend};
use super::record::PersistedEnvelope;
use crate::errors::FlowError;

#[derive(Debug, Default)]
pub struct InMemoryBackend {
    inner: DashMap<String, PersistedEnvelope>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cantidad de registros vivos (incluye expirados aún no limpiados).
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn store(&self, key: &str, envelope: &PersistedEnvelope) -> Result<(), FlowError> {
        self.inner.insert(key.to_string(), envelope.clone());
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Option<PersistedEnvelope>, FlowError> {
        match self.inner.get(key) {
            Some(env) if env.is_expired(Utc::now()) => Ok(None),
            Some(env) => Ok(Some(env.clone())),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, FlowError> {
        Ok(self.inner.remove(key).is_some())
    }

    async fn list(&self, criteria: &ListCriteria) -> Result<Vec<PersistedEnvelope>, FlowError> {
        let now = Utc::now();
        let mut all: Vec<PersistedEnvelope> = self.inner
                                                  .iter()
                                                  .filter(|e| criteria.matches(e.value(), now))
                                                  .map(|e| e.value().clone())
                                                  .collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        let offset = criteria.offset.unwrap_or(0);
        let limited: Vec<PersistedEnvelope> = all.into_iter()
                                                 .skip(offset)
                                                 .take(criteria.limit.unwrap_or(usize::MAX))
                                                 .collect();
        Ok(limited)
    }

    async fn cleanup(&self, criteria: &ListCriteria) -> Result<u64, FlowError> {
        let now = Utc::now();
        let doomed: Vec<String> = self.inner
                                      .iter()
                                      .filter(|e| criteria.matches(e.value(), now))
                                      .map(|e| e.key().clone())
                                      .collect();
        let mut count = 0u64;
        for key in doomed {
            if self.inner.remove(&key).is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn health(&self) -> BackendHealth {
        let started = Instant::now();
        let _ = self.inner.len();
        BackendHealth { healthy: true,
                        latency_ms: started.elapsed().as_millis() as u64,
                        error: None }
    }
}
