//! Puerto abstracto de almacenamiento de suspensiones.
//!
//! Contrato principal:
//! - `store` es atómico: una escritura parcial jamás es observable como
//!   registro válido (los backends durables escriben a ubicación temporal y
//!   renombran).
//! - `retrieve` de una clave expirada devuelve `None`.
//! - Toda falla lleva el flag `retryable`; la capa de protocolo decide los
//!   reintentos, no el backend.
//!
//! Los backends serializan sus propias operaciones concurrentes; el
//! intérprete trata cada llamada como atómica desde su lado.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::PersistedEnvelope;
use crate::errors::FlowError;

/// Criterios de listado/limpieza.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Substring simple sobre la clave.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub older_than: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expired_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
}

impl ListCriteria {
    /// Filtro común aplicado por los backends sobre cada sobre.
    pub fn matches(&self, env: &PersistedEnvelope, now: DateTime<Utc>) -> bool {
        if let Some(p) = &self.prefix {
            if !env.key.starts_with(p.as_str()) {
                return false;
            }
        }
        if let Some(p) = &self.pattern {
            if !env.key.contains(p.as_str()) {
                return false;
            }
        }
        if let Some(cutoff) = self.older_than {
            if env.state.metadata.serialized_at >= cutoff {
                return false;
            }
        }
        if self.expired_only && !env.is_expired(now) {
            return false;
        }
        if let Some(tool) = &self.tool_id {
            let recorded = env.state
                              .data
                              .get("record")
                              .and_then(|r| r.get("metadata"))
                              .and_then(|m| m.get("toolId"))
                              .and_then(|t| t.as_str());
            if recorded != Some(tool.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Estado de salud reportado por un backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendHealth {
    pub healthy: bool,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Nombre estable del backend (para errores y logs).
    fn name(&self) -> &str;

    /// Persiste el sobre bajo la clave, de forma atómica (upsert).
    async fn store(&self, key: &str, envelope: &PersistedEnvelope) -> Result<(), FlowError>;

    /// Recupera el sobre; expirado ⇒ `None`.
    async fn retrieve(&self, key: &str) -> Result<Option<PersistedEnvelope>, FlowError>;

    /// Borra la clave. Devuelve si existía.
    async fn delete(&self, key: &str) -> Result<bool, FlowError>;

    /// Sobres que cumplen los criterios (orden estable por clave).
    async fn list(&self, criteria: &ListCriteria) -> Result<Vec<PersistedEnvelope>, FlowError>;

    /// Borra los sobres que cumplen los criterios. Devuelve cuántos.
    async fn cleanup(&self, criteria: &ListCriteria) -> Result<u64, FlowError>;

    /// Chequeo de salud con latencia medida.
    async fn health(&self) -> BackendHealth;
}
