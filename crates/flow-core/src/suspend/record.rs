//! Registros de suspensión y sobre persistido.
//!
//! El backend guarda el sobre (`PersistedEnvelope`) literalmente, direccionado
//! por una clave opaca. `data` es la serialización canónica del registro más
//! el grafo IR congelado; `version` habilita migración hacia adelante. El
//! checksum se verifica al rehidratar: un sobre corrupto es un fallo de
//! persistencia, nunca un registro válido a medias.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

use super::seal::{canonical_payload, payload_digest};
use crate::constants::RECORD_VERSION;
use crate::context::ScopeStack;
use crate::errors::FlowError;
use crate::ir::IrGraph;

/// Un frame del cursor de ejecución: nodo estructural atravesado, slot del
/// hijo en curso y resultados parciales acumulados (loops) al suspender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorFrame {
    pub node_id: String,
    /// Índice del hijo / iteración / rama en curso.
    pub slot: usize,
    /// Resultados ya recolectados (map/for/filter) antes de la iteración en
    /// curso.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partial: Vec<Value>,
    /// Acumulador vigente (reduce).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acc: Option<Value>,
    /// Rama ya elegida (switch) cuando la suspensión ocurrió dentro de ella.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chosen: Option<String>,
}

impl CursorFrame {
    pub fn new(node_id: impl Into<String>, slot: usize) -> Self {
        Self { node_id: node_id.into(),
               slot,
               partial: Vec::new(),
               acc: None,
               chosen: None }
    }
}

/// Posición exacta donde el flujo quedó suspendido.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPosition {
    /// Nodo tool que emitió la señal de suspensión.
    pub node_id: String,
    /// Camino estructural desde el entry hasta el nodo (de afuera hacia
    /// adentro).
    pub cursor: Vec<CursorFrame>,
}

/// Variables y salidas de nodos vigentes al suspender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VariableSnapshot {
    pub scopes: ScopeStack,
    pub node_outputs: HashMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspensionMetadata {
    /// Tool que pidió la suspensión.
    pub tool_id: String,
    pub suspended_at: DateTime<Utc>,
    /// Metadatos libres aportados por el caller.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, Value>,
}

/// Registro completo de una suspensión (lo que el caller puede inspeccionar).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspensionRecord {
    /// Clave opaca para el caller.
    pub key: String,
    pub flow_id: Uuid,
    pub step_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub execution_position: ExecutionPosition,
    pub variable_snapshot: VariableSnapshot,
    pub metadata: SuspensionMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub awaiting_input_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Bytes de la forma canónica persistida.
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Metadatos del sobre persistido.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMeta {
    pub serialized_at: DateTime<Utc>,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub version: u32,
    /// Serialización canónica de `{record, ir}`.
    pub data: Value,
    pub metadata: EnvelopeMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Lo que el backend guarda literalmente bajo la clave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedEnvelope {
    pub key: String,
    pub state: PersistedState,
}

impl PersistedEnvelope {
    /// Sella registro + grafo en un sobre versionado con checksum.
    pub fn seal(mut record: SuspensionRecord, ir: &IrGraph) -> Result<PersistedEnvelope, FlowError> {
        let key = record.key.clone();
        let ttl_secs = record.expires_at
                             .map(|exp| (exp - record.created_at).num_seconds().max(0) as u64);
        let expires_at = record.expires_at;

        // checksum y size se calculan sobre la forma canónica sin ellos
        record.size = 0;
        record.checksum = None;
        let data = json!({
            "record": serde_json::to_value(&record).map_err(|e| seal_err(&key, e))?,
            "ir": serde_json::to_value(ir).map_err(|e| seal_err(&key, e))?,
        });
        let canonical = canonical_payload(&data);
        let size = canonical.len() as u64;
        let checksum = payload_digest(&canonical);

        Ok(PersistedEnvelope { key: key.clone(),
                               state: PersistedState { version: RECORD_VERSION,
                                                       data,
                                                       metadata: EnvelopeMeta { serialized_at: Utc::now(),
                                                                                size,
                                                                                checksum: Some(checksum) },
                                                       ttl_secs,
                                                       expires_at } })
    }

    /// Abre el sobre verificando versión y checksum. Devuelve el registro
    /// (con size/checksum reinyectados) y el grafo congelado.
    pub fn open(&self) -> Result<(SuspensionRecord, IrGraph), FlowError> {
        if self.state.version != RECORD_VERSION {
            return Err(FlowError::Persistence { key: self.key.clone(),
                                                message: format!("unsupported record version {}",
                                                                 self.state.version) });
        }
        if let Some(expected) = &self.state.metadata.checksum {
            let canonical = canonical_payload(&self.state.data);
            let actual = payload_digest(&canonical);
            if &actual != expected {
                return Err(FlowError::Persistence { key: self.key.clone(),
                                                    message: "record checksum mismatch".to_string() });
            }
        }
        let record_value = self.state
                               .data
                               .get("record")
                               .cloned()
                               .ok_or_else(|| open_err(&self.key, "missing 'record' in envelope data"))?;
        let ir_value = self.state
                           .data
                           .get("ir")
                           .cloned()
                           .ok_or_else(|| open_err(&self.key, "missing 'ir' in envelope data"))?;
        let mut record: SuspensionRecord =
            serde_json::from_value(record_value).map_err(|e| open_err(&self.key, &e.to_string()))?;
        let ir: IrGraph = serde_json::from_value(ir_value).map_err(|e| open_err(&self.key, &e.to_string()))?;
        record.size = self.state.metadata.size;
        record.checksum = self.state.metadata.checksum.clone();
        Ok((record, ir))
    }

    /// Un sobre expirado se trata como ausente en el retrieve.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.state.expires_at, Some(exp) if exp <= now)
    }
}

fn seal_err(key: &str, e: impl std::fmt::Display) -> FlowError {
    FlowError::Persistence { key: key.to_string(),
                             message: format!("failed to serialize suspension record: {e}") }
}

fn open_err(key: &str, msg: &str) -> FlowError {
    FlowError::Persistence { key: key.to_string(),
                             message: format!("failed to rehydrate suspension record: {msg}") }
}
