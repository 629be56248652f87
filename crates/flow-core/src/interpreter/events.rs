//! Eventos de ejecución y su sink.
//!
//! Rol en el flujo:
//! - El intérprete emite un stream de eventos por flujo: `node-start` precede
//!   estrictamente a `node-complete`/`node-error` del mismo nodo, y
//!   `flow-complete`/`flow-error`/`flow-suspended` es terminal.
//! - `seq` es asignado por el sink en orden de emisión; `ts` es metadato y no
//!   participa de ningún hash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::errors::ErrorReport;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum FlowEventKind {
    #[serde(rename_all = "camelCase")]
    NodeStart { node_id: String, node_type: String },
    #[serde(rename_all = "camelCase")]
    NodeComplete {
        node_id: String,
        node_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    #[serde(rename_all = "camelCase")]
    NodeError {
        node_id: String,
        node_type: String,
        error: ErrorReport,
    },
    #[serde(rename_all = "camelCase")]
    FlowComplete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    #[serde(rename_all = "camelCase")]
    FlowError { error: ErrorReport },
    #[serde(rename_all = "camelCase")]
    FlowSuspended {
        suspension_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    FlowResumed { suspension_key: String },
}

impl FlowEventKind {
    /// ¿Cierra el stream del flujo?
    pub fn is_terminal(&self) -> bool {
        matches!(self,
                 FlowEventKind::FlowComplete { .. }
                 | FlowEventKind::FlowError { .. }
                 | FlowEventKind::FlowSuspended { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowEvent {
    /// Orden de emisión dentro del flujo (asignado por el sink).
    pub seq: u64,
    pub flow_id: Uuid,
    #[serde(flatten)]
    pub kind: FlowEventKind,
    /// Metadato; no entra en ningún fingerprint.
    pub ts: DateTime<Utc>,
}

/// Emisor de eventos del run. Sin canal conectado, emite a la nada (el run
/// no-streaming no paga el costo).
#[derive(Debug, Clone)]
pub struct EventSink {
    flow_id: Uuid,
    tx: Option<UnboundedSender<FlowEvent>>,
    seq: Arc<AtomicU64>,
}

impl EventSink {
    pub fn new(flow_id: Uuid, tx: Option<UnboundedSender<FlowEvent>>) -> Self {
        Self { flow_id,
               tx,
               seq: Arc::new(AtomicU64::new(0)) }
    }

    pub fn emit(&self, kind: FlowEventKind) {
        if let Some(tx) = &self.tx {
            let ev = FlowEvent { seq: self.seq.fetch_add(1, Ordering::SeqCst),
                                 flow_id: self.flow_id,
                                 kind,
                                 ts: Utc::now() };
            // receptor dropeado: el run sigue; los eventos son best-effort
            let _ = tx.send(ev);
        }
    }
}
