//! Puerto de tools: contrato, resultado y registro.
//!
//! Rol en el flujo:
//! - Un `Tool` es la unidad externa de trabajo que el intérprete invoca.
//! - `ToolOutcome` es el resultado neutral: valor JSON o señal de suspensión
//!   (`SuspendSignal`), que el intérprete maneja en el call site: serializa
//!   estado, persiste y devuelve el control al caller.
//! - `ToolRegistry` es el registro inyectado (nunca singleton) con tabla de
//!   joins declarados entre esquemas de tools.

pub mod choice;

pub use choice::{ChoiceOutcome, ChoiceService};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::errors::FlowError;

/// Señal de suspensión devuelta por un tool (o por el servicio de choice).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SuspendSignal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Shape esperado del input con el que se resumirá.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub awaiting_input_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

/// Resultado neutral de ejecutar un tool.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Value(Value),
    Suspend(SuspendSignal),
}

/// Unidad externa de trabajo con esquemas tipados de entrada/salida.
#[async_trait]
pub trait Tool: Send + Sync {
    fn id(&self) -> &str;

    /// Nombre amigable opcional.
    fn name(&self) -> &str {
        self.id()
    }

    fn description(&self) -> &str {
        ""
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    fn output_schema(&self) -> Value {
        json!({})
    }

    /// Ejecuta con args ya resueltos (sin `$` pendientes).
    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolOutcome, FlowError>;
}

/// Descriptor serializable de un tool (sin la implementación).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
}

/// Snapshot del registro congelado dentro de un grafo IR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    pub tools: Vec<ToolSpec>,
    /// Pares (origen, destino) con join declarado.
    #[serde(default)]
    pub joins: Vec<(String, String)>,
}

impl RegistrySnapshot {
    pub fn contains(&self, tool_id: &str) -> bool {
        self.tools.iter().any(|t| t.id == tool_id)
    }

    pub fn spec(&self, tool_id: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.id == tool_id)
    }
}

/// Registro de tools compartido e inyectado. Tras la inicialización es
/// efectivamente inmutable; los updates pasan por el único escritor.
#[derive(Default)]
pub struct ToolRegistry {
    tools: DashMap<String, Arc<dyn Tool>>,
    joins: DashSet<(String, String)>,
}

// Debug manual: los tools son trait objects sin Debug; se muestran los ids.
impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
         .field("tool_ids", &self.ids())
         .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra (o reemplaza) un tool bajo su id.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.id().to_string(), tool);
    }

    pub fn get(&self, tool_id: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(tool_id).map(|t| Arc::clone(t.value()))
    }

    pub fn contains(&self, tool_id: &str) -> bool {
        self.tools.contains_key(tool_id)
    }

    /// Ids registrados, ordenados para determinismo.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tools.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Declara compatibilidad explícita entre la salida de `from` y la
    /// entrada de `to`. El validador la consulta antes de comparar esquemas.
    pub fn declare_join(&self, from: impl Into<String>, to: impl Into<String>) {
        self.joins.insert((from.into(), to.into()));
    }

    pub fn has_join(&self, from: &str, to: &str) -> bool {
        self.joins.contains(&(from.to_string(), to.to_string()))
    }

    /// Copia todos los tools y joins de `other` dentro de este registro.
    pub fn absorb(&self, other: &ToolRegistry) {
        for e in other.tools.iter() {
            self.tools.insert(e.key().clone(), Arc::clone(e.value()));
        }
        for j in other.joins.iter() {
            self.joins.insert(j.key().clone());
        }
    }

    /// Congela el estado observable en un snapshot serializable.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let mut tools: Vec<ToolSpec> = self.tools
                                           .iter()
                                           .map(|e| {
                                               let t = e.value();
                                               ToolSpec { id: t.id().to_string(),
                                                          name: t.name().to_string(),
                                                          description: t.description().to_string(),
                                                          input_schema: t.input_schema(),
                                                          output_schema: t.output_schema() }
                                           })
                                           .collect();
        tools.sort_by(|a, b| a.id.cmp(&b.id));
        let mut joins: Vec<(String, String)> = self.joins.iter().map(|j| j.key().clone()).collect();
        joins.sort();
        RegistrySnapshot { tools, joins }
    }
}
