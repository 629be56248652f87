//! Nodos del IR.
//!
//! `IrNode` envuelve los campos comunes (output/timeout/retry) y un
//! `IrNodeKind` con el payload específico de cada variante. El contrato es
//! estable y serializable: los registros suspendidos embeben estos nodos.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::ValueRef;

/// Estrategia de join de un nodo paralelo. El rebaje siempre produce `All`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JoinStrategy {
    #[default]
    All,
}

/// Sub-tipo de loop en IR. `Filter` existe sólo aquí: el operador `filter`
/// se rebaja a un loop con predicado.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IrLoopType {
    For,
    While,
    Map,
    Reduce,
    Filter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IrNodeKind {
    #[serde(rename_all = "camelCase")]
    Tool {
        tool_id: String,
        args: IndexMap<String, ValueRef>,
    },
    #[serde(rename_all = "camelCase")]
    Sequence { children: Vec<String> },
    #[serde(rename_all = "camelCase")]
    Parallel {
        branches: Vec<Vec<String>>,
        join: JoinStrategy,
    },
    #[serde(rename_all = "camelCase")]
    Conditional {
        condition: String,
        then_branch: Vec<String>,
        /// Ausente ≠ vacío: se conserva la distinción del operador fuente.
        else_branch: Option<Vec<String>>,
    },
    #[serde(rename_all = "camelCase")]
    Loop {
        loop_type: IrLoopType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        collection: Option<ValueRef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        predicate: Option<String>,
        iterator_var: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        accumulator: Option<Value>,
        body: Vec<String>,
        /// Tope duro; siempre presente en la forma rebajada.
        max_iterations: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IrNode {
    pub id: String,
    pub kind: IrNodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl IrNode {
    pub fn new(id: impl Into<String>, kind: IrNodeKind) -> Self {
        Self { id: id.into(),
               kind,
               output: None,
               timeout_ms: None,
               retry: None,
               description: None }
    }

    /// Tag estable del tipo de nodo (para eventos y errores).
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            IrNodeKind::Tool { .. } => "tool",
            IrNodeKind::Sequence { .. } => "sequence",
            IrNodeKind::Parallel { .. } => "parallel",
            IrNodeKind::Conditional { .. } => "conditional",
            IrNodeKind::Loop { .. } => "loop",
        }
    }

    /// Ids de hijos directos en orden de declaración.
    pub fn child_ids(&self) -> Vec<&str> {
        match &self.kind {
            IrNodeKind::Tool { .. } => vec![],
            IrNodeKind::Sequence { children } => children.iter().map(|s| s.as_str()).collect(),
            IrNodeKind::Parallel { branches, .. } => branches.iter().flatten().map(|s| s.as_str()).collect(),
            IrNodeKind::Conditional { then_branch, else_branch, .. } => {
                let mut out: Vec<&str> = then_branch.iter().map(|s| s.as_str()).collect();
                if let Some(e) = else_branch {
                    out.extend(e.iter().map(|s| s.as_str()));
                }
                out
            }
            IrNodeKind::Loop { body, .. } => body.iter().map(|s| s.as_str()).collect(),
        }
    }
}
