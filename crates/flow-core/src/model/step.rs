//! Conjunto cerrado de operadores (forma recursiva).
//!
//! Cada variante lleva el tag `kind` en el wire y comparte los campos
//! opcionales comunes (`output`, `timeoutMs`, `retry`, `description`) vía
//! `StepCommon`. Los hijos van inline; la forma plana (hijos por id) vive en
//! `model::flat`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Campos comunes opcionales de todo operador.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StepCommon {
    pub id: String,
    /// Variable donde escribir el resultado del nodo al completar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl StepCommon {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self { id: id.into(), ..Default::default() }
    }
}

/// Sub-tipo de un operador `loop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopType {
    For,
    While,
    Map,
    Reduce,
}

/// Descriptor de opción de un `switch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchOption {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Operador en forma recursiva (hijos inline).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Step {
    #[serde(rename_all = "camelCase")]
    Tool {
        #[serde(flatten)]
        common: StepCommon,
        tool_id: String,
        /// Mapa nombre→valor crudo; la gramática `$` se interpreta al rebajar.
        #[serde(default)]
        args: IndexMap<String, Value>,
    },
    #[serde(rename_all = "camelCase")]
    Filter {
        #[serde(flatten)]
        common: StepCommon,
        collection: Value,
        /// Expresión de predicado; alternativa al step anidado `with`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        predicate: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        with: Option<Box<Step>>,
    },
    #[serde(rename_all = "camelCase")]
    Conditional {
        #[serde(flatten)]
        common: StepCommon,
        condition: String,
        then_steps: Vec<Step>,
        /// Ausente ≠ vacío: un else ausente queda `None` también en IR.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        else_steps: Option<Vec<Step>>,
    },
    #[serde(rename_all = "camelCase")]
    Loop {
        #[serde(flatten)]
        common: StepCommon,
        loop_type: LoopType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        collection: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        iterator_var: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        accumulator: Option<Value>,
        body: Vec<Step>,
    },
    #[serde(rename_all = "camelCase")]
    Map {
        #[serde(flatten)]
        common: StepCommon,
        collection: Value,
        with: Box<Step>,
    },
    #[serde(rename_all = "camelCase")]
    Reduce {
        #[serde(flatten)]
        common: StepCommon,
        collection: Value,
        initial_value: Value,
        with: Box<Step>,
    },
    #[serde(rename_all = "camelCase")]
    Parallel {
        #[serde(flatten)]
        common: StepCommon,
        /// Grupos explícitos de ramas (lista de listas ordenadas).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branches: Option<Vec<Vec<Step>>>,
        /// Forma plana: una sola rama por step listado.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parallel: Option<Vec<Step>>,
    },
    #[serde(rename_all = "camelCase")]
    Switch {
        #[serde(flatten)]
        common: StepCommon,
        discriminator: String,
        options: Vec<SwitchOption>,
        branches: IndexMap<String, Vec<Step>>,
    },
}

impl Step {
    pub fn common(&self) -> &StepCommon {
        match self {
            Step::Tool { common, .. }
            | Step::Filter { common, .. }
            | Step::Conditional { common, .. }
            | Step::Loop { common, .. }
            | Step::Map { common, .. }
            | Step::Reduce { common, .. }
            | Step::Parallel { common, .. }
            | Step::Switch { common, .. } => common,
        }
    }

    pub fn id(&self) -> &str {
        &self.common().id
    }

    /// Tag estable del kind, igual al valor serializado.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Step::Tool { .. } => "tool",
            Step::Filter { .. } => "filter",
            Step::Conditional { .. } => "conditional",
            Step::Loop { .. } => "loop",
            Step::Map { .. } => "map",
            Step::Reduce { .. } => "reduce",
            Step::Parallel { .. } => "parallel",
            Step::Switch { .. } => "switch",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_step_wire_shape() {
        let raw = json!({
            "kind": "tool",
            "id": "fetch",
            "toolId": "http_fetch",
            "args": { "url": "https://example" },
            "output": "page"
        });
        let step: Step = serde_json::from_value(raw).expect("parse");
        assert_eq!(step.id(), "fetch");
        assert_eq!(step.kind_name(), "tool");
        match &step {
            Step::Tool { tool_id, args, common } => {
                assert_eq!(tool_id, "http_fetch");
                assert_eq!(args.get("url"), Some(&json!("https://example")));
                assert_eq!(common.output.as_deref(), Some("page"));
            }
            other => panic!("unexpected kind: {}", other.kind_name()),
        }
    }

    #[test]
    fn absent_else_stays_none() {
        let raw = json!({
            "kind": "conditional",
            "id": "c1",
            "condition": "$n > 5",
            "thenSteps": []
        });
        let step: Step = serde_json::from_value(raw).expect("parse");
        match step {
            Step::Conditional { else_steps, .. } => assert!(else_steps.is_none()),
            _ => unreachable!(),
        }
    }
}
