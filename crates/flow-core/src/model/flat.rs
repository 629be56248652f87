//! Documentos de workflow: forma recursiva y forma plana canónica.
//!
//! La forma plana es la representación on-the-wire: todos los steps viven en
//! una lista única y los atributos de hijos son arrays de ids. La ley de
//! round-trip `from_flat(to_flat(w)) ≡ w` se garantiza en `catalog::flatten`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::step::{LoopType, Step, StepCommon, SwitchOption};

/// Metadatos libres del documento.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Marca de origen cuando el documento fue producido por un generador.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated: Option<bool>,
}

/// Forma recursiva: steps raíz con hijos inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub version: String,
    #[serde(default)]
    pub metadata: WorkflowMeta,
    pub steps: Vec<Step>,
}

/// Forma plana canónica: `{version, metadata, steps, rootIds}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatWorkflow {
    pub version: String,
    #[serde(default)]
    pub metadata: WorkflowMeta,
    pub steps: Vec<FlatStep>,
    pub root_ids: Vec<String>,
}

impl Workflow {
    pub fn new(version: impl Into<String>, steps: Vec<Step>) -> Self {
        Self { version: version.into(),
               metadata: WorkflowMeta::default(),
               steps }
    }

    /// Parse desde JSON crudo. Errores de shape se reportan como `Parse` con
    /// un fragmento truncado del input.
    pub fn from_json(raw: &str) -> Result<Self, crate::errors::FlowError> {
        serde_json::from_str(raw).map_err(|e| crate::errors::FlowError::Parse { message: e.to_string(),
                                                                                snippet: Some(truncate(raw, 200)) })
    }
}

impl FlatWorkflow {
    pub fn from_json(raw: &str) -> Result<Self, crate::errors::FlowError> {
        serde_json::from_str(raw).map_err(|e| crate::errors::FlowError::Parse { message: e.to_string(),
                                                                                snippet: Some(truncate(raw, 200)) })
    }

    pub fn step(&self, id: &str) -> Option<&FlatStep> {
        self.steps.iter().find(|s| s.id() == id)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

/// Operador en forma plana: hijos referenciados por id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FlatStep {
    #[serde(rename_all = "camelCase")]
    Tool {
        #[serde(flatten)]
        common: StepCommon,
        tool_id: String,
        #[serde(default)]
        args: IndexMap<String, Value>,
    },
    #[serde(rename_all = "camelCase")]
    Filter {
        #[serde(flatten)]
        common: StepCommon,
        collection: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        predicate: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        with: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Conditional {
        #[serde(flatten)]
        common: StepCommon,
        condition: String,
        then_steps: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        else_steps: Option<Vec<String>>,
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
        body: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Map {
        #[serde(flatten)]
        common: StepCommon,
        collection: Value,
        with: String,
    },
    #[serde(rename_all = "camelCase")]
    Reduce {
        #[serde(flatten)]
        common: StepCommon,
        collection: Value,
        initial_value: Value,
        with: String,
    },
    #[serde(rename_all = "camelCase")]
    Parallel {
        #[serde(flatten)]
        common: StepCommon,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branches: Option<Vec<Vec<String>>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parallel: Option<Vec<String>>,
    },
    #[serde(rename_all = "camelCase")]
    Switch {
        #[serde(flatten)]
        common: StepCommon,
        discriminator: String,
        options: Vec<SwitchOption>,
        branches: IndexMap<String, Vec<String>>,
    },
}

impl FlatStep {
    pub fn common(&self) -> &StepCommon {
        match self {
            FlatStep::Tool { common, .. }
            | FlatStep::Filter { common, .. }
            | FlatStep::Conditional { common, .. }
            | FlatStep::Loop { common, .. }
            | FlatStep::Map { common, .. }
            | FlatStep::Reduce { common, .. }
            | FlatStep::Parallel { common, .. }
            | FlatStep::Switch { common, .. } => common,
        }
    }

    pub fn id(&self) -> &str {
        &self.common().id
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            FlatStep::Tool { .. } => "tool",
            FlatStep::Filter { .. } => "filter",
            FlatStep::Conditional { .. } => "conditional",
            FlatStep::Loop { .. } => "loop",
            FlatStep::Map { .. } => "map",
            FlatStep::Reduce { .. } => "reduce",
            FlatStep::Parallel { .. } => "parallel",
            FlatStep::Switch { .. } => "switch",
        }
    }

    /// Ids de hijos directos en orden de declaración.
    pub fn child_ids(&self) -> Vec<&str> {
        match self {
            FlatStep::Tool { .. } => vec![],
            FlatStep::Filter { with, .. } => with.iter().map(|s| s.as_str()).collect(),
            FlatStep::Conditional { then_steps, else_steps, .. } => {
                let mut out: Vec<&str> = then_steps.iter().map(|s| s.as_str()).collect();
                if let Some(e) = else_steps {
                    out.extend(e.iter().map(|s| s.as_str()));
                }
                out
            }
            FlatStep::Loop { body, .. } => body.iter().map(|s| s.as_str()).collect(),
            FlatStep::Map { with, .. } | FlatStep::Reduce { with, .. } => vec![with.as_str()],
            FlatStep::Parallel { branches, parallel, .. } => {
                let mut out = Vec::new();
                if let Some(groups) = branches {
                    for g in groups {
                        out.extend(g.iter().map(|s| s.as_str()));
                    }
                }
                if let Some(flat) = parallel {
                    out.extend(flat.iter().map(|s| s.as_str()));
                }
                out
            }
            FlatStep::Switch { branches, .. } => branches.values().flat_map(|v| v.iter().map(|s| s.as_str())).collect(),
        }
    }
}
