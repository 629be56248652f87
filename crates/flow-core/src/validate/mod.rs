//! Validador estructural y semántico de workflows (forma plana).
//!
//! Corre los chequeos en orden fijo y acumula problemas en un reporte; nunca
//! entra en pánico con input malformado. Orden:
//! 1. Schema: versión soportada, steps no vacíos, ids presentes y únicos.
//! 2. Uso de tools: todo `toolId` y toda referencia `with` resuelven.
//! 3. Conexiones: pares tool→tool adyacentes sin join declarado y con
//!    esquemas incompatibles se reportan con sugerencia de join.
//! 4. Operaciones: colecciones/predicados/cuerpos requeridos presentes.
//! 5. Grafo: ciclos (fatal, DFS) y alcanzabilidad (warning, BFS desde raíces
//!    sin aristas entrantes; si no hay, el step 0).
//! 6. Referencias de variables: todo `$nombre` usado debe ser `input`, un id
//!    de nodo previo, un output declarado o un iterador en scope.
//!
//! La compatibilidad de esquemas es conservadora: misma referencia ⇒
//! compatible; ambos objetos ⇒ compatible; otro caso ⇒ incompatible.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::constants::SUPPORTED_WORKFLOW_VERSION;
use crate::model::{FlatStep, FlatWorkflow};
use crate::tool::ToolRegistry;

pub mod codes {
    pub const UNSUPPORTED_VERSION: &str = "UNSUPPORTED_VERSION";
    pub const EMPTY_WORKFLOW: &str = "EMPTY_WORKFLOW";
    pub const MISSING_ID: &str = "MISSING_ID";
    pub const DUPLICATE_ID: &str = "DUPLICATE_ID";
    pub const TOOL_NOT_FOUND: &str = "TOOL_NOT_FOUND";
    pub const DANGLING_REFERENCE: &str = "DANGLING_REFERENCE";
    pub const INCOMPATIBLE_CONNECTION: &str = "INCOMPATIBLE_CONNECTION";
    pub const MISSING_OPERATION: &str = "MISSING_OPERATION";
    pub const CYCLE_DETECTED: &str = "CYCLE_DETECTED";
    pub const UNREACHABLE_NODE: &str = "UNREACHABLE_NODE";
    pub const UNDEFINED_VARIABLE: &str = "UNDEFINED_VARIABLE";
}

/// Problema individual del reporte.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub code: String,
    /// Camino al step/atributo observado.
    pub path: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// Resumen legible (una línea por problema).
    pub fn render(&self) -> String {
        let mut out = String::new();
        for e in &self.errors {
            out.push_str(&format!("error[{}] {}: {}\n", e.code, e.path, e.message));
        }
        for w in &self.warnings {
            out.push_str(&format!("warning[{}] {}: {}\n", w.code, w.path, w.message));
        }
        if out.is_empty() {
            out.push_str("ok\n");
        }
        out
    }
}

/// Validador inyectado con el registro de tools a contrastar.
pub struct FlowValidator {
    registry: Option<Arc<ToolRegistry>>,
}

impl FlowValidator {
    pub fn new(registry: Option<Arc<ToolRegistry>>) -> Self {
        Self { registry }
    }

    pub fn validate(&self, fw: &FlatWorkflow) -> ValidationReport {
        let mut errors: Vec<ValidationIssue> = Vec::new();
        let mut warnings: Vec<ValidationIssue> = Vec::new();

        self.check_schema(fw, &mut errors);
        self.check_tools(fw, &mut errors);
        self.check_connections(fw, &mut errors);
        self.check_operations(fw, &mut errors);
        self.check_graph(fw, &mut errors, &mut warnings);
        self.check_variables(fw, &mut errors);

        ValidationReport { valid: errors.is_empty(),
                           errors,
                           warnings }
    }

    fn check_schema(&self, fw: &FlatWorkflow, errors: &mut Vec<ValidationIssue>) {
        if fw.version != SUPPORTED_WORKFLOW_VERSION {
            errors.push(ValidationIssue { code: codes::UNSUPPORTED_VERSION.into(),
                                          path: "version".into(),
                                          message: "unsupported workflow version".into(),
                                          expected: Some(SUPPORTED_WORKFLOW_VERSION.into()),
                                          actual: Some(fw.version.clone()) });
        }
        if fw.steps.is_empty() {
            errors.push(ValidationIssue { code: codes::EMPTY_WORKFLOW.into(),
                                          path: "steps".into(),
                                          message: "workflow must declare at least one step".into(),
                                          expected: None,
                                          actual: None });
        }
        let mut seen: HashSet<&str> = HashSet::new();
        for (i, s) in fw.steps.iter().enumerate() {
            if s.id().trim().is_empty() {
                errors.push(ValidationIssue { code: codes::MISSING_ID.into(),
                                              path: format!("steps[{i}]"),
                                              message: "step id must be non-empty".into(),
                                              expected: None,
                                              actual: None });
            } else if !seen.insert(s.id()) {
                errors.push(ValidationIssue { code: codes::DUPLICATE_ID.into(),
                                              path: format!("steps[{i}]"),
                                              message: "step id already declared".into(),
                                              expected: None,
                                              actual: Some(s.id().to_string()) });
            }
        }
    }

    fn check_tools(&self, fw: &FlatWorkflow, errors: &mut Vec<ValidationIssue>) {
        let ids: HashSet<&str> = fw.steps.iter().map(|s| s.id()).collect();
        for s in &fw.steps {
            if let FlatStep::Tool { tool_id, .. } = s {
                if let Some(reg) = &self.registry {
                    if !reg.contains(tool_id) {
                        errors.push(ValidationIssue { code: codes::TOOL_NOT_FOUND.into(),
                                                      path: format!("steps.{}.toolId", s.id()),
                                                      message: "tool is not registered".into(),
                                                      expected: None,
                                                      actual: Some(tool_id.clone()) });
                    }
                }
            }
            // referencias por id (with / hijos) deben resolver
            for child in s.child_ids() {
                if !ids.contains(child) {
                    errors.push(ValidationIssue { code: codes::DANGLING_REFERENCE.into(),
                                                  path: format!("steps.{}", s.id()),
                                                  message: "referenced step id is not declared".into(),
                                                  expected: None,
                                                  actual: Some(child.to_string()) });
                }
            }
        }
    }

    /// Pares tool→tool adyacentes en cada secuencia declarada.
    fn sequences<'a>(&self, fw: &'a FlatWorkflow) -> Vec<Vec<&'a str>> {
        let mut seqs: Vec<Vec<&str>> = vec![fw.root_ids.iter().map(|s| s.as_str()).collect()];
        for s in &fw.steps {
            match s {
                FlatStep::Conditional { then_steps, else_steps, .. } => {
                    seqs.push(then_steps.iter().map(|s| s.as_str()).collect());
                    if let Some(e) = else_steps {
                        seqs.push(e.iter().map(|s| s.as_str()).collect());
                    }
                }
                FlatStep::Loop { body, .. } => seqs.push(body.iter().map(|s| s.as_str()).collect()),
                FlatStep::Parallel { branches, parallel, .. } => {
                    if let Some(groups) = branches {
                        for g in groups {
                            seqs.push(g.iter().map(|s| s.as_str()).collect());
                        }
                    }
                    if let Some(list) = parallel {
                        for id in list {
                            seqs.push(vec![id.as_str()]);
                        }
                    }
                }
                FlatStep::Switch { branches, .. } => {
                    for ids in branches.values() {
                        seqs.push(ids.iter().map(|s| s.as_str()).collect());
                    }
                }
                _ => {}
            }
        }
        seqs
    }

    fn check_connections(&self, fw: &FlatWorkflow, errors: &mut Vec<ValidationIssue>) {
        let Some(reg) = &self.registry else { return };
        let by_id: HashMap<&str, &FlatStep> = fw.steps.iter().map(|s| (s.id(), s)).collect();
        let snapshot = reg.snapshot();

        for seq in self.sequences(fw) {
            for pair in seq.windows(2) {
                let (Some(FlatStep::Tool { tool_id: from, .. }), Some(FlatStep::Tool { tool_id: to, .. })) =
                    (by_id.get(pair[0]).copied(), by_id.get(pair[1]).copied())
                else {
                    continue;
                };
                if reg.has_join(from, to) {
                    continue;
                }
                let (Some(a), Some(b)) = (snapshot.spec(from), snapshot.spec(to)) else {
                    continue; // tool ausente ya reportado en check_tools
                };
                if !schemas_compatible(&a.output_schema, &b.input_schema) {
                    errors.push(ValidationIssue { code: codes::INCOMPATIBLE_CONNECTION.into(),
                                                  path: format!("steps.{}->steps.{}", pair[0], pair[1]),
                                                  message: format!("output of '{from}' is not compatible with input \
                                                                    of '{to}'; declare a join between them"),
                                                  expected: Some(b.input_schema.to_string()),
                                                  actual: Some(a.output_schema.to_string()) });
                }
            }
        }
    }

    fn check_operations(&self, fw: &FlatWorkflow, errors: &mut Vec<ValidationIssue>) {
        for s in &fw.steps {
            let missing: Option<&str> = match s {
                FlatStep::Map { collection, .. } if collection.is_null() => Some("map requires 'collection'"),
                FlatStep::Reduce { collection, .. } if collection.is_null() => Some("reduce requires 'collection'"),
                FlatStep::Filter { collection, predicate, with, .. } => {
                    if collection.is_null() {
                        Some("filter requires 'collection'")
                    } else if predicate.is_none() && with.is_none() {
                        Some("filter requires 'predicate' or 'with'")
                    } else {
                        None
                    }
                }
                FlatStep::Conditional { condition, .. } if condition.trim().is_empty() => {
                    Some("conditional requires 'condition'")
                }
                FlatStep::Loop { body, .. } if body.is_empty() => Some("loop requires a non-empty body"),
                _ => None,
            };
            if let Some(msg) = missing {
                errors.push(ValidationIssue { code: codes::MISSING_OPERATION.into(),
                                              path: format!("steps.{}", s.id()),
                                              message: msg.into(),
                                              expected: None,
                                              actual: None });
            }
        }
    }

    fn check_graph(&self, fw: &FlatWorkflow, errors: &mut Vec<ValidationIssue>, warnings: &mut Vec<ValidationIssue>) {
        let by_id: HashMap<&str, &FlatStep> = fw.steps.iter().map(|s| (s.id(), s)).collect();

        // adyacencia: contención (padre→hijos) + secuencia de raíces
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut incoming: HashMap<&str, usize> = HashMap::new();
        for s in &fw.steps {
            let children: Vec<&str> = s.child_ids().into_iter().filter(|c| by_id.contains_key(c)).collect();
            for c in &children {
                *incoming.entry(*c).or_default() += 1;
            }
            adjacency.insert(s.id(), children);
        }
        for pair in fw.root_ids.windows(2) {
            if by_id.contains_key(pair[0].as_str()) && by_id.contains_key(pair[1].as_str()) {
                adjacency.entry(pair[0].as_str()).or_default().push(pair[1].as_str());
                *incoming.entry(pair[1].as_str()).or_default() += 1;
            }
        }

        // ciclos: DFS tri-color (gris = en stack)
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Grey,
            Black,
        }
        let mut color: HashMap<&str, Color> = by_id.keys().map(|k| (*k, Color::White)).collect();
        let mut cycle: Option<String> = None;

        fn dfs<'a>(id: &'a str,
                   adjacency: &HashMap<&'a str, Vec<&'a str>>,
                   color: &mut HashMap<&'a str, Color>)
                   -> Option<String> {
            color.insert(id, Color::Grey);
            for next in adjacency.get(id).into_iter().flatten() {
                match color.get(next).copied() {
                    Some(Color::Grey) => return Some(next.to_string()),
                    Some(Color::White) => {
                        if let Some(c) = dfs(next, adjacency, color) {
                            return Some(c);
                        }
                    }
                    _ => {}
                }
            }
            color.insert(id, Color::Black);
            None
        }

        for s in &fw.steps {
            if matches!(color.get(s.id()).copied(), Some(Color::White)) {
                if let Some(c) = dfs(s.id(), &adjacency, &mut color) {
                    cycle = Some(c);
                    break;
                }
            }
        }
        if let Some(at) = cycle {
            errors.push(ValidationIssue { code: codes::CYCLE_DETECTED.into(),
                                          path: format!("steps.{at}"),
                                          message: "workflow graph contains a directed cycle".into(),
                                          expected: None,
                                          actual: None });
            return; // alcanzabilidad no es significativa con ciclos
        }

        // raíces: los root_ids declarados; a falta de ellos, nodos sin
        // aristas entrantes; último recurso, el step 0
        let mut roots: Vec<&str> = fw.root_ids
                                     .iter()
                                     .map(|s| s.as_str())
                                     .filter(|id| by_id.contains_key(*id))
                                     .collect();
        if roots.is_empty() {
            roots = fw.steps
                      .iter()
                      .map(|s| s.id())
                      .filter(|id| incoming.get(id).copied().unwrap_or(0) == 0)
                      .collect();
        }
        if roots.is_empty() {
            if let Some(first) = fw.steps.first() {
                roots.push(first.id());
            }
        }
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        for r in roots {
            if seen.insert(r) {
                queue.push_back(r);
            }
        }
        while let Some(id) = queue.pop_front() {
            for next in adjacency.get(id).into_iter().flatten() {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        let unreachable: Vec<&str> = fw.steps.iter().map(|s| s.id()).filter(|id| !seen.contains(id)).collect();
        if !unreachable.is_empty() {
            warnings.push(ValidationIssue { code: codes::UNREACHABLE_NODE.into(),
                                            path: "steps".into(),
                                            message: format!("unreachable steps: {}", unreachable.join(", ")),
                                            expected: None,
                                            actual: None });
        }
    }

    fn check_variables(&self, fw: &FlatWorkflow, errors: &mut Vec<ValidationIssue>) {
        // definidos: input implícito, ids de nodos, outputs declarados,
        // iteradores y el acumulador de reduce
        let mut defined: HashSet<String> = HashSet::new();
        defined.insert(crate::constants::INPUT_VAR.to_string());
        defined.insert(crate::constants::ACC_VAR.to_string());
        defined.insert(crate::constants::DEFAULT_ITERATOR_VAR.to_string());
        for s in &fw.steps {
            defined.insert(s.id().to_string());
            if let Some(out) = &s.common().output {
                defined.insert(out.clone());
            }
            if let FlatStep::Loop { iterator_var: Some(var), .. } = s {
                defined.insert(var.clone());
            }
        }

        for s in &fw.steps {
            let mut check_value = |path: &str, v: &Value, errors: &mut Vec<ValidationIssue>| {
                collect_dollar_roots(v, &mut |root| {
                    if !defined.contains(root) {
                        errors.push(ValidationIssue { code: codes::UNDEFINED_VARIABLE.into(),
                                                      path: path.to_string(),
                                                      message: format!("'${root}' does not refer to input, a prior \
                                                                        node output or an enclosing binding"),
                                                      expected: None,
                                                      actual: Some(format!("${root}")) });
                    }
                });
            };
            match s {
                FlatStep::Tool { args, .. } => {
                    for (k, v) in args {
                        check_value(&format!("steps.{}.args.{k}", s.id()), v, errors);
                    }
                }
                FlatStep::Map { collection, .. }
                | FlatStep::Reduce { collection, .. }
                | FlatStep::Filter { collection, .. } => {
                    check_value(&format!("steps.{}.collection", s.id()), collection, errors);
                }
                FlatStep::Loop { collection: Some(c), .. } => {
                    check_value(&format!("steps.{}.collection", s.id()), c, errors);
                }
                _ => {}
            }
        }
    }
}

/// Recorre un valor y reporta la raíz de cada string `$name` / `$name.path`.
fn collect_dollar_roots(v: &Value, f: &mut impl FnMut(&str)) {
    match v {
        Value::String(s) => {
            if let Some(rest) = s.strip_prefix('$') {
                if !rest.is_empty() {
                    let root = rest.split('.').next().unwrap_or(rest);
                    f(root);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_dollar_roots(item, f);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_dollar_roots(item, f);
            }
        }
        _ => {}
    }
}

/// Conservador: misma referencia ⇒ compatible; ambos objetos ⇒ compatible;
/// otro caso ⇒ incompatible.
fn schemas_compatible(output: &Value, input: &Value) -> bool {
    if output == input {
        return true;
    }
    let is_object = |v: &Value| v.get("type").and_then(Value::as_str) == Some("object");
    is_object(output) && is_object(input)
}
