//! Resolución de argumentos de tools.
//!
//! Orden por argumento `(clave, valor)`:
//! - String con prefijo `$`: split único en `.`; dos partes ⇒ referencia a
//!   salida de nodo, una ⇒ variable del scope.
//! - Cualquier otro valor ⇒ literal, resuelto recursivamente (elementos de
//!   array primero, luego valores de objeto) para soportar `$` anidados.
//!
//! Una referencia cuyo nodo no registró salida cae a lookup de variable con
//! path (`$page.title` donde `page` es una variable objeto); si tampoco
//! existe, es error de ejecución.

use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::context::ExecutionContext;
use crate::errors::FlowError;
use crate::expr::lookup_path;
use crate::model::ValueRef;

/// Resuelve el mapa completo de args a un objeto JSON listo para el tool.
pub fn resolve_args(node_id: &str,
                    args: &IndexMap<String, ValueRef>,
                    cx: &ExecutionContext,
                    outputs: &HashMap<String, Value>)
                    -> Result<Value, FlowError> {
    let mut obj = Map::new();
    for (k, v) in args {
        obj.insert(k.clone(), resolve_ref(node_id, v, cx, outputs)?);
    }
    Ok(Value::Object(obj))
}

/// Resuelve una referencia individual.
pub fn resolve_ref(node_id: &str,
                   vref: &ValueRef,
                   cx: &ExecutionContext,
                   outputs: &HashMap<String, Value>)
                   -> Result<Value, FlowError> {
    match vref {
        ValueRef::Literal { value } => resolve_literal(node_id, value, cx, outputs),
        ValueRef::Variable { name } => {
            cx.variables
              .get(name)
              .cloned()
              .ok_or_else(|| missing(node_id, &format!("variable '{name}' is not defined in scope")))
        }
        ValueRef::Reference { node_id: target, output } => {
            if let Some(result) = outputs.get(target) {
                return project_output(node_id, target, result, output.as_deref());
            }
            // fallback: variable objeto con path
            let path = match output {
                Some(out) => format!("{target}.{out}"),
                None => target.clone(),
            };
            lookup_path(&cx.variables, &path)
                .ok_or_else(|| missing(node_id, &format!("'${path}' does not resolve to a node output or variable")))
        }
    }
}

/// Proyecta `$nodo.salida` sobre el resultado registrado del nodo. Los
/// nombres convencionales (`out`/`output`/`result`) devuelven el resultado
/// completo; otro nombre indexa el campo homónimo.
fn project_output(node_id: &str, target: &str, result: &Value, output: Option<&str>) -> Result<Value, FlowError> {
    match output {
        None | Some("out") | Some("output") | Some("result") => Ok(result.clone()),
        Some(field) => match result.get(field) {
            Some(v) => Ok(v.clone()),
            None => Err(missing(node_id,
                                &format!("output of node '{target}' has no field '{field}'"))),
        },
    }
}

/// Literales con `$` anidados: arrays y objetos se recorren recursivamente.
fn resolve_literal(node_id: &str,
                   value: &Value,
                   cx: &ExecutionContext,
                   outputs: &HashMap<String, Value>)
                   -> Result<Value, FlowError> {
    match value {
        Value::String(s) if s.starts_with('$') && s.len() > 1 => {
            resolve_ref(node_id, &ValueRef::from_value(value), cx, outputs)
        }
        Value::Array(items) => {
            let resolved = items.iter()
                                .map(|v| resolve_literal(node_id, v, cx, outputs))
                                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(resolved))
        }
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), resolve_literal(node_id, v, cx, outputs)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn missing(node_id: &str, message: &str) -> FlowError {
    FlowError::Execution { node_id: node_id.to_string(),
                           node_kind: "tool".to_string(),
                           message: message.to_string() }
}
