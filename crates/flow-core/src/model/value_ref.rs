//! Gramática de referencias de valor.
//!
//! Un argumento de tool (o una colección de loop) puede ser:
//! - Literal: cualquier JSON que no sea string con prefijo `$`.
//! - Variable: `"$foo"` ⇒ nombre `foo`, resuelto contra el scope stack.
//! - Referencia: `"$nodo.salida"` ⇒ salida de un nodo previo.
//!
//! La regla de split es exactamente una vez sobre `.`: dos partes ⇒
//! referencia a nodo, una parte ⇒ variable.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ValueRef {
    Literal { value: Value },
    Variable { name: String },
    Reference {
        #[serde(rename = "nodeId")]
        node_id: String,
        #[serde(rename = "outputName", skip_serializing_if = "Option::is_none")]
        output: Option<String>,
    },
}

impl ValueRef {
    /// Interpreta un JSON crudo según la gramática `$`.
    pub fn from_value(v: &Value) -> ValueRef {
        if let Value::String(s) = v {
            if let Some(rest) = s.strip_prefix('$') {
                if !rest.is_empty() {
                    return Self::from_dollar(rest);
                }
            }
        }
        ValueRef::Literal { value: v.clone() }
    }

    /// Interpreta el cuerpo de una expresión `$` ya sin prefijo.
    pub fn from_dollar(body: &str) -> ValueRef {
        match body.split_once('.') {
            Some((node, out)) => ValueRef::Reference { node_id: node.to_string(),
                                                       output: if out.is_empty() { None } else { Some(out.to_string()) } },
            None => ValueRef::Variable { name: body.to_string() },
        }
    }

    /// Nombre raíz referenciado (`None` para literales). Lo usa el validador
    /// para el chequeo de variables definidas.
    pub fn root_name(&self) -> Option<&str> {
        match self {
            ValueRef::Literal { .. } => None,
            ValueRef::Variable { name } => Some(name),
            ValueRef::Reference { node_id, .. } => Some(node_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dollar_with_dot_is_reference() {
        let r = ValueRef::from_value(&json!("$fetch.out"));
        assert_eq!(r,
                   ValueRef::Reference { node_id: "fetch".into(),
                                         output: Some("out".into()) });
    }

    #[test]
    fn dollar_without_dot_is_variable() {
        let r = ValueRef::from_value(&json!("$item"));
        assert_eq!(r, ValueRef::Variable { name: "item".into() });
    }

    #[test]
    fn plain_values_are_literals() {
        assert_eq!(ValueRef::from_value(&json!(42)), ValueRef::Literal { value: json!(42) });
        assert_eq!(ValueRef::from_value(&json!("hola")), ValueRef::Literal { value: json!("hola") });
        // un "$" solo no es referencia válida: queda literal
        assert_eq!(ValueRef::from_value(&json!("$")), ValueRef::Literal { value: json!("$") });
    }
}
