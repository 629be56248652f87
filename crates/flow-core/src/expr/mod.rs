//! Evaluador de condiciones.
//!
//! Gramática soportada: `EXPR OP EXPR` con OP ∈ {==, !=, <, <=, >, >=} y
//! composición con `&&` / `||` (sin paréntesis). Cada EXPR es un literal JSON
//! o un path `$variable.campo` leído del scope stack. Una variable ausente
//! nunca matchea (toda comparación que la involucre es falsa). La evaluación
//! es pura: sin llamadas, sin aritmética.

use serde_json::Value;

use crate::context::ScopeStack;
use crate::errors::FlowError;

/// Evalúa una expresión de condición contra el scope actual.
pub fn eval_condition(expr: &str, scope: &ScopeStack) -> Result<bool, FlowError> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(invalid(expr, "empty condition"));
    }
    // || tiene menor precedencia que &&
    for part in split_top(expr, "||") {
        if eval_conjunction(&part, scope)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn eval_conjunction(expr: &str, scope: &ScopeStack) -> Result<bool, FlowError> {
    for part in split_top(expr, "&&") {
        if !eval_comparison(&part, scope)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Split ingenuo: la gramática no tiene paréntesis ni strings con `&&`/`||`
/// embebidos, así que un split literal alcanza.
fn split_top(expr: &str, sep: &str) -> Vec<String> {
    expr.split(sep).map(|s| s.trim().to_string()).collect()
}

const COMPARATORS: [&str; 6] = ["==", "!=", "<=", ">=", "<", ">"];

fn eval_comparison(expr: &str, scope: &ScopeStack) -> Result<bool, FlowError> {
    for op in COMPARATORS {
        if let Some((lhs, rhs)) = expr.split_once(op) {
            let l = operand(lhs.trim(), scope);
            let r = operand(rhs.trim(), scope);
            // operando ausente ⇒ la comparación nunca matchea
            let (l, r) = match (l, r) {
                (Some(l), Some(r)) => (l, r),
                _ => return Ok(false),
            };
            return compare(op, &l, &r, expr);
        }
    }
    // sin comparador: truthiness del operando solo
    Ok(operand(expr, scope).map(|v| truthy(&v)).unwrap_or(false))
}

/// Resuelve un operando: `$path` desde el scope, si no literal JSON. Un
/// literal no parseable se trata como string crudo.
fn operand(raw: &str, scope: &ScopeStack) -> Option<Value> {
    if let Some(path) = raw.strip_prefix('$') {
        return lookup_path(scope, path);
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(v) => Some(v),
        Err(_) => Some(Value::String(raw.trim_matches('"').to_string())),
    }
}

/// Camina `nombre.campo.subcampo` desde el scope.
pub fn lookup_path(scope: &ScopeStack, path: &str) -> Option<Value> {
    let mut parts = path.split('.');
    let root = parts.next()?;
    let mut current = scope.get(root)?.clone();
    for key in parts {
        match current {
            Value::Object(ref map) => current = map.get(key)?.clone(),
            Value::Array(ref arr) => {
                let idx: usize = key.parse().ok()?;
                current = arr.get(idx)?.clone();
            }
            _ => return None,
        }
    }
    Some(current)
}

fn compare(op: &str, l: &Value, r: &Value, expr: &str) -> Result<bool, FlowError> {
    match op {
        "==" => Ok(loose_eq(l, r)),
        "!=" => Ok(!loose_eq(l, r)),
        "<" | "<=" | ">" | ">=" => {
            let ord = match (as_f64(l), as_f64(r)) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => match (l, r) {
                    (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                    _ => None,
                },
            };
            let Some(ord) = ord else {
                // tipos no ordenables entre sí: nunca matchea
                return Ok(false);
            };
            Ok(match op {
                "<" => ord == std::cmp::Ordering::Less,
                "<=" => ord != std::cmp::Ordering::Greater,
                ">" => ord == std::cmp::Ordering::Greater,
                ">=" => ord != std::cmp::Ordering::Less,
                _ => unreachable!(),
            })
        }
        _ => Err(invalid(expr, "unknown comparator")),
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    v.as_f64()
}

/// Igualdad laxa: números comparan por valor aunque difiera la representación.
fn loose_eq(l: &Value, r: &Value) -> bool {
    match (as_f64(l), as_f64(r)) {
        (Some(a), Some(b)) => a == b,
        _ => l == r,
    }
}

/// Truthiness al estilo del resto del motor: null/false/0/""/[] son falsos.
pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}

fn invalid(expr: &str, why: &str) -> FlowError {
    FlowError::Execution { node_id: expr.to_string(),
                           node_kind: "condition".to_string(),
                           message: format!("invalid condition: {why}") }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope(pairs: &[(&str, Value)]) -> ScopeStack {
        let mut s = ScopeStack::new();
        for (k, v) in pairs {
            s.set(*k, v.clone());
        }
        s
    }

    #[test]
    fn numeric_comparison() {
        let s = scope(&[("n", json!(7))]);
        assert!(eval_condition("$n > 5", &s).unwrap());
        assert!(!eval_condition("$n > 9", &s).unwrap());
        assert!(eval_condition("$n == 7", &s).unwrap());
    }

    #[test]
    fn missing_variable_never_matches() {
        let s = scope(&[]);
        assert!(!eval_condition("$ghost == 1", &s).unwrap());
        assert!(!eval_condition("$ghost != 1", &s).unwrap());
        assert!(!eval_condition("$ghost", &s).unwrap());
    }

    #[test]
    fn conjunction_and_disjunction() {
        let s = scope(&[("a", json!(1)), ("b", json!("x"))]);
        assert!(eval_condition("$a == 1 && $b == \"x\"", &s).unwrap());
        assert!(!eval_condition("$a == 2 && $b == \"x\"", &s).unwrap());
        assert!(eval_condition("$a == 2 || $b == \"x\"", &s).unwrap());
    }

    #[test]
    fn path_navigation() {
        let s = scope(&[("user", json!({"profile": {"age": 30}}))]);
        assert!(eval_condition("$user.profile.age >= 18", &s).unwrap());
    }

    #[test]
    fn string_ordering_is_lexicographic() {
        let s = scope(&[("name", json!("ana"))]);
        assert!(eval_condition("$name < \"zoe\"", &s).unwrap());
    }
}
