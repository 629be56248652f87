//! Scopes de variables en stack.
//!
//! Reglas:
//! - `get` consulta del frame más interno hacia afuera.
//! - `set` escribe siempre en el frame más interno; `rebind` busca el frame
//!   más cercano que ya posea el nombre (escritura explícita de rebinding).
//! - `push_child` abre un frame vacío; `pop` lo descarta sin merge. Los
//!   cuerpos de loop, ramas condicionales y ramas paralelas viven en frames
//!   hijos que nunca se fusionan de vuelta.
//!
//! Los frames se guardan por valor y el padre es posición en el vector, nunca
//! un back-pointer: el stack completo es serializable y viaja dentro de los
//! registros de suspensión.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeStack {
    frames: Vec<HashMap<String, Value>>,
}

impl ScopeStack {
    /// Stack con un único frame raíz vacío.
    pub fn new() -> Self {
        Self { frames: vec![HashMap::new()] }
    }

    /// Stack raíz con `input` pre-ligado.
    pub fn with_input(input: Value) -> Self {
        let mut s = Self::new();
        s.set(crate::constants::INPUT_VAR, input);
        s
    }

    /// Lookup del frame interno hacia afuera.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.frames.iter().rev().find_map(|f| f.get(name))
    }

    /// Escribe en el frame más interno.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        if let Some(top) = self.frames.last_mut() {
            top.insert(name.into(), value);
        }
    }

    /// Rebinding explícito: escribe sobre el frame más cercano que ya tenga
    /// el nombre; si ninguno lo tiene, cae al frame interno.
    pub fn rebind(&mut self, name: &str, value: Value) {
        for f in self.frames.iter_mut().rev() {
            if f.contains_key(name) {
                f.insert(name.to_string(), value);
                return;
            }
        }
        self.set(name, value);
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Borra el nombre del frame más interno. Devuelve el valor si existía.
    pub fn delete(&mut self, name: &str) -> Option<Value> {
        self.frames.last_mut().and_then(|f| f.remove(name))
    }

    /// Nombres visibles (unión de frames), ordenados para determinismo.
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.frames
                                         .iter()
                                         .flat_map(|f| f.keys().cloned())
                                         .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Vacía el frame más interno.
    pub fn clear(&mut self) {
        if let Some(top) = self.frames.last_mut() {
            top.clear();
        }
    }

    /// Abre un frame hijo vacío.
    pub fn push_child(&mut self) {
        self.frames.push(HashMap::new());
    }

    /// Cierra el frame interno y lo devuelve. El frame raíz no se cierra.
    pub fn pop(&mut self) -> Option<HashMap<String, Value>> {
        if self.frames.len() > 1 {
            self.frames.pop()
        } else {
            None
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inner_frame_shadows_outer() {
        let mut s = ScopeStack::new();
        s.set("x", json!(1));
        s.push_child();
        s.set("x", json!(2));
        assert_eq!(s.get("x"), Some(&json!(2)));
        s.pop();
        assert_eq!(s.get("x"), Some(&json!(1)));
    }

    #[test]
    fn child_writes_do_not_merge_back() {
        let mut s = ScopeStack::new();
        s.push_child();
        s.set("only_inner", json!(true));
        s.pop();
        assert!(!s.has("only_inner"));
    }

    #[test]
    fn rebind_targets_owning_frame() {
        let mut s = ScopeStack::new();
        s.set("acc", json!(0));
        s.push_child();
        s.rebind("acc", json!(10));
        s.pop();
        assert_eq!(s.get("acc"), Some(&json!(10)));
    }

    #[test]
    fn root_frame_never_pops() {
        let mut s = ScopeStack::new();
        s.set("x", json!(1));
        assert!(s.pop().is_none());
        assert_eq!(s.get("x"), Some(&json!(1)));
    }

    #[test]
    fn snapshot_roundtrip() {
        let mut s = ScopeStack::with_input(json!({"n": 7}));
        s.push_child();
        s.set("item", json!(3));
        let raw = serde_json::to_string(&s).expect("ser");
        let back: ScopeStack = serde_json::from_str(&raw).expect("de");
        assert_eq!(back, s);
    }
}
