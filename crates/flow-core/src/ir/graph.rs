//! Grafo IR congelado: tabla de nodos, aristas, entry point y snapshot del
//! registro de tools.
//!
//! Invariantes (se chequean antes de ejecutar):
//! - Ids únicos; toda arista y todo hijo referencian nodos existentes.
//! - Sin ciclos dirigidos.
//! - Todo nodo tool referencia un id presente en el snapshot del registro.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

use super::node::IrNode;
use crate::errors::FlowError;
use crate::tool::RegistrySnapshot;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IrEdge {
    pub from: String,
    pub to: String,
    /// Etiqueta de condición ("then"/"else"/id de opción) cuando la arista
    /// nace de una rama condicional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IrGraph {
    pub nodes: IndexMap<String, IrNode>,
    pub edges: Vec<IrEdge>,
    pub entry: String,
    pub registry_snapshot: RegistrySnapshot,
}

impl IrGraph {
    pub fn node(&self, id: &str) -> Option<&IrNode> {
        self.nodes.get(id)
    }

    /// Busca un nodo o falla con error de ejecución tipado.
    pub fn require(&self, id: &str) -> Result<&IrNode, FlowError> {
        self.nodes.get(id).ok_or_else(|| FlowError::Execution { node_id: id.to_string(),
                                                                node_kind: "unknown".to_string(),
                                                                message: "node id not present in graph".to_string() })
    }

    /// Adyacencia saliente: aristas explícitas más contención (hijos).
    fn successors(&self, id: &str) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        if let Some(node) = self.nodes.get(id) {
            out.extend(node.child_ids());
        }
        for e in &self.edges {
            if e.from == id {
                out.push(e.to.as_str());
            }
        }
        out
    }

    /// DFS tri-color. Devuelve el primer ciclo encontrado como camino de ids,
    /// o `None` si el grafo es acíclico.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Grey,
            Black,
        }
        let mut color: IndexMap<&str, Color> = self.nodes.keys().map(|k| (k.as_str(), Color::White)).collect();
        let mut stack: Vec<String> = Vec::new();

        fn visit<'a>(g: &'a IrGraph,
                     id: &'a str,
                     color: &mut IndexMap<&'a str, Color>,
                     stack: &mut Vec<String>)
                     -> Option<Vec<String>> {
            match color.get(id).copied() {
                Some(Color::Black) | None => return None,
                Some(Color::Grey) => {
                    // cerró ciclo: recortar el prefijo del stack
                    let start = stack.iter().position(|s| s == id).unwrap_or(0);
                    let mut cycle = stack[start..].to_vec();
                    cycle.push(id.to_string());
                    return Some(cycle);
                }
                Some(Color::White) => {}
            }
            color.insert(id, Color::Grey);
            stack.push(id.to_string());
            for next in g.successors(id) {
                if let Some(c) = visit(g, next, color, stack) {
                    return Some(c);
                }
            }
            stack.pop();
            color.insert(id, Color::Black);
            None
        }

        let ids: Vec<&str> = self.nodes.keys().map(|k| k.as_str()).collect();
        for id in ids {
            if matches!(color.get(id).copied(), Some(Color::White)) {
                if let Some(c) = visit(self, id, &mut color, &mut stack) {
                    return Some(c);
                }
            }
        }
        None
    }

    /// BFS desde el entry point sobre la misma adyacencia que `find_cycle`.
    pub fn reachable_from_entry(&self) -> HashSet<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        if self.nodes.contains_key(&self.entry) {
            seen.insert(self.entry.clone());
            queue.push_back(self.entry.clone());
        }
        while let Some(id) = queue.pop_front() {
            for next in self.successors(&id) {
                if seen.insert(next.to_string()) {
                    queue.push_back(next.to_string());
                }
            }
        }
        seen
    }

    /// Nodos presentes pero inalcanzables desde el entry (en orden de tabla).
    pub fn unreachable_nodes(&self) -> Vec<String> {
        let reachable = self.reachable_from_entry();
        self.nodes.keys().filter(|k| !reachable.contains(*k)).cloned().collect()
    }
}
