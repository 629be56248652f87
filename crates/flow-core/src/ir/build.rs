//! Constructor incremental del grafo IR.
//!
//! El catálogo rebaja hijos primero: cada operador escribe los nodos de sus
//! hijos vía `add_node` y devuelve el nodo padre referenciándolos por id.
//! `finish` congela el grafo con su entry point y el snapshot del registro.

use indexmap::IndexMap;
use std::sync::Arc;

use super::graph::{IrEdge, IrGraph};
use super::node::IrNode;
use crate::errors::FlowError;
use crate::tool::{RegistrySnapshot, ToolRegistry};

pub struct IrBuilder {
    nodes: IndexMap<String, IrNode>,
    edges: Vec<IrEdge>,
    registry: Option<Arc<ToolRegistry>>,
    /// Si está activo, un nodo tool cuyo `tool_id` no exista en el registro
    /// hace fallar el rebaje.
    pub validate_connections: bool,
}

impl IrBuilder {
    pub fn new() -> Self {
        Self { nodes: IndexMap::new(),
               edges: Vec::new(),
               registry: None,
               validate_connections: false }
    }

    /// Variante que valida la existencia de tools contra un registro vivo.
    pub fn with_registry(registry: Arc<ToolRegistry>) -> Self {
        Self { nodes: IndexMap::new(),
               edges: Vec::new(),
               registry: Some(registry),
               validate_connections: true }
    }

    /// El registro inyectado, si hay.
    pub fn registry(&self) -> Option<&Arc<ToolRegistry>> {
        self.registry.as_ref()
    }

    /// Inserta un nodo. Un id duplicado es un error de compilación: el grafo
    /// es estrictamente direccionado por id.
    pub fn add_node(&mut self, node: IrNode) -> Result<(), FlowError> {
        let id = node.id.clone();
        if self.nodes.contains_key(&id) {
            return Err(FlowError::Compilation { node_id: Some(id),
                                                message: "duplicate node id in IR graph".to_string() });
        }
        self.nodes.insert(id, node);
        Ok(())
    }

    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>, condition: Option<String>) {
        self.edges.push(IrEdge { from: from.into(),
                                 to: to.into(),
                                 condition });
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Congela el grafo. Verifica que el entry y todo endpoint de arista o
    /// hijo existan; cualquier referencia colgante es `Compilation`.
    pub fn finish(self, entry: impl Into<String>, snapshot: RegistrySnapshot) -> Result<IrGraph, FlowError> {
        let entry = entry.into();
        if !self.nodes.contains_key(&entry) {
            return Err(FlowError::Compilation { node_id: Some(entry),
                                                message: "entry point not present in graph".to_string() });
        }
        for e in &self.edges {
            for endpoint in [&e.from, &e.to] {
                if !self.nodes.contains_key(endpoint) {
                    return Err(FlowError::Compilation { node_id: Some(endpoint.clone()),
                                                        message: "edge endpoint not present in graph".to_string() });
                }
            }
        }
        let dangling: Option<(String, String)> =
            self.nodes
                .values()
                .find_map(|n| {
                    n.child_ids()
                     .into_iter()
                     .find(|c| !self.nodes.contains_key(*c))
                     .map(|c| (n.id.clone(), c.to_string()))
                });
        if let Some((parent, child)) = dangling {
            return Err(FlowError::Compilation { node_id: Some(parent),
                                                message: format!("child step '{child}' not present in graph") });
        }
        Ok(IrGraph { nodes: self.nodes,
                     edges: self.edges,
                     entry,
                     registry_snapshot: snapshot })
    }
}

impl Default for IrBuilder {
    fn default() -> Self {
        Self::new()
    }
}
