//! Catálogo de operadores.
//!
//! Rol en el flujo:
//! - Mapea cada tag de kind a su tabla de métodos (`Operator`): validación de
//!   la config recursiva y rebaje a IR. El conjunto de kinds es cerrado, pero
//!   el catálogo permite reemplazar la implementación de un kind (register es
//!   idempotente: re-registrar reemplaza).
//! - `compile` orquesta el rebaje de un workflow completo: valida, rebaja
//!   hijos primero, conecta raíces en secuencia y congela el grafo.

pub mod flatten;
pub mod ops;

pub use flatten::{from_flat, to_flat};

use indexmap::IndexMap;
use std::sync::Arc;

use crate::errors::FlowError;
use crate::ir::{IrBuilder, IrGraph, IrNode, IrNodeKind};
use crate::model::{Step, Workflow};
use crate::tool::ToolRegistry;

/// Tabla de métodos de un kind de operador.
pub trait Operator: Send + Sync {
    /// Tag del kind que atiende (igual al valor serializado).
    fn kind(&self) -> &'static str;

    /// Validación de la config recursiva del step (sin tocar hijos de otros
    /// kinds: el catálogo recorre el árbol completo).
    fn validate(&self, step: &Step) -> Result<(), FlowError>;

    /// Rebaja el step a IR. Los hijos se rebajan primero (vía el catálogo) y
    /// el nodo padre los referencia por id. Devuelve el id del nodo padre.
    fn lower(&self, step: &Step, b: &mut IrBuilder, catalog: &OperatorCatalog) -> Result<String, FlowError>;
}

/// Mapa tag→operador, inyectado (nunca singleton).
pub struct OperatorCatalog {
    ops: IndexMap<String, Arc<dyn Operator>>,
}

impl OperatorCatalog {
    /// Catálogo vacío (para tests que registran a mano).
    pub fn empty() -> Self {
        Self { ops: IndexMap::new() }
    }

    /// Catálogo con los ocho kinds estándar.
    pub fn standard() -> Self {
        let mut c = Self::empty();
        c.register(Arc::new(ops::ToolOp));
        c.register(Arc::new(ops::FilterOp));
        c.register(Arc::new(ops::ConditionalOp));
        c.register(Arc::new(ops::LoopOp));
        c.register(Arc::new(ops::MapOp));
        c.register(Arc::new(ops::ReduceOp));
        c.register(Arc::new(ops::ParallelOp));
        c.register(Arc::new(ops::SwitchOp));
        c
    }

    /// Registra un operador bajo su kind. Re-registrar reemplaza.
    pub fn register(&mut self, op: Arc<dyn Operator>) {
        self.ops.insert(op.kind().to_string(), op);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Operator>> {
        self.ops.get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.ops.keys().map(|k| k.as_str()).collect()
    }

    fn require(&self, kind: &str) -> Result<Arc<dyn Operator>, FlowError> {
        self.get(kind).ok_or_else(|| FlowError::Compilation { node_id: None,
                                                              message: format!("unknown operator kind '{kind}'") })
    }

    /// Valida recursivamente un step y todos sus descendientes.
    pub fn validate_step(&self, step: &Step) -> Result<(), FlowError> {
        self.require(step.kind_name())?.validate(step)?;
        for child in child_steps(step) {
            self.validate_step(child)?;
        }
        Ok(())
    }

    /// Rebaja un step delegando en el operador de su kind.
    pub fn lower_step(&self, step: &Step, b: &mut IrBuilder) -> Result<String, FlowError> {
        self.require(step.kind_name())?.lower(step, b, self)
    }

    /// Rebaja una lista ordenada de steps, conectando consecutivos con
    /// aristas de secuencia. Devuelve los ids en orden.
    pub fn lower_list(&self, steps: &[Step], b: &mut IrBuilder) -> Result<Vec<String>, FlowError> {
        let mut ids = Vec::with_capacity(steps.len());
        for step in steps {
            ids.push(self.lower_step(step, b)?);
        }
        for pair in ids.windows(2) {
            b.add_edge(pair[0].clone(), pair[1].clone(), None);
        }
        Ok(ids)
    }

    /// Compila un workflow recursivo a un grafo IR congelado.
    ///
    /// Con registro presente, el rebaje valida la existencia de cada
    /// `toolId` ("tool not found" es fatal en esta fase).
    pub fn compile(&self, workflow: &Workflow, registry: Option<Arc<ToolRegistry>>) -> Result<IrGraph, FlowError> {
        if workflow.steps.is_empty() {
            return Err(FlowError::Validation { path: "steps".to_string(),
                                               message: "workflow has no steps".to_string() });
        }
        for step in &workflow.steps {
            self.validate_step(step)?;
        }

        let snapshot = registry.as_ref().map(|r| r.snapshot()).unwrap_or_default();
        let mut b = match registry {
            Some(r) => IrBuilder::with_registry(r),
            None => IrBuilder::new(),
        };

        let root_ids = self.lower_list(&workflow.steps, &mut b)?;
        let entry = if root_ids.len() == 1 {
            root_ids[0].clone()
        } else {
            // raíz sintética que secuencia los steps de nivel superior
            let root = IrNode::new("__root", IrNodeKind::Sequence { children: root_ids.clone() });
            b.add_node(root)?;
            "__root".to_string()
        };
        b.finish(entry, snapshot)
    }
}

impl Default for OperatorCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

/// Hijos directos de un step recursivo, en orden de declaración.
fn child_steps(step: &Step) -> Vec<&Step> {
    match step {
        Step::Tool { .. } => vec![],
        Step::Filter { with, .. } => with.iter().map(|b| b.as_ref()).collect(),
        Step::Conditional { then_steps, else_steps, .. } => {
            let mut out: Vec<&Step> = then_steps.iter().collect();
            if let Some(e) = else_steps {
                out.extend(e.iter());
            }
            out
        }
        Step::Loop { body, .. } => body.iter().collect(),
        Step::Map { with, .. } | Step::Reduce { with, .. } => vec![with.as_ref()],
        Step::Parallel { branches, parallel, .. } => {
            let mut out: Vec<&Step> = Vec::new();
            if let Some(groups) = branches {
                out.extend(groups.iter().flatten());
            }
            if let Some(list) = parallel {
                out.extend(list.iter());
            }
            out
        }
        Step::Switch { branches, .. } => branches.values().flatten().collect(),
    }
}
