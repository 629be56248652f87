//! Contexto de ejecución entregado al intérprete y a los tools.
//!
//! Rol en el flujo:
//! - `ScopeStack` resuelve variables; `WorkerPool` acota concurrencia;
//!   `FlowControl` transporta break/continue; `PauseGate` coordina pausas
//!   vivas; `CancelFlag` corta cooperativamente.
//! - El contexto es clonable: cada rama paralela ejecuta sobre un clon con
//!   frame hijo propio, que no se fusiona de vuelta al padre.

pub mod cancel;
pub mod control;
pub mod pause;
pub mod pool;
pub mod scope;

pub use cancel::CancelFlag;
pub use control::FlowControl;
pub use pause::PauseGate;
pub use pool::{PoolStats, PoolTask, WorkerPool};
pub use scope::ScopeStack;

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Estado por ejecución que ven tools e intérprete.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub flow_id: Uuid,
    /// Nodo en curso (se actualiza al despachar cada nodo).
    pub step_id: Option<String>,
    pub session_id: Option<String>,
    pub variables: ScopeStack,
    pub metadata: HashMap<String, Value>,
    pub pool: Arc<WorkerPool>,
    pub control: FlowControl,
    pub pause: PauseGate,
    pub cancel: CancelFlag,
}

impl ExecutionContext {
    pub fn new(flow_id: Uuid, max_workers: usize) -> Self {
        Self { flow_id,
               step_id: None,
               session_id: None,
               variables: ScopeStack::new(),
               metadata: HashMap::new(),
               pool: Arc::new(WorkerPool::new(max_workers)),
               control: FlowControl::new(),
               pause: PauseGate::new(),
               cancel: CancelFlag::new() }
    }

    /// Clon para una rama paralela: frame hijo propio, marca de contexto
    /// paralelo y flag de cancelación hijo del dado.
    pub fn branch_child(&self, branch_cancel: &CancelFlag) -> Self {
        let mut child = self.clone();
        child.variables.push_child();
        child.control = self.control.for_parallel_branch();
        child.cancel = branch_cancel.clone();
        child
    }
}
