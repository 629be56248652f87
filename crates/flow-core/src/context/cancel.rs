//! Flag de cancelación cooperativa.
//!
//! El intérprete consulta el flag en cada punto de suspensión (invocación de
//! tool, submit al pool, pausa, llamada a backend, join paralelo). Los flags
//! forman una cadena: cancelar al padre cancela a todos los hijos, y cada
//! nodo paralelo abre un hijo para poder cancelar ramas hermanas sin tocar
//! el resto del flujo.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::errors::FlowError;

#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<CancelFlag>>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Crea un flag hijo: se cancela solo o cuando se cancele este.
    pub fn child(&self) -> CancelFlag {
        CancelFlag { flag: Arc::new(AtomicBool::new(false)),
                     parent: Some(Arc::new(self.clone())) }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        match &self.parent {
            Some(p) => p.is_cancelled(),
            None => false,
        }
    }

    /// Error tipado si el flag (o un ancestro) ya fue cancelado.
    pub fn ensure_active(&self, node_id: &str, node_kind: &str) -> Result<(), FlowError> {
        if self.is_cancelled() {
            return Err(FlowError::Execution { node_id: node_id.to_string(),
                                              node_kind: node_kind.to_string(),
                                              message: "execution cancelled".to_string() });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_cancellation_reaches_children() {
        let root = CancelFlag::new();
        let child = root.child();
        assert!(!child.is_cancelled());
        root.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn child_cancellation_stays_local() {
        let root = CancelFlag::new();
        let child = root.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!root.is_cancelled());
    }
}
