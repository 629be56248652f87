//! Señales de control de flujo (`break`/`continue`).
//!
//! Las señales son booleanos consumidos por el loop que encierra al emisor.
//! Dentro de un contexto paralelo están prohibidas: cada rama corre en su
//! propio scope y no hay un loop "compartido" al que señalizar.
//!
//! Interior mutability: los tools reciben `&ExecutionContext` y aun así deben
//! poder señalizar; el estado vive tras un mutex. Un clon para rama paralela
//! NO comparte señales (obtiene estado fresco con profundidad paralela +1).

use std::sync::{Arc, Mutex};

use crate::errors::FlowError;

#[derive(Debug, Default)]
struct CtrlState {
    break_signal: bool,
    continue_signal: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FlowControl {
    state: Arc<Mutex<CtrlState>>,
    /// Profundidad de contextos paralelos activos (>0 ⇒ estamos en una rama).
    parallel_depth: u32,
}

impl FlowControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Estado fresco para una rama paralela: sin señales heredadas y con la
    /// marca de contexto paralelo incrementada.
    pub fn for_parallel_branch(&self) -> Self {
        Self { state: Arc::new(Mutex::new(CtrlState::default())),
               parallel_depth: self.parallel_depth + 1 }
    }

    fn reject_in_parallel(&self, node_id: &str, signal: &str) -> Result<(), FlowError> {
        if self.parallel_depth > 0 {
            return Err(FlowError::Execution { node_id: node_id.to_string(),
                                              node_kind: "parallel".to_string(),
                                              message: format!("'{signal}' is not allowed inside a parallel branch") });
        }
        Ok(())
    }

    pub fn signal_break(&self, node_id: &str) -> Result<(), FlowError> {
        self.reject_in_parallel(node_id, "break")?;
        self.state.lock().expect("flow control poisoned").break_signal = true;
        Ok(())
    }

    pub fn signal_continue(&self, node_id: &str) -> Result<(), FlowError> {
        self.reject_in_parallel(node_id, "continue")?;
        self.state.lock().expect("flow control poisoned").continue_signal = true;
        Ok(())
    }

    /// Consume la señal de break (la limpia al leerla).
    pub fn take_break(&self) -> bool {
        std::mem::take(&mut self.state.lock().expect("flow control poisoned").break_signal)
    }

    /// Consume la señal de continue.
    pub fn take_continue(&self) -> bool {
        std::mem::take(&mut self.state.lock().expect("flow control poisoned").continue_signal)
    }

    /// ¿Hay alguna señal pendiente? (sin consumirla)
    pub fn pending(&self) -> bool {
        let s = self.state.lock().expect("flow control poisoned");
        s.break_signal || s.continue_signal
    }

    pub fn in_parallel(&self) -> bool {
        self.parallel_depth > 0
    }
}
