//! Gate de pausa/resume en memoria.
//!
//! Un step puede pausar la ejecución esperando un valor externo sin pasar por
//! el backend (pausa viva, a diferencia de la suspensión persistida). A lo
//! sumo una pausa activa por contexto de ejecución; `cancel_pause` resuelve
//! al que espera con el centinela `Value::Null`.

use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

use crate::errors::FlowError;

#[derive(Debug)]
struct Pending {
    prompt: String,
    tx: oneshot::Sender<Value>,
}

/// Compartido entre quien pausa y quien resume (clonable).
#[derive(Debug, Clone, Default)]
pub struct PauseGate {
    slot: Arc<Mutex<Option<Pending>>>,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspende al llamador hasta que alguien entregue un valor con `resume`.
    pub async fn pause(&self, prompt: impl Into<String>) -> Result<Value, FlowError> {
        let prompt = prompt.into();
        let rx = {
            let mut slot = self.slot.lock().expect("pause slot poisoned");
            if slot.is_some() {
                return Err(FlowError::Execution { node_id: "pause".to_string(),
                                                  node_kind: "pause".to_string(),
                                                  message: "a pause is already active for this execution".to_string() });
            }
            let (tx, rx) = oneshot::channel();
            *slot = Some(Pending { prompt, tx });
            rx
        };
        // Un sender dropeado equivale a cancelación: entregamos el centinela.
        Ok(rx.await.unwrap_or(Value::Null))
    }

    /// Entrega el valor a la pausa activa y la limpia.
    pub fn resume(&self, value: Value) -> Result<(), FlowError> {
        let pending = self.slot.lock().expect("pause slot poisoned").take();
        match pending {
            Some(p) => {
                let _ = p.tx.send(value);
                Ok(())
            }
            None => Err(FlowError::Execution { node_id: "pause".to_string(),
                                               node_kind: "pause".to_string(),
                                               message: "no pause is active".to_string() }),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.slot.lock().expect("pause slot poisoned").is_some()
    }

    pub fn pause_prompt(&self) -> Option<String> {
        self.slot
            .lock()
            .expect("pause slot poisoned")
            .as_ref()
            .map(|p| p.prompt.clone())
    }

    /// Cancela la pausa activa resolviendo al que espera con `Value::Null`.
    pub fn cancel_pause(&self) {
        if let Some(p) = self.slot.lock().expect("pause slot poisoned").take() {
            let _ = p.tx.send(Value::Null);
        }
    }
}
