//! Servicio de decisión para `switch`.
//!
//! El despacho de un switch no vive en el core: el intérprete entrega el
//! prompt discriminador y los descriptores de opción a un servicio enchufable
//! que devuelve el id elegido, o suspende (p. ej. cuando la decisión requiere
//! input humano). Garantías de determinismo o conteo de llamadas quedan del
//! lado del sistema anfitrión.

use async_trait::async_trait;

use super::SuspendSignal;
use crate::errors::FlowError;
use crate::model::SwitchOption;

/// Resultado de una consulta de decisión.
#[derive(Debug, Clone, PartialEq)]
pub enum ChoiceOutcome {
    /// Id de la opción elegida.
    Selected(String),
    /// La decisión queda pendiente de input externo.
    Suspend(SuspendSignal),
}

#[async_trait]
pub trait ChoiceService: Send + Sync {
    async fn choose(&self, prompt: &str, options: &[SwitchOption]) -> Result<ChoiceOutcome, FlowError>;
}
