//! Errores semánticos del motor.
//!
//! Una única taxonomía etiquetada: cada fallo del core es una variante de
//! `FlowError` con su categoría fija. No existe un segundo camino estructural
//! de discriminación; quien necesite ramificar sobre un error usa la variante
//! o su `report()` plano.
//!
//! Política de propagación:
//! - `Validation` y `Compilation` se levantan síncronamente antes de ejecutar;
//!   nunca se devuelve IR parcial.
//! - `Tool` y `Execution` suben hasta el recovery wrapper más cercano; sin
//!   wrapper, terminan el flujo.
//! - `Storage` en el momento de suspender aborta la suspensión y se reporta
//!   como `Persistence`: una suspensión parcial jamás es observable.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    /// Workflow estructuralmente inválido. `path` apunta al step/atributo.
    #[error("validation failed at {path}: {message}")]
    Validation { path: String, message: String },

    /// Clave de configuración ausente o con valor inválido.
    #[error("configuration key '{key}': {message}")]
    Configuration { key: String, message: String },

    /// Tool ausente, mal registrado o fallido durante su ejecución.
    #[error("tool '{tool_id}': {message}")]
    Tool {
        tool_id: String,
        message: String,
        #[source]
        cause: Option<Box<FlowError>>,
    },

    /// Fallo de interpretación del IR (variable ausente, colección no-array,
    /// tipo de nodo desconocido, señal inválida).
    #[error("execution error at node '{node_id}' ({node_kind}): {message}")]
    Execution {
        node_id: String,
        node_kind: String,
        message: String,
    },

    /// Entrada estructurada imposible de parsear. Se conserva un fragmento
    /// truncado para diagnóstico.
    #[error("parse error: {message}")]
    Parse { message: String, snippet: Option<String> },

    /// Operación que excedió su límite de tiempo.
    #[error("operation '{operation}' timed out after {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    /// Fallo del backend de almacenamiento, con flag de reintentabilidad.
    #[error("storage backend '{backend}' failed during {operation}: {message}")]
    Storage {
        backend: String,
        operation: String,
        message: String,
        retryable: bool,
    },

    /// Fallo del protocolo suspend/resume por encima del backend.
    #[error("persistence failure for suspension key '{key}': {message}")]
    Persistence { key: String, message: String },

    /// Fallo al construir el IR (kind desconocido, referencia colgante). El
    /// nodo involucrado, si se conoce, viaja en `node_id` y en `report()`.
    #[error("compilation failed: {message}")]
    Compilation { node_id: Option<String>, message: String },

    /// La propia estrategia de recuperación falló.
    #[error("recovery strategy '{strategy}' failed: {message}")]
    Recovery { strategy: String, message: String },
}

/// Forma plana y serializable de cualquier error del core. Es el contrato
/// visible para consumidores (eventos, logs, respuestas).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub category: String,
    pub message: String,
    /// Nodo/tool/clave donde ocurrió, si aplica.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl FlowError {
    /// Categoría estable del error (minúsculas, sin espacios).
    pub fn category(&self) -> &'static str {
        match self {
            FlowError::Validation { .. } => "validation",
            FlowError::Configuration { .. } => "configuration",
            FlowError::Tool { .. } => "tool",
            FlowError::Execution { .. } => "execution",
            FlowError::Parse { .. } => "parse",
            FlowError::Timeout { .. } => "timeout",
            FlowError::Storage { .. } => "storage",
            FlowError::Persistence { .. } => "persistence",
            FlowError::Compilation { .. } => "compilation",
            FlowError::Recovery { .. } => "recovery",
        }
    }

    /// Ubicación (nodo/tool/clave) si la variante la conoce.
    pub fn location(&self) -> Option<String> {
        match self {
            FlowError::Validation { path, .. } => Some(path.clone()),
            FlowError::Tool { tool_id, .. } => Some(tool_id.clone()),
            FlowError::Execution { node_id, .. } => Some(node_id.clone()),
            FlowError::Timeout { operation, .. } => Some(operation.clone()),
            FlowError::Storage { backend, .. } => Some(backend.clone()),
            FlowError::Persistence { key, .. } => Some(key.clone()),
            FlowError::Compilation { node_id, .. } => node_id.clone(),
            _ => None,
        }
    }

    /// Un error es reintentable sólo cuando el backend lo marcó como tal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FlowError::Storage { retryable: true, .. })
    }

    /// Proyección plana para consumidores externos.
    pub fn report(&self) -> ErrorReport {
        let cause = match self {
            FlowError::Tool { cause: Some(c), .. } => Some(c.to_string()),
            _ => None,
        };
        let retryable = match self {
            FlowError::Storage { retryable, .. } => Some(*retryable),
            _ => None,
        };
        ErrorReport { category: self.category().to_string(),
                      message: self.to_string(),
                      location: self.location(),
                      cause,
                      retryable }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_carries_category_and_location() {
        let e = FlowError::Execution { node_id: "n1".into(),
                                       node_kind: "loop".into(),
                                       message: "collection is not an array".into() };
        let r = e.report();
        assert_eq!(r.category, "execution");
        assert_eq!(r.location.as_deref(), Some("n1"));
        assert_eq!(r.retryable, None);
    }

    #[test]
    fn storage_retryable_flag_survives() {
        let e = FlowError::Storage { backend: "fs".into(),
                                     operation: "store".into(),
                                     message: "disk full".into(),
                                     retryable: true };
        assert!(e.is_retryable());
        assert_eq!(e.report().retryable, Some(true));
    }
}
