//! Errores de persistencia.
//! Mapea errores de IO/serialización a variantes semánticas y decide qué es
//! reintentable antes de traducir al `FlowError::Storage` del core.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("record not found")]
    NotFound,
    #[error("record is corrupt: {0}")]
    Corrupt(String),
    #[error("transient IO error: {0}")]
    TransientIo(String),
    #[error("permanent IO error: {0}")]
    PermanentIo(String),
    #[error("serialization error: {0}")]
    Serde(String),
}

impl PersistenceError {
    /// Sólo el IO transitorio amerita reintento desde el protocolo.
    pub fn retryable(&self) -> bool {
        matches!(self, PersistenceError::TransientIo(_))
    }

    /// Traduce al error de storage del core, con el flag de reintentabilidad.
    pub fn into_flow(self, backend: &str, operation: &str) -> flow_core::errors::FlowError {
        let retryable = self.retryable();
        flow_core::errors::FlowError::Storage { backend: backend.to_string(),
                                                operation: operation.to_string(),
                                                message: self.to_string(),
                                                retryable }
    }
}

impl From<std::io::Error> for PersistenceError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => Self::NotFound,
            ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::WouldBlock => {
                Self::TransientIo(err.to_string())
            }
            _ => Self::PermanentIo(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serde(err.to_string())
    }
}
