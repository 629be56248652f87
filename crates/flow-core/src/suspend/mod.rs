//! Protocolo de suspensión/rehidratación.
//!
//! Rol en el flujo:
//! - Cuando un tool (o el servicio de choice) devuelve la señal de
//!   suspensión, el intérprete captura posición de ejecución + snapshot de
//!   variables, lo serializa en forma canónica dentro de un sobre versionado
//!   y lo persiste a través del puerto `StorageBackend`.
//! - Entre la emisión de la clave y el resume, el estado en memoria del flujo
//!   no cuenta: todo viaja por el registro persistido (el sobre embebe el
//!   grafo IR congelado para que `resume` no dependa de nada más).
//! - Un registro se borra en el resume exitoso o al vencer su TTL; ninguna
//!   clave resume dos veces.

pub mod backend;
pub mod memory;
pub mod record;
mod seal;

pub use backend::{BackendHealth, ListCriteria, StorageBackend};
pub use memory::InMemoryBackend;
pub use record::{CursorFrame, ExecutionPosition, PersistedEnvelope, PersistedState, SuspensionMetadata,
                 SuspensionRecord, VariableSnapshot};

use std::time::Duration;

use crate::constants::{STORE_RETRY_ATTEMPTS, STORE_RETRY_BASE_DELAY_MS};
use crate::errors::FlowError;

/// Ejecuta una operación de backend reintentando fallos marcados como
/// retryables: dos reintentos con backoff exponencial.
pub async fn with_store_retry<T, F, Fut>(mut op: F) -> Result<T, FlowError>
    where F: FnMut() -> Fut,
          Fut: std::future::Future<Output = Result<T, FlowError>>
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < STORE_RETRY_ATTEMPTS => {
                let delay = STORE_RETRY_BASE_DELAY_MS * 2u64.pow(attempt);
                log::warn!("retryable backend failure (attempt {}): {}", attempt + 1, e);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn retryable() -> FlowError {
        FlowError::Storage { backend: "mem".into(),
                             operation: "store".into(),
                             message: "transient".into(),
                             retryable: true }
    }

    #[tokio::test]
    async fn retries_twice_then_succeeds() {
        let calls = AtomicU32::new(0);
        let out = with_store_retry(|| {
                      let n = calls.fetch_add(1, Ordering::SeqCst);
                      async move {
                          if n < 2 {
                              Err(retryable())
                          } else {
                              Ok(42u32)
                          }
                      }
                  }).await;
        assert_eq!(out.expect("ok"), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let out: Result<u32, _> = with_store_retry(|| {
                                      calls.fetch_add(1, Ordering::SeqCst);
                                      async {
                                          Err(FlowError::Storage { backend: "mem".into(),
                                                                   operation: "store".into(),
                                                                   message: "permanent".into(),
                                                                   retryable: false })
                                      }
                                  }).await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
