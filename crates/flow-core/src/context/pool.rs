//! Worker pool acotado sobre `tokio::sync::Semaphore`.
//!
//! Contrato:
//! - `submit` espera cooperativamente un permiso cuando `active >= max`,
//!   corre la tarea y libera el permiso al terminar (éxito o fallo).
//! - `submit_many` lanza todas las tareas a la vez; cada una pasa por
//!   `submit`, así el tope global se respeta igual.
//! - `set_max_workers` redimensiona en caliente: crecer agrega permisos,
//!   achicar acumula deuda que se descuenta a medida que se liberan.

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::constants::{DEFAULT_MAX_WORKERS, MIN_WORKERS};

/// Future boxeado que aceptan `submit_many` y los spawns del pool.
pub type PoolTask<T> = Pin<Box<dyn std::future::Future<Output = T> + Send>>;

/// Foto del estado del pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub available: usize,
    pub total: usize,
    pub queued: usize,
}

#[derive(Debug)]
pub struct WorkerPool {
    sem: Arc<Semaphore>,
    max: AtomicUsize,
    /// Permisos a retirar de circulación tras un achique.
    debt: AtomicUsize,
    queued: AtomicUsize,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        let max = max_workers.max(MIN_WORKERS);
        Self { sem: Arc::new(Semaphore::new(max)),
               max: AtomicUsize::new(max),
               debt: AtomicUsize::new(0),
               queued: AtomicUsize::new(0) }
    }

    /// Redimensiona el tope, con piso `MIN_WORKERS`.
    pub fn set_max_workers(&self, n: usize) {
        let n = n.max(MIN_WORKERS);
        let old = self.max.swap(n, Ordering::SeqCst);
        if n > old {
            self.sem.add_permits(n - old);
        } else if old > n {
            self.debt.fetch_add(old - n, Ordering::SeqCst);
        }
    }

    /// Corre `task` bajo un permiso del pool.
    pub async fn submit<F, T>(&self, task: F) -> T
        where F: std::future::Future<Output = T>
    {
        self.queued.fetch_add(1, Ordering::SeqCst);
        // El semáforo sólo se cierra al dropear el pool; tratamos el error de
        // cierre como permiso inmediato para no colgar a los llamadores.
        let permit = self.sem.clone().acquire_owned().await.ok();
        self.queued.fetch_sub(1, Ordering::SeqCst);

        let result = task.await;

        if let Some(p) = permit {
            // Un achique pendiente consume el permiso en vez de devolverlo.
            let mut debt = self.debt.load(Ordering::SeqCst);
            loop {
                if debt == 0 {
                    drop(p);
                    break;
                }
                match self.debt
                          .compare_exchange(debt, debt - 1, Ordering::SeqCst, Ordering::SeqCst)
                {
                    Ok(_) => {
                        p.forget();
                        break;
                    }
                    Err(actual) => debt = actual,
                }
            }
        }
        result
    }

    /// Lanza todas las tareas concurrentemente (cada una pasa por `submit`)
    /// y devuelve los resultados en el orden de entrada.
    pub async fn submit_many<T: Send + 'static>(self: &Arc<Self>, tasks: Vec<PoolTask<T>>) -> Vec<Option<T>> {
        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let pool = Arc::clone(self);
            handles.push(tokio::spawn(async move { pool.submit(task).await }));
        }
        let mut out = Vec::with_capacity(handles.len());
        for h in handles {
            out.push(h.await.ok());
        }
        out
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats { available: self.sem.available_permits(),
                    total: self.max.load(Ordering::SeqCst),
                    queued: self.queued.load(Ordering::SeqCst) }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WORKERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn submit_releases_slot_on_completion() {
        let pool = Arc::new(WorkerPool::new(2));
        let before = pool.stats().available;
        pool.submit(async { 1 + 1 }).await;
        assert_eq!(pool.stats().available, before);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let pool = Arc::new(WorkerPool::new(2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks: Vec<PoolTask<()>> = Vec::new();
        for _ in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            tasks.push(Box::pin(async move {
                           let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                           peak.fetch_max(now, Ordering::SeqCst);
                           tokio::time::sleep(Duration::from_millis(10)).await;
                           running.fetch_sub(1, Ordering::SeqCst);
                       }));
        }
        pool.submit_many(tasks).await;
        assert!(peak.load(Ordering::SeqCst) <= 2, "peak={}", peak.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn shrink_has_floor_of_one() {
        let pool = WorkerPool::new(4);
        pool.set_max_workers(0);
        assert_eq!(pool.stats().total, 1);
    }
}
