//! Configuración central del motor.
//!
//! Carga variables de entorno (.env) una sola vez y expone una estructura
//! inmutable por secciones (worker pool, loops, suspensión, intérprete,
//! recovery). Toda opción tiene default razonable; el entorno sólo overridea.
//!
//! Variables reconocidas:
//! - `DYNAFLOW_MAX_WORKERS` (int, default 4, piso 1)
//! - `DYNAFLOW_MAX_ITERATIONS` (int, default 1000)
//! - `DYNAFLOW_SUSPENSION_TTL_SECS` (int, 0 = sin expiración)
//! - `DYNAFLOW_TRACE` (bool)
//! - `DYNAFLOW_RECOVERY_MAX_RETRIES`, `DYNAFLOW_RECOVERY_DELAY_MS`,
//!   `DYNAFLOW_RECOVERY_BACKOFF`, `DYNAFLOW_CB_THRESHOLD`, `DYNAFLOW_CB_TIMEOUT_MS`

use once_cell::sync::Lazy;
use std::env;

use crate::constants::{DEFAULT_MAX_ITERATIONS, DEFAULT_MAX_WORKERS, MIN_WORKERS};

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenvy::dotenv(); // ignora error si no existe .env
});

/// Configuración del `WorkerPool`.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerPoolConfig {
    pub max_workers: usize,
}

/// Límites de loops del intérprete.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    pub max_iterations: u64,
}

/// Parámetros del protocolo de suspensión.
#[derive(Debug, Clone, PartialEq)]
pub struct SuspensionConfig {
    /// TTL por defecto en segundos para registros suspendidos. 0 desactiva la
    /// expiración.
    pub default_ttl_secs: u64,
}

/// Opciones del intérprete.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpreterConfig {
    /// Eleva la verbosidad de logging por nodo.
    pub trace: bool,
}

/// Defaults por estrategia del módulo de recovery.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout_ms: u64,
}

/// Configuración completa del motor (extensible por secciones).
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub worker_pool: WorkerPoolConfig,
    pub loops: LoopConfig,
    pub suspension: SuspensionConfig,
    pub interpreter: InterpreterConfig,
    pub recovery: RecoveryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { worker_pool: WorkerPoolConfig { max_workers: DEFAULT_MAX_WORKERS },
               loops: LoopConfig { max_iterations: DEFAULT_MAX_ITERATIONS },
               suspension: SuspensionConfig { default_ttl_secs: 0 },
               interpreter: InterpreterConfig { trace: false },
               recovery: RecoveryConfig { max_retries: 3,
                                          retry_delay_ms: 100,
                                          backoff_multiplier: 2.0,
                                          circuit_breaker_threshold: 5,
                                          circuit_breaker_timeout_ms: 30_000 } }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key).ok()
                 .map(|v| matches!(v.as_str(), "1" | "true" | "yes" | "on"))
                 .unwrap_or(default)
}

impl EngineConfig {
    /// Construye la configuración leyendo el entorno (cargando `.env` si
    /// existe). Valores ausentes o mal formados caen al default.
    pub fn from_env() -> Self {
        Lazy::force(&DOTENV_LOADED);
        let d = EngineConfig::default();
        let max_workers: usize = env_parse("DYNAFLOW_MAX_WORKERS", d.worker_pool.max_workers);
        Self { worker_pool: WorkerPoolConfig { max_workers: max_workers.max(MIN_WORKERS) },
               loops: LoopConfig { max_iterations: env_parse("DYNAFLOW_MAX_ITERATIONS", d.loops.max_iterations) },
               suspension: SuspensionConfig { default_ttl_secs: env_parse("DYNAFLOW_SUSPENSION_TTL_SECS",
                                                                          d.suspension.default_ttl_secs) },
               interpreter: InterpreterConfig { trace: env_bool("DYNAFLOW_TRACE", d.interpreter.trace) },
               recovery: RecoveryConfig { max_retries: env_parse("DYNAFLOW_RECOVERY_MAX_RETRIES", d.recovery.max_retries),
                                          retry_delay_ms: env_parse("DYNAFLOW_RECOVERY_DELAY_MS", d.recovery.retry_delay_ms),
                                          backoff_multiplier: env_parse("DYNAFLOW_RECOVERY_BACKOFF",
                                                                        d.recovery.backoff_multiplier),
                                          circuit_breaker_threshold: env_parse("DYNAFLOW_CB_THRESHOLD",
                                                                               d.recovery.circuit_breaker_threshold),
                                          circuit_breaker_timeout_ms: env_parse("DYNAFLOW_CB_TIMEOUT_MS",
                                                                                d.recovery.circuit_breaker_timeout_ms) } }
    }
}

/// Instancia global perezosa, evaluada una sola vez.
pub static CONFIG: Lazy<EngineConfig> = Lazy::new(EngineConfig::from_env);

/// Forzar carga temprana de .env desde aplicaciones externas si se desea.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}
