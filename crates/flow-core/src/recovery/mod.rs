//! Estrategias de recuperación de errores.
//!
//! Un wrapper alrededor de cualquier operación async. Estrategias:
//! - `retry`: backoff exponencial `retry_delay * multiplier^intento`, tope
//!   `max_retries`.
//! - `fallback`: ante cualquier fallo devuelve `fallback_value`.
//! - `circuit-breaker`: cerrado→abierto tras N fallos consecutivos; abierto
//!   bloquea llamadas durante `timeout`; luego media-apertura de prueba
//!   (éxito cierra, fallo reabre).
//! - `skip`: ante fallo devuelve el valor ausente (`null`) y sigue.
//! - `compensate`: ante fallo corre las compensaciones registradas (en orden
//!   inverso de registro) y recién entonces propaga.
//! - `escalate`: ante fallo notifica al handler de escalación y propaga.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::RecoveryConfig;
use crate::errors::FlowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryStrategy {
    Retry,
    Fallback,
    CircuitBreaker,
    Skip,
    Compensate,
    Escalate,
}

impl RecoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStrategy::Retry => "retry",
            RecoveryStrategy::Fallback => "fallback",
            RecoveryStrategy::CircuitBreaker => "circuit-breaker",
            RecoveryStrategy::Skip => "skip",
            RecoveryStrategy::Compensate => "compensate",
            RecoveryStrategy::Escalate => "escalate",
        }
    }
}

/// Parámetros de una política de recuperación.
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    pub strategy: RecoveryStrategy,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub backoff_multiplier: f64,
    pub fallback_value: Option<Value>,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout: Duration,
}

impl RecoveryPolicy {
    pub fn new(strategy: RecoveryStrategy) -> Self {
        Self::with_defaults(strategy, &crate::config::EngineConfig::default().recovery)
    }

    pub fn with_defaults(strategy: RecoveryStrategy, defaults: &RecoveryConfig) -> Self {
        Self { strategy,
               max_retries: defaults.max_retries,
               retry_delay: Duration::from_millis(defaults.retry_delay_ms),
               backoff_multiplier: defaults.backoff_multiplier,
               fallback_value: None,
               circuit_breaker_threshold: defaults.circuit_breaker_threshold,
               circuit_breaker_timeout: Duration::from_millis(defaults.circuit_breaker_timeout_ms) }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis((self.retry_delay.as_millis() as f64 * factor) as u64)
    }
}

/// Acción de compensación registrada por una operación completada.
#[async_trait]
pub trait CompensationAction: Send + Sync {
    fn label(&self) -> &str;
    async fn compensate(&self) -> Result<(), FlowError>;
}

/// Log de compensaciones; se corren en orden inverso de registro.
#[derive(Default)]
pub struct CompensationLog {
    actions: Mutex<Vec<Arc<dyn CompensationAction>>>,
}

impl CompensationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, action: Arc<dyn CompensationAction>) {
        self.actions.lock().expect("compensation log poisoned").push(action);
    }

    pub fn len(&self) -> usize {
        self.actions.lock().expect("compensation log poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Corre todas las compensaciones registradas, de la última a la primera.
    /// Un fallo de compensación se reporta como `Recovery` pero no detiene a
    /// las restantes.
    pub async fn run_all(&self) -> Result<(), FlowError> {
        let actions: Vec<Arc<dyn CompensationAction>> = {
            let mut guard = self.actions.lock().expect("compensation log poisoned");
            guard.drain(..).collect()
        };
        let mut first_failure: Option<String> = None;
        for action in actions.into_iter().rev() {
            if let Err(e) = action.compensate().await {
                log::warn!("compensation '{}' failed: {e}", action.label());
                first_failure.get_or_insert_with(|| format!("compensation '{}' failed: {e}", action.label()));
            }
        }
        match first_failure {
            Some(message) => Err(FlowError::Recovery { strategy: "compensate".to_string(),
                                                       message }),
            None => Ok(()),
        }
    }
}

/// Handler de escalación para la estrategia `escalate`.
#[async_trait]
pub trait EscalationHandler: Send + Sync {
    async fn escalate(&self, error: &FlowError) -> Result<(), FlowError>;
}

/// Estado del circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CbState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker compartible entre operaciones que protegen el mismo
/// recurso.
pub struct CircuitBreaker {
    threshold: u32,
    timeout: Duration,
    state: Mutex<CbInner>,
}

struct CbInner {
    state: CbState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, timeout: Duration) -> Self {
        Self { threshold: threshold.max(1),
               timeout,
               state: Mutex::new(CbInner { state: CbState::Closed,
                                           consecutive_failures: 0,
                                           opened_at: None }) }
    }

    /// ¿Deja pasar una llamada ahora? Abierto y vencido el timeout pasa a
    /// media apertura (una llamada de prueba).
    fn try_acquire(&self) -> Result<(), FlowError> {
        let mut inner = self.state.lock().expect("breaker poisoned");
        match inner.state {
            CbState::Closed | CbState::HalfOpen => Ok(()),
            CbState::Open => {
                let expired = inner.opened_at
                                   .map(|t| t.elapsed() >= self.timeout)
                                   .unwrap_or(true);
                if expired {
                    inner.state = CbState::HalfOpen;
                    Ok(())
                } else {
                    Err(FlowError::Recovery { strategy: "circuit-breaker".to_string(),
                                              message: "circuit is open; calls are blocked".to_string() })
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.state.lock().expect("breaker poisoned");
        inner.state = CbState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    fn on_failure(&self) {
        let mut inner = self.state.lock().expect("breaker poisoned");
        match inner.state {
            CbState::HalfOpen => {
                inner.state = CbState::Open;
                inner.opened_at = Some(Instant::now());
            }
            _ => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.threshold {
                    inner.state = CbState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state.lock().expect("breaker poisoned").state, CbState::Open)
    }
}

/// Wrapper ejecutable: política + colaboradores opcionales.
pub struct Recovery {
    pub policy: RecoveryPolicy,
    pub breaker: Option<Arc<CircuitBreaker>>,
    pub compensations: Option<Arc<CompensationLog>>,
    pub escalation: Option<Arc<dyn EscalationHandler>>,
}

impl Recovery {
    pub fn new(policy: RecoveryPolicy) -> Self {
        Self { policy,
               breaker: None,
               compensations: None,
               escalation: None }
    }

    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn with_compensations(mut self, log: Arc<CompensationLog>) -> Self {
        self.compensations = Some(log);
        self
    }

    pub fn with_escalation(mut self, handler: Arc<dyn EscalationHandler>) -> Self {
        self.escalation = Some(handler);
        self
    }

    /// Ejecuta la operación bajo la estrategia configurada.
    pub async fn execute<F, Fut>(&self, mut op: F) -> Result<Value, FlowError>
        where F: FnMut() -> Fut,
              Fut: std::future::Future<Output = Result<Value, FlowError>>
    {
        match self.policy.strategy {
            RecoveryStrategy::Retry => {
                let mut attempt: u32 = 0;
                loop {
                    match op().await {
                        Ok(v) => return Ok(v),
                        Err(e) if attempt < self.policy.max_retries => {
                            let delay = self.policy.delay_for(attempt);
                            log::debug!("retry attempt {} after {:?}: {e}", attempt + 1, delay);
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            RecoveryStrategy::Fallback => match op().await {
                Ok(v) => Ok(v),
                Err(e) => {
                    log::debug!("fallback engaged: {e}");
                    Ok(self.policy.fallback_value.clone().unwrap_or(Value::Null))
                }
            },
            RecoveryStrategy::Skip => match op().await {
                Ok(v) => Ok(v),
                Err(e) => {
                    log::debug!("skip engaged: {e}");
                    Ok(Value::Null)
                }
            },
            RecoveryStrategy::CircuitBreaker => {
                let breaker = self.breaker
                                  .clone()
                                  .ok_or_else(|| FlowError::Recovery { strategy: "circuit-breaker".to_string(),
                                                                       message: "no circuit breaker configured"
                                                                                .to_string() })?;
                breaker.try_acquire()?;
                match op().await {
                    Ok(v) => {
                        breaker.on_success();
                        Ok(v)
                    }
                    Err(e) => {
                        breaker.on_failure();
                        Err(e)
                    }
                }
            }
            RecoveryStrategy::Compensate => match op().await {
                Ok(v) => Ok(v),
                Err(e) => {
                    if let Some(log_) = &self.compensations {
                        // un fallo de compensación se loguea pero el error
                        // original es el que se propaga
                        if let Err(ce) = log_.run_all().await {
                            log::warn!("{ce}");
                        }
                    }
                    Err(FlowError::Recovery { strategy: "compensate".to_string(),
                                              message: format!("recovered=true; original error: {e}") })
                }
            },
            RecoveryStrategy::Escalate => match op().await {
                Ok(v) => Ok(v),
                Err(e) => {
                    if let Some(handler) = &self.escalation {
                        if let Err(he) = handler.escalate(&e).await {
                            log::warn!("escalation handler failed: {he}");
                        }
                    }
                    Err(e)
                }
            },
        }
    }
}
