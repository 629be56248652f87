//! Constantes del motor core.
//!
//! Este módulo agrupa valores estáticos compartidos por el compilador IR, el
//! intérprete y el protocolo de suspensión. Cambios en estas constantes pueden
//! afectar la compatibilidad de registros persistidos (`RECORD_VERSION`) o la
//! semántica observable del motor (`DEFAULT_MAX_ITERATIONS`).

/// Versión lógica del motor. Participa en los metadatos de los registros de
/// suspensión para poder migrar formatos hacia adelante sin romper registros
/// ya persistidos.
pub const ENGINE_VERSION: &str = "DF1.0";

/// Única versión de documento de workflow aceptada por el validador.
pub const SUPPORTED_WORKFLOW_VERSION: &str = "1.0";

/// Versión del sobre persistido (`PersistedState.version`).
pub const RECORD_VERSION: u32 = 1;

/// Id reservado del pseudo-tool al que se rebaja un `switch`. El intérprete lo
/// intercepta antes de consultar el registro de tools.
pub const SWITCH_TOOL_ID: &str = "__builtin_switch";

/// Tope de workers concurrentes por defecto del `WorkerPool`.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Piso de workers: el pool nunca baja de aquí aunque se reconfigure.
pub const MIN_WORKERS: usize = 1;

/// Tope duro de iteraciones por defecto para cualquier loop rebajado a IR.
pub const DEFAULT_MAX_ITERATIONS: u64 = 1000;

/// Reintentos del protocolo de suspensión frente a fallos retryables del
/// backend (adicionales al intento inicial).
pub const STORE_RETRY_ATTEMPTS: u32 = 2;

/// Delay base (ms) del backoff exponencial al reintentar contra el backend.
pub const STORE_RETRY_BASE_DELAY_MS: u64 = 50;

/// Variable implícita siempre ligada en el scope raíz.
pub const INPUT_VAR: &str = "input";

/// Nombre del acumulador visible dentro del cuerpo de un `reduce`.
pub const ACC_VAR: &str = "acc";

/// Iterador por defecto cuando el operador no declara `iteratorVar`.
pub const DEFAULT_ITERATOR_VAR: &str = "item";
