//! flow-core: motor de workflows dinámicos.
//!
//! Propósito:
//! - Aceptar una descripción declarativa de workflow (grafo de operadores),
//!   compilarla a una representación intermedia (IR) e interpretarla para
//!   orquestar invocaciones de tools con control de flujo completo
//!   (condicional, switch, loops, paralelo), scoping de variables y
//!   semántica de pausa/suspensión con persistencia enchufable.
//!
//! Componentes principales:
//! - `model`: documentos de workflow (forma recursiva y plana) y la
//!   gramática de referencias de valor.
//! - `catalog`: tabla de métodos por kind de operador, conversión
//!   plano↔recursivo y rebaje a IR.
//! - `ir`: grafo id-direccionado congelado que ejecuta el intérprete.
//! - `validate`: chequeos estructurales/semánticos previos a ejecutar.
//! - `context`: scopes de variables, worker pool, señales, pausa y
//!   cancelación cooperativa.
//! - `tool`: puertos de tools y del servicio de choice, con registro
//!   inyectado.
//! - `expr`: evaluador puro de condiciones.
//! - `interpreter`: ejecución, eventos, timeout/retry por nodo, cursor de
//!   suspensión y reanudación.
//! - `suspend`: registros de suspensión, sobre versionado sellado (payload
//!   canónico + checksum BLAKE3) y puerto de almacenamiento (backend en
//!   memoria incluido).
//! - `recovery`: retry, fallback, circuit breaker, skip, compensación y
//!   escalación.
//! - `errors`: taxonomía única de errores del motor.
//!
//! Re-exports: se exponen los símbolos clave para binarios y tests.

pub mod catalog;
pub mod config;
pub mod constants;
pub mod context;
pub mod errors;
pub mod expr;
pub mod interpreter;
pub mod ir;
pub mod model;
pub mod recovery;
pub mod suspend;
pub mod tool;
pub mod validate;

// Re-exports públicos principales
pub use catalog::{from_flat, to_flat, Operator, OperatorCatalog};
pub use config::EngineConfig;
pub use context::{CancelFlag, ExecutionContext, FlowControl, PauseGate, PoolStats, ScopeStack, WorkerPool};
pub use errors::{ErrorReport, FlowError};
pub use interpreter::{CompletedExecution, ExecutionOutcome, FlowEvent, FlowEventKind, FlowStatus, Interpreter,
                      RunMetadata, RunOptions, SuspendedExecution};
pub use ir::{IrGraph, IrNode, IrNodeKind};
pub use model::{FlatStep, FlatWorkflow, LoopType, Step, StepCommon, SwitchOption, ValueRef, Workflow, WorkflowMeta};
pub use suspend::{BackendHealth, InMemoryBackend, ListCriteria, PersistedEnvelope, StorageBackend, SuspensionRecord};
pub use tool::{ChoiceOutcome, ChoiceService, RegistrySnapshot, SuspendSignal, Tool, ToolOutcome, ToolRegistry};
pub use validate::{FlowValidator, ValidationIssue, ValidationReport};
