//! Modelo de documentos de workflow.
//!
//! Rol en el flujo:
//! - `Workflow` es la forma recursiva (hijos inline), ergonómica para el
//!   caller. `FlatWorkflow` es la forma canónica on-the-wire (hijos por id).
//! - `Step` es el conjunto cerrado de operadores, etiquetado por `kind`.
//! - `ValueRef` implementa la gramática de referencias de valor (`$var`,
//!   `$nodo.salida`, literal) usada por args de tools y colecciones de loops.

pub mod flat;
pub mod step;
pub mod value_ref;

pub use flat::{FlatStep, FlatWorkflow, Workflow, WorkflowMeta};
pub use step::{LoopType, Step, StepCommon, SwitchOption};
pub use value_ref::ValueRef;
