//! Representación intermedia (IR) ejecutable.
//!
//! Rol en el flujo:
//! - El catálogo de operadores rebaja cada `Step` validado a un `IrNode`; el
//!   grafo resultante queda congelado antes de ejecutar.
//! - El grafo es estrictamente direccionado por id: los hijos se guardan como
//!   listas de ids, nunca inline, lo que habilita detección de ciclos por DFS
//!   estándar y serialización completa (un grafo viaja dentro de un registro
//!   de suspensión).

pub mod build;
pub mod graph;
pub mod node;

pub use build::IrBuilder;
pub use graph::{IrEdge, IrGraph};
pub use node::{IrLoopType, IrNode, IrNodeKind, JoinStrategy};
