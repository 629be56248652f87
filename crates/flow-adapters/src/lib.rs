//! flow-adapters
//!
//! Adaptadores concretos sobre los puertos de flow-core: tools deterministas
//! de ejemplo (aritmética, strings, fetch/summarize con join declarado), un
//! tool suspensivo de input humano y servicios de choice simples. Los usan el
//! binario demo y los tests de integración del core.

pub mod choice;
pub mod tools;

pub use choice::{FirstOptionChoice, StaticChoice};
pub use tools::{register_demo_tools, AskUserTool, BreakIfTool, ConcatTool, DoubleTool, EchoTool, FailTool, FetchTool,
                FlakyTool, PauseTool, SleepTool, SumTool, SummarizeTool, UppercaseTool};
