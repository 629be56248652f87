//! Demo end-to-end del motor de workflows.
//!
//! Registra los tools de ejemplo, arma un workflow recursivo (cadena de
//! tools, condicional, map y switch), lo compila, lo valida y lo ejecuta con
//! eventos en vivo. Después dispara una suspensión con `ask_user` persistida
//! en el backend filesystem y la resume con una respuesta enlatada.

use indexmap::IndexMap;
use serde_json::json;
use std::sync::Arc;

use flow_adapters::{register_demo_tools, StaticChoice};
use flow_core::interpreter::{FlowEventKind, Interpreter, RunOptions};
use flow_core::model::{Step, StepCommon, SwitchOption, Workflow};
use flow_core::suspend::StorageBackend;
use flow_core::validate::FlowValidator;
use flow_core::{EngineConfig, OperatorCatalog, ToolRegistry};
use flow_persistence::FsBackend;

fn tool_step(id: &str, tool_id: &str, args: serde_json::Value, output: Option<&str>) -> Step {
    let args: IndexMap<String, serde_json::Value> = match args {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        _ => IndexMap::new(),
    };
    let mut common = StepCommon::with_id(id);
    common.output = output.map(str::to_string);
    Step::Tool { common,
                 tool_id: tool_id.to_string(),
                 args }
}

fn demo_workflow() -> Workflow {
    let mut switch_branches: IndexMap<String, Vec<Step>> = IndexMap::new();
    switch_branches.insert("short".to_string(),
                           vec![tool_step("sw_short", "uppercase", json!({ "text": "$summary" }), None)]);
    switch_branches.insert("long".to_string(),
                           vec![tool_step("sw_long", "echo", json!({ "value": "$summary" }), None)]);

    Workflow::new("1.0",
                  vec![tool_step("fetch_page", "fetch", json!({ "url": "https://example.test/doc" }), Some("page")),
                       tool_step("make_summary", "summarize", json!({ "input": "$fetch_page.out" }), Some("summary")),
                       Step::Conditional { common: StepCommon::with_id("check_status"),
                                           condition: "$page.status == 200".to_string(),
                                           then_steps: vec![tool_step("note_ok",
                                                                      "echo",
                                                                      json!({ "ok": true }),
                                                                      None)],
                                           else_steps: None },
                       Step::Map { common: StepCommon::with_id("double_all"),
                                   collection: json!([1, 2, 3]),
                                   with: Box::new(tool_step("double_one", "double", json!({ "value": "$item" }), None)) },
                       Step::Switch { common: StepCommon::with_id("pick_style"),
                                      discriminator: "¿resumen corto o largo?".to_string(),
                                      options: vec![SwitchOption { id: "short".into(),
                                                                   name: Some("short".into()),
                                                                   description: None },
                                                    SwitchOption { id: "long".into(),
                                                                   name: Some("long".into()),
                                                                   description: None }],
                                      branches: switch_branches },
                       tool_step("confirm", "ask_user", json!({ "prompt": "¿publicar el resumen?" }), Some("answer")),
                       tool_step("final_echo",
                                 "echo",
                                 json!({ "summary": "$summary", "answer": "$answer" }),
                                 None)])
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let registry = Arc::new(ToolRegistry::new());
    register_demo_tools(&registry);

    let backend = Arc::new(FsBackend::from_env().await?);
    let health = backend.health().await;
    println!("backend fs: healthy={} latency={}ms", health.healthy, health.latency_ms);

    let workflow = demo_workflow();
    let catalog = OperatorCatalog::standard();

    // validación sobre la forma plana canónica
    let flat = flow_core::to_flat(&workflow);
    let report = FlowValidator::new(Some(Arc::clone(&registry))).validate(&flat);
    print!("{}", report.render());
    if !report.valid {
        return Err("workflow rejected by validation".into());
    }

    let ir = catalog.compile(&workflow, Some(Arc::clone(&registry)))?;
    println!("IR: {} nodos, entry={}", ir.nodes.len(), ir.entry);

    let interpreter = Interpreter::new(Arc::clone(&registry),
                                       Arc::new(StaticChoice::new("short")),
                                       backend).with_config(EngineConfig::from_env());

    let (mut events, handle) = interpreter.run_streaming(ir, RunOptions::default());
    while let Some(ev) = events.recv().await {
        match &ev.kind {
            FlowEventKind::NodeStart { node_id, node_type } => println!("  → {node_id} ({node_type})"),
            FlowEventKind::NodeComplete { node_id, .. } => println!("  ✓ {node_id}"),
            FlowEventKind::NodeError { node_id, error, .. } => println!("  ✗ {node_id}: {}", error.message),
            FlowEventKind::FlowSuspended { suspension_key, message } => {
                println!("flujo suspendido [{suspension_key}]: {}", message.as_deref().unwrap_or(""))
            }
            FlowEventKind::FlowComplete { .. } => println!("flujo completo"),
            FlowEventKind::FlowError { error } => println!("flujo falló: {}", error.message),
            FlowEventKind::FlowResumed { suspension_key } => println!("flujo resumido [{suspension_key}]"),
        }
    }

    let outcome = handle.await??;
    let suspended = match outcome {
        flow_core::ExecutionOutcome::Suspended(s) => s,
        flow_core::ExecutionOutcome::Completed(c) => {
            println!("inesperado: completó sin suspender: {}", c.output);
            return Ok(());
        }
    };
    println!("instrucciones: {}", suspended.resumption_instructions);
    println!("tools ejecutados hasta la suspensión: {:?}", suspended.metadata.tools_executed);

    // resume con respuesta enlatada
    let resumed = interpreter.resume_execution(&suspended.suspension_key, json!("sí, publicar")).await?;
    match resumed {
        flow_core::ExecutionOutcome::Completed(c) => {
            println!("resultado final: {}", c.output);
            println!("tools del tramo resumido: {:?}", c.metadata.tools_executed);
        }
        flow_core::ExecutionOutcome::Suspended(s) => println!("volvió a suspender: {}", s.suspension_key),
    }

    // una segunda reanudación con la misma clave debe fallar
    let second = interpreter.resume_execution(&suspended.suspension_key, json!("otra vez")).await;
    println!("segundo resume rechazado: {}", second.is_err());

    Ok(())
}
