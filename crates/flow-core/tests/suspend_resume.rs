//! Protocolo de suspensión y reanudación contra el backend en memoria.

use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use serde_json::{json, Value};
use std::sync::Arc;

use flow_adapters::{register_demo_tools, FirstOptionChoice};
use flow_core::context::ExecutionContext;
use flow_core::errors::FlowError;
use flow_core::interpreter::{FlowEventKind, Interpreter, RunOptions};
use flow_core::model::{Step, StepCommon, Workflow};
use flow_core::suspend::{InMemoryBackend, ListCriteria, StorageBackend};
use flow_core::tool::{SuspendSignal, Tool, ToolOutcome, ToolRegistry};
use flow_core::{EngineConfig, ExecutionOutcome, OperatorCatalog};

fn registry() -> Arc<ToolRegistry> {
    let r = Arc::new(ToolRegistry::new());
    register_demo_tools(&r);
    r
}

fn tool(id: &str, tool_id: &str, args: Value) -> Step {
    tool_out(id, tool_id, args, None)
}

fn tool_out(id: &str, tool_id: &str, args: Value, output: Option<&str>) -> Step {
    let args: IndexMap<String, Value> = match args {
        Value::Object(map) => map.into_iter().collect(),
        _ => IndexMap::new(),
    };
    let mut common = StepCommon::with_id(id);
    common.output = output.map(str::to_string);
    Step::Tool { common,
                 tool_id: tool_id.to_string(),
                 args }
}

fn compile(w: &Workflow) -> flow_core::IrGraph {
    OperatorCatalog::standard().compile(w, Some(registry())).expect("compile")
}

/// Suspende cuando `value == at`; si no, devuelve `value * 10`.
struct SuspendAt {
    at: i64,
}

#[async_trait]
impl Tool for SuspendAt {
    fn id(&self) -> &str {
        "suspend_at"
    }

    async fn execute(&self, args: Value, _ctx: &ExecutionContext) -> Result<ToolOutcome, FlowError> {
        let v = args.get("value").and_then(Value::as_i64).unwrap_or(0);
        if v == self.at {
            Ok(ToolOutcome::Suspend(SuspendSignal { message: Some(format!("need input for {v}")),
                                                    awaiting_input_schema: Some(json!({ "type": "number" })),
                                                    default_value: None }))
        } else {
            Ok(ToolOutcome::Value(json!(v * 10)))
        }
    }
}

// Escenario: ask_user suspende; el registro contiene las variables; el
// resume liga el input como resultado del tool y una segunda reanudación con
// la misma clave falla
#[tokio::test]
async fn suspend_then_resume_exactly_once() {
    let backend = Arc::new(InMemoryBackend::new());
    let interp = Interpreter::new(registry(), Arc::new(FirstOptionChoice), Arc::clone(&backend) as Arc<dyn StorageBackend>);

    let w = Workflow::new("1.0",
                          vec![tool_out("saludo", "uppercase", json!({ "text": "hola" }), Some("saludo_txt")),
                               tool_out("pregunta", "ask_user", json!({ "prompt": "¿seguimos?" }), Some("respuesta")),
                               tool("final", "echo", json!({ "saludo": "$saludo_txt", "respuesta": "$respuesta" }))]);

    let outcome = interp.run(compile(&w), RunOptions::default()).await.expect("run");
    let suspended = match outcome {
        ExecutionOutcome::Suspended(s) => s,
        _ => panic!("expected suspension"),
    };
    assert_eq!(suspended.metadata.tools_executed, vec!["uppercase"]);
    assert_eq!(suspended.message, "¿seguimos?");

    // el backend tiene el registro con el snapshot de variables
    let envelope = backend.retrieve(&suspended.suspension_key).await.expect("retrieve").expect("present");
    let (record, _ir) = envelope.open().expect("open");
    assert_eq!(record.step_id, "pregunta");
    assert_eq!(record.metadata.tool_id, "ask_user");
    assert_eq!(record.variable_snapshot.scopes.get("saludo_txt"), Some(&json!("HOLA")));
    assert!(record.checksum.is_some());

    // resume: "hello" se liga como resultado del tool suspendido
    let resumed = interp.resume_execution(&suspended.suspension_key, json!("hello")).await.expect("resume");
    let completed = match resumed {
        ExecutionOutcome::Completed(c) => c,
        _ => panic!("expected completion"),
    };
    assert_eq!(completed.output, json!({ "saludo": "HOLA", "respuesta": "hello" }));
    // el tramo resumido despacha el tool suspendido y el final
    assert_eq!(completed.metadata.tools_executed, vec!["ask_user", "echo"]);

    // el registro fue consumido: la clave no resume dos veces
    assert!(backend.retrieve(&suspended.suspension_key).await.expect("retrieve").is_none());
    let second = interp.resume_execution(&suspended.suspension_key, json!("otra")).await;
    assert!(second.is_err());
}

#[tokio::test]
async fn resume_continues_a_map_from_the_suspended_iteration() {
    let reg = registry();
    reg.register(Arc::new(SuspendAt { at: 2 }));
    let backend = Arc::new(InMemoryBackend::new());
    let interp = Interpreter::new(Arc::clone(&reg), Arc::new(FirstOptionChoice), Arc::clone(&backend) as Arc<dyn StorageBackend>);

    let w = Workflow::new("1.0",
                          vec![Step::Map { common: StepCommon::with_id("m"),
                                           collection: json!([1, 2, 3]),
                                           with: Box::new(tool("s", "suspend_at", json!({ "value": "$item" }))) }]);
    let ir = OperatorCatalog::standard().compile(&w, Some(Arc::clone(&reg))).expect("compile");

    let outcome = interp.run(ir, RunOptions::default()).await.expect("run");
    let suspended = match outcome {
        ExecutionOutcome::Suspended(s) => s,
        _ => panic!("expected suspension at item 2"),
    };
    // la primera iteración completó antes de suspender
    assert_eq!(suspended.metadata.tools_executed, vec!["suspend_at"]);

    // resume: 99 reemplaza el resultado del item 2 y la iteración 3 corre
    let resumed = interp.resume_execution(&suspended.suspension_key, json!(99)).await.expect("resume");
    match resumed {
        ExecutionOutcome::Completed(c) => assert_eq!(c.output, json!([10, 99, 30])),
        _ => panic!("expected completion"),
    }
}

#[tokio::test]
async fn expired_record_resumes_as_not_found() {
    let backend = Arc::new(InMemoryBackend::new());
    let mut config = EngineConfig::default();
    config.suspension.default_ttl_secs = 1; // vence casi de inmediato
    let interp = Interpreter::new(registry(), Arc::new(FirstOptionChoice), Arc::clone(&backend) as Arc<dyn StorageBackend>)
        .with_config(config);

    let w = Workflow::new("1.0", vec![tool("q", "ask_user", json!({ "prompt": "?" }))]);
    let outcome = interp.run(compile(&w), RunOptions::default()).await.expect("run");
    let suspended = match outcome {
        ExecutionOutcome::Suspended(s) => s,
        _ => panic!("expected suspension"),
    };

    // forzar el paso del TTL
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    let err = interp.resume_execution(&suspended.suspension_key, json!("tarde")).await.expect_err("expired");
    assert_eq!(err.category(), "execution");
    assert!(err.to_string().contains("not found or expired"), "{err}");
}

#[tokio::test]
async fn streaming_run_emits_suspension_and_resume_events() {
    let backend = Arc::new(InMemoryBackend::new());
    let interp = Interpreter::new(registry(), Arc::new(FirstOptionChoice), Arc::clone(&backend) as Arc<dyn StorageBackend>);
    let w = Workflow::new("1.0", vec![tool("q", "ask_user", json!({ "prompt": "?" }))]);

    let (mut rx, handle) = interp.run_streaming(compile(&w), RunOptions::default());
    let mut kinds: Vec<String> = Vec::new();
    while let Some(ev) = rx.recv().await {
        let terminal = ev.kind.is_terminal();
        kinds.push(match ev.kind {
                       FlowEventKind::NodeStart { .. } => "node-start".into(),
                       FlowEventKind::FlowSuspended { .. } => "flow-suspended".into(),
                       other => format!("{other:?}"),
                   });
        if terminal {
            break;
        }
    }
    let outcome = handle.await.expect("join").expect("run");
    assert!(outcome.is_suspended());
    assert_eq!(kinds.first().map(String::as_str), Some("node-start"));
    assert_eq!(kinds.last().map(String::as_str), Some("flow-suspended"));
}

#[tokio::test]
async fn list_and_cleanup_honour_criteria() {
    let backend = Arc::new(InMemoryBackend::new());
    let interp = Interpreter::new(registry(), Arc::new(FirstOptionChoice), Arc::clone(&backend) as Arc<dyn StorageBackend>);
    let w = Workflow::new("1.0", vec![tool("q", "ask_user", json!({ "prompt": "?" }))]);

    for _ in 0..3 {
        let outcome = interp.run(compile(&w), RunOptions::default()).await.expect("run");
        assert!(outcome.is_suspended());
    }

    let all = backend.list(&ListCriteria::default()).await.expect("list");
    assert_eq!(all.len(), 3);

    let by_tool = backend.list(&ListCriteria { tool_id: Some("ask_user".into()),
                                               ..Default::default() })
                         .await
                         .expect("list by tool");
    assert_eq!(by_tool.len(), 3);

    let limited = backend.list(&ListCriteria { limit: Some(2),
                                               ..Default::default() })
                         .await
                         .expect("list limited");
    assert_eq!(limited.len(), 2);

    let removed = backend.cleanup(&ListCriteria { older_than: Some(Utc::now()),
                                                  ..Default::default() })
                         .await
                         .expect("cleanup");
    assert_eq!(removed, 3);
    assert!(backend.is_empty());
}
