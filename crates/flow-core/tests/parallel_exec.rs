//! Nodos paralelos: orden de resultados, aislamiento de scopes, fallo y
//! cancelación de ramas hermanas.

use indexmap::IndexMap;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

use flow_adapters::{register_demo_tools, FirstOptionChoice};
use flow_core::interpreter::{Interpreter, RunOptions};
use flow_core::model::{Step, StepCommon, Workflow};
use flow_core::suspend::InMemoryBackend;
use flow_core::{ExecutionOutcome, OperatorCatalog, ToolRegistry};

fn registry() -> Arc<ToolRegistry> {
    let r = Arc::new(ToolRegistry::new());
    register_demo_tools(&r);
    r
}

fn interpreter() -> Interpreter {
    Interpreter::new(registry(), Arc::new(FirstOptionChoice), Arc::new(InMemoryBackend::new()))
}

fn tool(id: &str, tool_id: &str, args: Value) -> Step {
    let args: IndexMap<String, Value> = match args {
        Value::Object(map) => map.into_iter().collect(),
        _ => IndexMap::new(),
    };
    Step::Tool { common: StepCommon::with_id(id),
                 tool_id: tool_id.to_string(),
                 args }
}

fn compile(w: &Workflow) -> flow_core::IrGraph {
    OperatorCatalog::standard().compile(w, Some(registry())).expect("compile")
}

// la rama lenta declara primero: el array preserva el orden de declaración
// aunque la rápida termine antes
#[tokio::test]
async fn result_array_preserves_declaration_order() {
    let w = Workflow::new("1.0",
                          vec![Step::Parallel { common: StepCommon::with_id("p"),
                                                branches: Some(vec![vec![tool("slow", "sleep",
                                                                             json!({ "ms": 60, "value": 1 }))],
                                                                    vec![tool("fast", "sleep",
                                                                             json!({ "ms": 1, "value": 2 }))]]),
                                                parallel: None }]);
    let outcome = interpreter().run(compile(&w), RunOptions::default()).await.expect("run");
    match outcome {
        ExecutionOutcome::Completed(c) => assert_eq!(c.output, json!([1, 2])),
        _ => panic!("expected completion"),
    }
}

#[tokio::test]
async fn branches_actually_overlap_in_time() {
    let mut branches = Vec::new();
    for i in 0..3 {
        branches.push(vec![tool(&format!("s{i}"), "sleep", json!({ "ms": 50, "value": i }))]);
    }
    let w = Workflow::new("1.0",
                          vec![Step::Parallel { common: StepCommon::with_id("p"),
                                                branches: Some(branches),
                                                parallel: None }]);
    let started = Instant::now();
    interpreter().run(compile(&w), RunOptions::default()).await.expect("run");
    // secuencial serían ≥150ms; concurrente con pool de 4 queda muy por debajo
    assert!(started.elapsed().as_millis() < 140, "took {:?}", started.elapsed());
}

// Escenario: rama 1 duerme, rama 2 falla de inmediato ⇒ el flujo falla con
// ese error y nada queda colgado
#[tokio::test]
async fn failing_branch_fails_flow_and_cancels_siblings() {
    let w = Workflow::new("1.0",
                          vec![Step::Parallel { common: StepCommon::with_id("p"),
                                                branches: Some(vec![vec![tool("b1a", "sleep",
                                                                             json!({ "ms": 40, "value": 1 })),
                                                                         tool("b1b", "sleep",
                                                                             json!({ "ms": 400, "value": 1 }))],
                                                                    vec![tool("b2", "fail",
                                                                             json!({ "message": "rama rota" }))]]),
                                                parallel: None }]);
    let started = Instant::now();
    let err = interpreter().run(compile(&w), RunOptions::default()).await.expect_err("flow must fail");
    assert_eq!(err.category(), "tool");
    assert!(err.to_string().contains("rama rota"), "{err}");
    // la rama 1 se cancela en su próximo punto de chequeo: no llega a
    // ejecutar los 400ms del segundo paso
    assert!(started.elapsed().as_millis() < 300, "siblings were not cancelled: {:?}", started.elapsed());
}

// invariante: escrituras de una rama no son observables fuera de ella
#[tokio::test]
async fn branch_variable_writes_stay_inside_the_branch() {
    let mut write_var = tool("w", "echo", json!({ "marca": true }));
    if let Step::Tool { common, .. } = &mut write_var {
        common.output = Some("solo_rama".into());
    }
    let w = Workflow::new("1.0",
                          vec![Step::Parallel { common: StepCommon::with_id("p"),
                                                branches: Some(vec![vec![write_var]]),
                                                parallel: None },
                               // fuera del paralelo, la variable no existe
                               tool("after", "echo", json!({ "leak": "$solo_rama" }))]);
    let err = interpreter().run(compile(&w), RunOptions::default()).await.expect_err("must fail");
    assert_eq!(err.category(), "execution");
    assert!(err.to_string().contains("solo_rama"), "{err}");
}

// los resultados de rama sí son observables posicionalmente
#[tokio::test]
async fn branch_results_flow_positionally_through_node_output() {
    let mut par = Step::Parallel { common: StepCommon::with_id("p"),
                                   branches: Some(vec![vec![tool("a", "double", json!({ "value": 5 }))],
                                                       vec![tool("b", "double", json!({ "value": 7 }))]]),
                                   parallel: None };
    if let Step::Parallel { common, .. } = &mut par {
        common.output = Some("pares".into());
    }
    let w = Workflow::new("1.0", vec![par, tool("eco", "echo", json!({ "resultado": "$pares" }))]);
    let outcome = interpreter().run(compile(&w), RunOptions::default()).await.expect("run");
    match outcome {
        ExecutionOutcome::Completed(c) => assert_eq!(c.output, json!({ "resultado": [10.0, 14.0] })),
        _ => panic!("expected completion"),
    }
}

// suspensión dentro de una rama paralela: rechazada con error de ejecución
#[tokio::test]
async fn suspension_inside_parallel_branch_is_rejected() {
    let w = Workflow::new("1.0",
                          vec![Step::Parallel { common: StepCommon::with_id("p"),
                                                branches: Some(vec![vec![tool("ask", "ask_user",
                                                                             json!({ "prompt": "?" }))]]),
                                                parallel: None }]);
    let err = interpreter().run(compile(&w), RunOptions::default()).await.expect_err("must fail");
    assert_eq!(err.category(), "execution");
    assert!(err.to_string().contains("parallel"), "{err}");
}
