//! Compilación (rebaje a IR) y validación de workflows.

use indexmap::IndexMap;
use serde_json::json;
use std::sync::Arc;

use flow_adapters::register_demo_tools;
use flow_core::constants::SWITCH_TOOL_ID;
use flow_core::ir::IrNodeKind;
use flow_core::model::{FlatStep, LoopType, Step, StepCommon, SwitchOption, Workflow};
use flow_core::validate::{codes, FlowValidator};
use flow_core::{to_flat, OperatorCatalog, ToolRegistry};

fn registry() -> Arc<ToolRegistry> {
    let r = Arc::new(ToolRegistry::new());
    register_demo_tools(&r);
    r
}

fn tool(id: &str, tool_id: &str, args: serde_json::Value) -> Step {
    let args: IndexMap<String, serde_json::Value> = match args {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        _ => IndexMap::new(),
    };
    Step::Tool { common: StepCommon::with_id(id),
                 tool_id: tool_id.to_string(),
                 args }
}

#[test]
fn switch_lowers_to_marked_tool_node() {
    let mut branches = IndexMap::new();
    branches.insert("a".to_string(), vec![tool("br_a", "echo", json!({}))]);
    let w = Workflow::new("1.0",
                          vec![Step::Switch { common: StepCommon::with_id("sw"),
                                              discriminator: "elegir".into(),
                                              options: vec![SwitchOption { id: "a".into(),
                                                                           name: None,
                                                                           description: None }],
                                              branches }]);
    let ir = OperatorCatalog::standard().compile(&w, Some(registry())).expect("compile");
    let node = ir.node("sw").expect("switch node");
    match &node.kind {
        IrNodeKind::Tool { tool_id, args } => {
            assert_eq!(tool_id, SWITCH_TOOL_ID);
            assert!(args.contains_key("prompt"));
            assert!(args.contains_key("options"));
            assert!(args.contains_key("branches"));
        }
        other => panic!("expected tool node, got {other:?}"),
    }
    // la rama también quedó rebajada como nodo propio
    assert!(ir.node("br_a").is_some());
}

#[test]
fn loop_lowering_stamps_max_iterations_and_iterator() {
    let w = Workflow::new("1.0",
                          vec![Step::Loop { common: StepCommon::with_id("l1"),
                                            loop_type: LoopType::For,
                                            collection: Some(json!([1, 2])),
                                            condition: None,
                                            iterator_var: None,
                                            accumulator: None,
                                            body: vec![tool("b1", "double", json!({ "value": "$item" }))] }]);
    let ir = OperatorCatalog::standard().compile(&w, Some(registry())).expect("compile");
    match &ir.node("l1").expect("loop").kind {
        IrNodeKind::Loop { iterator_var, max_iterations, .. } => {
            assert_eq!(iterator_var, "item");
            assert_eq!(*max_iterations, 1000);
        }
        other => panic!("expected loop node, got {other:?}"),
    }
}

#[test]
fn reduce_carries_accumulator_literal() {
    let w = Workflow::new("1.0",
                          vec![Step::Reduce { common: StepCommon::with_id("r1"),
                                              collection: json!([1, 2, 3]),
                                              initial_value: json!(0),
                                              with: Box::new(tool("body", "sum", json!({ "a": "$acc", "b": "$item" }))) }]);
    let ir = OperatorCatalog::standard().compile(&w, Some(registry())).expect("compile");
    match &ir.node("r1").expect("reduce").kind {
        IrNodeKind::Loop { accumulator, .. } => assert_eq!(accumulator, &Some(json!(0))),
        other => panic!("expected loop node, got {other:?}"),
    }
}

#[test]
fn absent_else_lowers_to_none() {
    let w = Workflow::new("1.0",
                          vec![Step::Conditional { common: StepCommon::with_id("c1"),
                                                   condition: "$input > 1".into(),
                                                   then_steps: vec![tool("t1", "echo", json!({}))],
                                                   else_steps: None }]);
    let ir = OperatorCatalog::standard().compile(&w, Some(registry())).expect("compile");
    match &ir.node("c1").expect("conditional").kind {
        IrNodeKind::Conditional { else_branch, .. } => assert!(else_branch.is_none()),
        other => panic!("expected conditional, got {other:?}"),
    }
}

#[test]
fn flat_parallel_list_becomes_one_branch_per_step() {
    let w = Workflow::new("1.0",
                          vec![Step::Parallel { common: StepCommon::with_id("p1"),
                                                branches: None,
                                                parallel: Some(vec![tool("a", "echo", json!({})),
                                                                    tool("b", "echo", json!({}))]) }]);
    let ir = OperatorCatalog::standard().compile(&w, Some(registry())).expect("compile");
    match &ir.node("p1").expect("parallel").kind {
        IrNodeKind::Parallel { branches, .. } => {
            assert_eq!(branches, &vec![vec!["a".to_string()], vec!["b".to_string()]]);
        }
        other => panic!("expected parallel, got {other:?}"),
    }
}

#[test]
fn unknown_tool_fails_compilation_with_registry() {
    let w = Workflow::new("1.0", vec![tool("t1", "no_such_tool", json!({}))]);
    let err = OperatorCatalog::standard().compile(&w, Some(registry())).expect_err("must fail");
    assert_eq!(err.category(), "tool");
}

#[test]
fn compiled_graph_is_acyclic_and_fully_reachable() {
    let w = Workflow::new("1.0",
                          vec![tool("t1", "fetch", json!({ "url": "x" })),
                               tool("t2", "summarize", json!({ "input": "$t1.out" }))]);
    let ir = OperatorCatalog::standard().compile(&w, Some(registry())).expect("compile");
    assert!(ir.find_cycle().is_none());
    assert!(ir.unreachable_nodes().is_empty());
}

// ---------------------------------------------------------------------------
// validador
// ---------------------------------------------------------------------------

#[test]
fn validator_accepts_well_formed_workflow() {
    let w = Workflow::new("1.0",
                          vec![tool("t1", "fetch", json!({ "url": "https://x" })),
                               tool("t2", "summarize", json!({ "input": "$t1.out" }))]);
    let report = FlowValidator::new(Some(registry())).validate(&to_flat(&w));
    assert!(report.valid, "{}", report.render());
    assert!(report.warnings.is_empty());
}

#[test]
fn validator_rejects_wrong_version() {
    let mut w = Workflow::new("2.0", vec![tool("t1", "echo", json!({}))]);
    w.version = "2.0".into();
    let report = FlowValidator::new(Some(registry())).validate(&to_flat(&w));
    assert!(!report.valid);
    assert!(report.errors.iter().any(|e| e.code == codes::UNSUPPORTED_VERSION));
}

#[test]
fn validator_reports_unknown_tool() {
    let w = Workflow::new("1.0", vec![tool("t1", "ghost", json!({}))]);
    let report = FlowValidator::new(Some(registry())).validate(&to_flat(&w));
    assert!(report.errors.iter().any(|e| e.code == codes::TOOL_NOT_FOUND));
}

#[test]
fn validator_reports_undefined_variable() {
    let w = Workflow::new("1.0", vec![tool("t1", "echo", json!({ "x": "$nunca_definida" }))]);
    let report = FlowValidator::new(Some(registry())).validate(&to_flat(&w));
    assert!(report.errors.iter().any(|e| e.code == codes::UNDEFINED_VARIABLE));
}

#[test]
fn validator_accepts_output_and_node_references() {
    let mut t1 = tool("t1", "fetch", json!({ "url": "https://x" }));
    if let Step::Tool { common, .. } = &mut t1 {
        common.output = Some("page".into());
    }
    let w = Workflow::new("1.0",
                          vec![t1, tool("t2", "echo", json!({ "a": "$page", "b": "$t1.out" }))]);
    let report = FlowValidator::new(Some(registry())).validate(&to_flat(&w));
    assert!(report.valid, "{}", report.render());
}

#[test]
fn validator_detects_cycles_in_flat_references() {
    // armado a mano: un loop cuyo body se referencia a sí mismo
    let mut flat = to_flat(&Workflow::new("1.0",
                                          vec![Step::Loop { common: StepCommon::with_id("l1"),
                                                            loop_type: LoopType::For,
                                                            collection: Some(json!([1])),
                                                            condition: None,
                                                            iterator_var: None,
                                                            accumulator: None,
                                                            body: vec![tool("b1", "echo", json!({}))] }]));
    for s in flat.steps.iter_mut() {
        if let FlatStep::Loop { body, .. } = s {
            body.push("l1".to_string());
        }
    }
    let report = FlowValidator::new(Some(registry())).validate(&flat);
    assert!(report.errors.iter().any(|e| e.code == codes::CYCLE_DETECTED));
}

#[test]
fn validator_warns_about_unreachable_steps() {
    let mut flat = to_flat(&Workflow::new("1.0", vec![tool("t1", "echo", json!({}))]));
    flat.steps.push(FlatStep::Tool { common: StepCommon::with_id("huerfano"),
                                     tool_id: "echo".into(),
                                     args: IndexMap::new() });
    let report = FlowValidator::new(Some(registry())).validate(&flat);
    assert!(report.valid, "unreachable es warning, no error");
    assert!(report.warnings
                  .iter()
                  .any(|w| w.code == codes::UNREACHABLE_NODE && w.message.contains("huerfano")));
}

#[test]
fn incompatible_connection_without_join_is_reported() {
    let reg = Arc::new(ToolRegistry::new());
    register_demo_tools(&reg);
    // summarize→double: salida string contra entrada objeto, sin join
    let w = Workflow::new("1.0",
                          vec![tool("s1", "summarize", json!({})),
                               tool("d1", "double", json!({ "value": 2 }))]);
    let report = FlowValidator::new(Some(reg)).validate(&to_flat(&w));
    assert!(report.errors.iter().any(|e| e.code == codes::INCOMPATIBLE_CONNECTION));
}

#[test]
fn declared_join_silences_schema_mismatch() {
    let reg = Arc::new(ToolRegistry::new());
    register_demo_tools(&reg);
    reg.declare_join("summarize", "double");
    let w = Workflow::new("1.0",
                          vec![tool("s1", "summarize", json!({})),
                               tool("d1", "double", json!({ "value": 2 }))]);
    let report = FlowValidator::new(Some(reg)).validate(&to_flat(&w));
    assert!(report.valid, "{}", report.render());
}

#[test]
fn fetch_to_summarize_join_is_compatible() {
    let w = Workflow::new("1.0",
                          vec![tool("f", "fetch", json!({ "url": "https://x" })),
                               tool("s", "summarize", json!({ "input": "$f.out" }))]);
    let report = FlowValidator::new(Some(registry())).validate(&to_flat(&w));
    assert!(report.valid, "{}", report.render());
}
