//! Forma canónica on-the-wire: parseo JSON, ley de round-trip y shape de los
//! eventos serializados.

use serde_json::json;

use flow_core::interpreter::{FlowEvent, FlowEventKind};
use flow_core::model::FlatWorkflow;
use flow_core::{from_flat, to_flat};

#[test]
fn flat_document_parses_from_canonical_json() {
    let raw = json!({
        "version": "1.0",
        "metadata": { "name": "demo", "generated": true },
        "steps": [
            { "id": "f", "kind": "tool", "toolId": "fetch", "args": { "url": "https://x" }, "output": "page" },
            { "id": "c", "kind": "conditional", "condition": "$page.status == 200",
              "thenSteps": ["ok"], "elseSteps": null },
            { "id": "ok", "kind": "tool", "toolId": "echo", "args": {} },
            { "id": "m", "kind": "loop", "loopType": "for", "collection": [1, 2],
              "body": ["ok"] }
        ],
        "rootIds": ["f", "c", "m"]
    }).to_string();

    let fw = FlatWorkflow::from_json(&raw).expect("parse");
    assert_eq!(fw.version, "1.0");
    assert_eq!(fw.metadata.name.as_deref(), Some("demo"));
    assert_eq!(fw.root_ids, vec!["f", "c", "m"]);
    assert_eq!(fw.steps.len(), 4);
    assert_eq!(fw.step("f").map(|s| s.kind_name()), Some("tool"));
}

#[test]
fn truncated_json_is_a_parse_error_with_snippet() {
    let err = FlatWorkflow::from_json("{ \"version\": \"1.0\", \"steps\": [").expect_err("must fail");
    assert_eq!(err.category(), "parse");
    let report = err.report();
    assert!(report.message.contains("EOF") || !report.message.is_empty());
}

#[test]
fn roundtrip_law_holds_for_parsed_documents() {
    let raw = json!({
        "version": "1.0",
        "metadata": {},
        "steps": [
            { "id": "a", "kind": "tool", "toolId": "echo", "args": { "x": 1 } },
            { "id": "p", "kind": "parallel", "branches": [["a"]] }
        ],
        "rootIds": ["p"]
    }).to_string();
    let fw = FlatWorkflow::from_json(&raw).expect("parse");
    let recursive = from_flat(&fw).expect("from_flat");
    let back = to_flat(&recursive);
    // round-trip: mismos steps (el orden de emisión es preorden determinista)
    assert_eq!(back.root_ids, fw.root_ids);
    assert_eq!(back.steps.len(), fw.steps.len());
    assert_eq!(from_flat(&back).expect("again"), recursive);
}

#[test]
fn events_serialize_with_kebab_case_type_tags() {
    let ev = FlowEvent { seq: 0,
                         flow_id: uuid::Uuid::nil(),
                         kind: FlowEventKind::NodeStart { node_id: "n1".into(),
                                                          node_type: "tool".into() },
                         ts: chrono::Utc::now() };
    let v = serde_json::to_value(&ev).expect("serialize");
    assert_eq!(v["type"], json!("node-start"));
    assert_eq!(v["nodeId"], json!("n1"));
    assert_eq!(v["seq"], json!(0));

    let suspended = FlowEventKind::FlowSuspended { suspension_key: "susp_x".into(),
                                                   message: None };
    let v = serde_json::to_value(&suspended).expect("serialize");
    assert_eq!(v["type"], json!("flow-suspended"));
    assert!(suspended.is_terminal());
}
