//! Paridad del backend filesystem con el contrato del puerto: atomicidad,
//! expiración, criterios de listado/limpieza y salud.

use chrono::{Duration, Utc};
use serde_json::json;
use tempfile::TempDir;
use uuid::Uuid;

use flow_core::context::ScopeStack;
use flow_core::ir::{IrBuilder, IrGraph, IrNode, IrNodeKind};
use flow_core::suspend::{CursorFrame, ExecutionPosition, ListCriteria, PersistedEnvelope, StorageBackend,
                         SuspensionMetadata, SuspensionRecord, VariableSnapshot};
use flow_persistence::{FsBackend, StorageConfig};

fn sample_ir() -> IrGraph {
    let mut b = IrBuilder::new();
    b.add_node(IrNode::new("t1",
                           IrNodeKind::Tool { tool_id: "echo".into(),
                                              args: indexmap::IndexMap::new() }))
     .expect("node");
    b.finish("t1", Default::default()).expect("finish")
}

fn sample_record(key: &str, ttl_secs: Option<i64>) -> SuspensionRecord {
    let created = Utc::now();
    let mut scopes = ScopeStack::with_input(json!({ "n": 1 }));
    scopes.set("saludo", json!("hola"));
    SuspensionRecord { key: key.to_string(),
                       flow_id: Uuid::new_v4(),
                       step_id: "t1".into(),
                       session_id: None,
                       execution_position: ExecutionPosition { node_id: "t1".into(),
                                                               cursor: vec![CursorFrame::new("root", 0)] },
                       variable_snapshot: VariableSnapshot { scopes,
                                                             node_outputs: Default::default() },
                       metadata: SuspensionMetadata { tool_id: "ask_user".into(),
                                                      suspended_at: created,
                                                      extra: Default::default() },
                       awaiting_input_schema: Some(json!({ "type": "string" })),
                       default_value: None,
                       created_at: created,
                       expires_at: ttl_secs.map(|s| created + Duration::seconds(s)),
                       size: 0,
                       checksum: None }
}

async fn backend(dir: &TempDir) -> FsBackend {
    FsBackend::new(StorageConfig { base_dir: dir.path().to_path_buf() }).await.expect("backend")
}

#[tokio::test]
async fn store_then_retrieve_roundtrips_the_envelope() {
    let dir = TempDir::new().expect("tmpdir");
    let be = backend(&dir).await;
    let ir = sample_ir();
    let env = PersistedEnvelope::seal(sample_record("susp_abc", None), &ir).expect("seal");

    be.store("susp_abc", &env).await.expect("store");
    let got = be.retrieve("susp_abc").await.expect("retrieve").expect("present");
    assert_eq!(got, env);

    let (record, ir_back) = got.open().expect("open");
    assert_eq!(record.step_id, "t1");
    assert_eq!(record.variable_snapshot.scopes.get("saludo"), Some(&json!("hola")));
    assert_eq!(ir_back, ir);
}

#[tokio::test]
async fn store_leaves_no_temporary_files_behind() {
    let dir = TempDir::new().expect("tmpdir");
    let be = backend(&dir).await;
    let env = PersistedEnvelope::seal(sample_record("susp_tmp", None), &sample_ir()).expect("seal");
    be.store("susp_tmp", &env).await.expect("store");

    let mut entries = std::fs::read_dir(dir.path()).expect("read dir")
                                                   .map(|e| e.expect("entry").file_name().into_string().unwrap())
                                                   .collect::<Vec<_>>();
    entries.sort();
    assert_eq!(entries, vec!["susp_tmp.json"]);
}

#[tokio::test]
async fn expired_records_retrieve_as_absent() {
    let dir = TempDir::new().expect("tmpdir");
    let be = backend(&dir).await;
    let env = PersistedEnvelope::seal(sample_record("susp_exp", Some(-5)), &sample_ir()).expect("seal");
    be.store("susp_exp", &env).await.expect("store");

    assert!(be.retrieve("susp_exp").await.expect("retrieve").is_none());
    // pero sigue en disco hasta el cleanup
    let expired = be.list(&ListCriteria { expired_only: true,
                                          ..Default::default() })
                    .await
                    .expect("list");
    assert_eq!(expired.len(), 1);
}

#[tokio::test]
async fn delete_reports_whether_the_key_existed() {
    let dir = TempDir::new().expect("tmpdir");
    let be = backend(&dir).await;
    let env = PersistedEnvelope::seal(sample_record("susp_del", None), &sample_ir()).expect("seal");
    be.store("susp_del", &env).await.expect("store");

    assert!(be.delete("susp_del").await.expect("delete"));
    assert!(!be.delete("susp_del").await.expect("second delete"));
}

#[tokio::test]
async fn list_supports_prefix_pattern_offset_and_limit() {
    let dir = TempDir::new().expect("tmpdir");
    let be = backend(&dir).await;
    for key in ["susp_a1", "susp_a2", "susp_b1", "otra_c1"] {
        let env = PersistedEnvelope::seal(sample_record(key, None), &sample_ir()).expect("seal");
        be.store(key, &env).await.expect("store");
    }

    let with_prefix = be.list(&ListCriteria { prefix: Some("susp_".into()),
                                              ..Default::default() })
                        .await
                        .expect("prefix");
    assert_eq!(with_prefix.len(), 3);

    let with_pattern = be.list(&ListCriteria { pattern: Some("a".into()),
                                               ..Default::default() })
                         .await
                         .expect("pattern");
    assert_eq!(with_pattern.len(), 3); // otra_c1 también contiene 'a'

    let paged = be.list(&ListCriteria { prefix: Some("susp_".into()),
                                        offset: Some(1),
                                        limit: Some(1),
                                        ..Default::default() })
                  .await
                  .expect("paged");
    assert_eq!(paged.len(), 1);
    assert_eq!(paged[0].key, "susp_a2"); // orden estable por clave
}

#[tokio::test]
async fn cleanup_removes_only_matching_records() {
    let dir = TempDir::new().expect("tmpdir");
    let be = backend(&dir).await;
    for (key, ttl) in [("susp_viva", None), ("susp_vencida", Some(-5))] {
        let env = PersistedEnvelope::seal(sample_record(key, ttl), &sample_ir()).expect("seal");
        be.store(key, &env).await.expect("store");
    }

    let removed = be.cleanup(&ListCriteria { expired_only: true,
                                             ..Default::default() })
                    .await
                    .expect("cleanup");
    assert_eq!(removed, 1);
    assert!(be.retrieve("susp_viva").await.expect("retrieve").is_some());
}

#[tokio::test]
async fn corrupt_files_do_not_break_listing() {
    let dir = TempDir::new().expect("tmpdir");
    let be = backend(&dir).await;
    let env = PersistedEnvelope::seal(sample_record("susp_ok", None), &sample_ir()).expect("seal");
    be.store("susp_ok", &env).await.expect("store");
    std::fs::write(dir.path().join("basura.json"), b"{ esto no es json v\xc3\xa1lido").expect("write garbage");

    let all = be.list(&ListCriteria::default()).await.expect("list");
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].key, "susp_ok");
}

#[tokio::test]
async fn health_probe_reports_healthy_directory() {
    let dir = TempDir::new().expect("tmpdir");
    let be = backend(&dir).await;
    let health = be.health().await;
    assert!(health.healthy);
    assert!(health.error.is_none());
}

#[tokio::test]
async fn checksum_mismatch_is_a_persistence_error() {
    let dir = TempDir::new().expect("tmpdir");
    let be = backend(&dir).await;
    let mut env = PersistedEnvelope::seal(sample_record("susp_sum", None), &sample_ir()).expect("seal");
    // manosear el data rompe el checksum
    env.state.data["record"]["stepId"] = json!("otro");
    be.store("susp_sum", &env).await.expect("store");

    let got = be.retrieve("susp_sum").await.expect("retrieve").expect("present");
    let err = got.open().expect_err("must fail");
    assert_eq!(err.category(), "persistence");
}
