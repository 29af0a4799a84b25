//! End-to-end pipeline behavior: statuses, claim-and-remove commits,
//! statistics, audit log and outbox.

mod support;

use podgraph_change::{
    BackendConfig, ChangeLog, MemoryBackend, PipelineConfig, QueryResponse, StorageBackend,
};
use podgraph_core::{Assertion, ChangeRequest, ChangeStatusCode, RdfObject};
use serde_json::json;
use std::sync::Arc;
use support::{default_context, ex, CountingBackend, FailingBackend, Harness};

const ARCHIVED: &str = "http://example.org/archived";

fn bob_request() -> ChangeRequest {
    ChangeRequest::new("pod-1")
        .with_context(json!({"ex": "http://example.org/"}))
        .with_insert(json!({"@id": "ex:1", "ex:name": "Bob"}))
}

#[tokio::test]
async fn literal_insert_commits_one_record() {
    let harness = Harness::new(PipelineConfig::default());
    let mut events = harness.outbox.subscribe();
    let request = bob_request();
    let queued_at = request.queued_at().unwrap();

    let report = harness.pipeline.process(request.clone()).await.unwrap();

    assert_eq!(report.status(), ChangeStatusCode::Committed);
    assert_eq!(report.nr_of_inserts, 1);
    assert_eq!(report.nr_of_deletes, 0);
    assert!(report.error_message.is_none());
    assert_eq!(report.history().len(), 2);
    assert_eq!(report.history()[0].status, ChangeStatusCode::Queued);
    assert_eq!(report.history()[0].timestamp, queued_at);

    let stored = harness.stored("pod-1").await;
    assert_eq!(stored.len(), 1);
    let st = stored[0].statement();
    assert_eq!(st.subject, ex("1"));
    assert_eq!(st.predicate, ex("name"));
    assert_eq!(st.object, RdfObject::Literal("Bob".into()));
    assert_eq!(stored[0].change_request_id(), request.id);

    let logged = harness.log.get("pod-1", &request.id).await.unwrap().unwrap();
    assert_eq!(logged, report);

    let event = events.recv().await.unwrap();
    assert_eq!(event.pod_id, "pod-1");
    assert_eq!(event.report, report);
}

#[tokio::test]
async fn request_deserialized_from_wire_form() {
    let harness = Harness::new(PipelineConfig::default());
    let id = ChangeRequest::new("pod-1").id;
    let request: ChangeRequest = serde_json::from_value(json!({
        "id": id,
        "podId": "pod-1",
        "@context": default_context(),
        "delete": {"@id": "ex:1", "ex:age": {"@value": "41", "@type": "xsd:integer"}},
        "insert": [{"@id": "ex:1", "ex:age": 42}]
    }))
    .unwrap();

    let report = harness.pipeline.process(request).await.unwrap();
    assert_eq!(report.status(), ChangeStatusCode::Committed);
    assert_eq!(report.nr_of_inserts, 1);
    assert_eq!(report.nr_of_deletes, 1);
}

#[tokio::test]
async fn unmet_assertion_never_reaches_storage() {
    let counting = CountingBackend::new(MemoryBackend::new("default"));
    let harness = Harness::with_backends(
        PipelineConfig::default(),
        vec![counting.clone() as Arc<dyn StorageBackend>],
    );
    harness
        .query
        .insert("{ id }", QueryResponse::data(json!({"id": []})));

    let request = bob_request().with_assertion(Assertion::non_empty_result("{ id }"));
    let report = harness.pipeline.process(request).await.unwrap();

    assert_eq!(report.status(), ChangeStatusCode::AssertionFailed);
    assert_eq!(report.nr_of_inserts, 0);
    assert!(report.error_message.is_some());
    assert_eq!(counting.commits(), 0);
    assert!(harness.stored("pod-1").await.is_empty());
}

#[tokio::test]
async fn one_failing_assertion_fails_the_request() {
    let harness = Harness::new(PipelineConfig::default());
    harness
        .query
        .insert("{ a }", QueryResponse::data(json!({"a": [{"id": 1}]})));
    harness
        .query
        .insert("{ b }", QueryResponse::data(json!({"b": [{"id": 2}]})));
    harness
        .query
        .insert("{ c }", QueryResponse::data(json!({"c": []})));

    let request = bob_request()
        .with_assertion(Assertion::non_empty_result("{ a }"))
        .with_assertion(Assertion::empty_result("{ b }"))
        .with_assertion(Assertion::empty_result("{ c }"));
    let report = harness.pipeline.process(request).await.unwrap();

    assert_eq!(report.status(), ChangeStatusCode::AssertionFailed);
    assert!(harness.stored("pod-1").await.is_empty());
}

#[tokio::test]
async fn malformed_assertion_query_is_validation_error() {
    let harness = Harness::new(PipelineConfig::default());
    let request = bob_request().with_assertion(Assertion::empty_result("{ unknown"));
    let report = harness.pipeline.process(request).await.unwrap();
    assert_eq!(report.status(), ChangeStatusCode::ValidationError);
}

fn archive_config() -> PipelineConfig {
    PipelineConfig {
        backends: vec![
            BackendConfig::memory("archive").with_claim_predicate(ARCHIVED),
            BackendConfig::memory("default"),
        ],
        default_backend: Some("default".into()),
        ..PipelineConfig::default()
    }
}

#[tokio::test]
async fn each_record_is_claimed_by_exactly_one_backend() {
    let harness = Harness::new(archive_config());
    let request = ChangeRequest::new("pod-1")
        .with_context(default_context())
        .with_insert(json!([
            {"@id": "ex:old", "ex:name": "Old", "ex:archived": true},
            {"@id": "ex:new", "ex:name": "New"}
        ]));

    let report = harness.pipeline.process(request).await.unwrap();
    assert_eq!(report.status(), ChangeStatusCode::Committed);

    let archived = harness.stored_in("archive", "pod-1").await;
    let default = harness.stored_in("default", "pod-1").await;
    assert_eq!(archived.len(), 2);
    assert!(archived.iter().all(|r| r.statement().subject == ex("old")));
    assert_eq!(default.len(), 1);
    assert_eq!(default[0].statement().subject, ex("new"));
    assert!(archived.iter().all(|r| !default.contains(r)));

    // statistics count stored records, across both backends
    assert_eq!(
        report.statistics().total(),
        (archived.len() + default.len()) as u64
    );
}

#[tokio::test]
async fn duplicate_entries_are_stored_once() {
    let harness = Harness::new(PipelineConfig::default());
    let node = json!({"@id": "ex:1", "ex:name": "Bob"});
    let request = ChangeRequest::new("pod-1")
        .with_context(default_context())
        .with_insert(node.clone())
        .with_insert(node);

    let report = harness.pipeline.process(request).await.unwrap();
    assert_eq!(report.nr_of_inserts, 1);
    assert_eq!(harness.stored("pod-1").await.len(), 1);
}

#[tokio::test]
async fn unclaimed_records_are_dropped_with_partial_coverage() {
    let config = PipelineConfig {
        backends: vec![BackendConfig::memory("archive").with_claim_predicate(ARCHIVED)],
        allow_partial_coverage: true,
        ..PipelineConfig::default()
    };
    let harness = Harness::new(config);
    let request = ChangeRequest::new("pod-1")
        .with_context(default_context())
        .with_insert(json!([
            {"@id": "ex:old", "ex:archived": true},
            {"@id": "ex:new", "ex:name": "New"}
        ]));

    let report = harness.pipeline.process(request).await.unwrap();
    assert_eq!(report.status(), ChangeStatusCode::Committed);
    assert_eq!(report.nr_of_inserts, 1);
    assert_eq!(harness.stored_in("archive", "pod-1").await.len(), 1);
}

#[test]
fn partial_coverage_is_rejected_at_startup() {
    let config = PipelineConfig {
        backends: vec![BackendConfig::memory("archive").with_claim_predicate(ARCHIVED)],
        ..PipelineConfig::default()
    };
    let err = Harness::try_build(config, Default::default(), Vec::new())
        .err()
        .unwrap();
    assert!(err.to_string().contains("does not claim every record"));
}

#[tokio::test]
async fn backend_failure_is_internal_error() {
    let harness = Harness::with_backends(
        PipelineConfig::default(),
        vec![FailingBackend::new("default") as Arc<dyn StorageBackend>],
    );
    let report = harness.pipeline.process(bob_request()).await.unwrap();

    assert_eq!(report.status(), ChangeStatusCode::InternalError);
    assert_eq!(report.nr_of_inserts, 0);
    assert!(report.error_message.unwrap().contains("disk full"));
}

#[tokio::test]
async fn invalid_request_is_reported_and_logged() {
    let harness = Harness::new(PipelineConfig::default());
    let request = bob_request().with_insert(json!("{{template}}"));
    let id = request.id.clone();

    let report = harness.pipeline.process(request).await.unwrap();
    assert_eq!(report.status(), ChangeStatusCode::ValidationError);
    assert!(report.error_message.unwrap().contains("with"));
    assert!(harness.log.get("pod-1", &id).await.unwrap().is_some());
}

#[tokio::test]
async fn rollback_removes_committed_records() {
    let harness = Harness::new(archive_config());
    let request = ChangeRequest::new("pod-1")
        .with_context(default_context())
        .with_insert(json!([
            {"@id": "ex:old", "ex:archived": true},
            {"@id": "ex:new", "ex:name": "New"}
        ]));
    let id = request.id.clone();
    harness.pipeline.process(request).await.unwrap();

    assert_eq!(harness.pipeline.rollback("pod-1", &id).await.unwrap(), 2);
    assert!(harness.stored_in("archive", "pod-1").await.is_empty());
    assert!(harness.stored_in("default", "pod-1").await.is_empty());
}

#[tokio::test]
async fn change_log_lists_reports_in_pages() {
    let harness = Harness::new(PipelineConfig::default());
    let mut ids = Vec::new();
    for i in 0..5 {
        let request = ChangeRequest::new("pod-1")
            .with_context(default_context())
            .with_insert(json!({"@id": format!("ex:{i}"), "ex:n": i}));
        ids.push(request.id.clone());
        harness.pipeline.process(request).await.unwrap();
    }

    let mut listed = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = harness
            .log
            .list("pod-1", cursor.as_deref(), 2)
            .await
            .unwrap();
        listed.extend(page.items.into_iter().map(|r| r.id));
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    assert_eq!(listed, ids);
}

#[test]
fn stages_follow_backend_config() {
    let harness = Harness::new(archive_config());
    assert_eq!(harness.pipeline.default_backend().id(), "default");
    assert!(!harness.pipeline.backend("archive").unwrap().claims_all());
    assert_eq!(
        harness.pipeline.stage_names(),
        vec!["assertions", "materialize", "conformance", "archive", "default"]
    );
}
