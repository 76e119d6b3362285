mod common;

use common::{MockEvaluator, cache};
use flake_cache::api::{self, Response};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

#[tokio::test]
async fn test_evaluate_and_invalidate_responses() {
    let temp_dir = TempDir::new().unwrap();
    let cache = cache(
        temp_dir.path(),
        MockEvaluator::new().with_value("packages.hello", json!({"name": "hello"})),
    );

    let response = api::evaluate(&cache, ".", "packages.hello").await;
    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({"status": "ok", "value": {"kind": "value", "value": {"name": "hello"}}})
    );

    let response = api::invalidate(&cache, ".", Some("packages.hello")).await;
    assert_eq!(response, Response::Ok { value: 1 });

    let response = api::invalidate(&cache, ".", None).await;
    assert_eq!(response, Response::Ok { value: 0 });
}

#[tokio::test]
async fn test_error_responses_carry_kind_and_stderr() {
    let temp_dir = TempDir::new().unwrap();
    let cache = cache(temp_dir.path(), MockEvaluator::new());

    let Response::Error {
        kind,
        message,
        stderr,
    } = api::evaluate(&cache, ".", "packages.missing").await
    else {
        panic!("expected an error response");
    };
    assert_eq!(kind, "evaluation");
    let stderr = stderr.unwrap();
    assert!(stderr.contains("does not provide attribute"));
    assert!(!message.contains(&stderr));

    let response = api::invalidate(&cache, ".", Some("{unbalanced")).await;
    let value = serde_json::to_value(&response).unwrap();
    assert_eq!(value["status"], "error");
    assert_eq!(value["kind"], "malformed-selector");
}
