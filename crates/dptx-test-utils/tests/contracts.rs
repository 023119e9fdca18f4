//! Contract tests for the stub configuration service.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use dptx_test_utils::{
    Endpoint, ScriptedResponse, StubDataPlane, TransactionStatus, VersionShape,
    assert_endpoint_sequence,
};
use serde_json::Value;

async fn body_json(response: reqwest::Response) -> Value {
    response.json().await.expect("json body")
}

#[tokio::test]
async fn version_shapes_encode_the_same_number() {
    let stub = StubDataPlane::start_at(42).await.expect("stub");
    let client = reqwest::Client::new();
    let url = format!("{}/configuration/version", stub.base_url());

    let mut bodies = Vec::new();
    for shape in [
        VersionShape::Bare,
        VersionShape::Integer,
        VersionShape::Float,
        VersionShape::Text,
    ] {
        stub.set_version_shape(shape);
        let text = client
            .get(&url)
            .send()
            .await
            .expect("send")
            .text()
            .await
            .expect("text");
        bodies.push(text);
    }

    assert_eq!(
        bodies,
        vec![
            "42".to_string(),
            r#"{"version":42}"#.to_string(),
            r#"{"version":42.0}"#.to_string(),
            r#"{"version":"42"}"#.to_string(),
        ]
    );
}

#[tokio::test]
async fn stale_create_conflicts_and_commit_advances_version() {
    let stub = StubDataPlane::start_at(3).await.expect("stub");
    let client = reqwest::Client::new();
    let base = stub.base_url().to_string();

    let stale = client
        .post(format!("{base}/transactions?version=2"))
        .send()
        .await
        .expect("send");
    assert_eq!(stale.status().as_u16(), 409);
    assert_eq!(body_json(stale).await["message"], "version mismatch");

    let created = client
        .post(format!("{base}/transactions?version=3"))
        .send()
        .await
        .expect("send");
    assert_eq!(created.status().as_u16(), 201);
    let id = body_json(created).await["id"]
        .as_str()
        .expect("id")
        .to_string();

    let staged = client
        .put(format!("{base}/services/backends/web?transaction_id={id}"))
        .json(&serde_json::json!({ "name": "web" }))
        .send()
        .await
        .expect("send");
    assert_eq!(staged.status().as_u16(), 202);

    let committed = client
        .put(format!("{base}/transactions/{id}"))
        .send()
        .await
        .expect("send");
    assert_eq!(committed.status().as_u16(), 202);
    assert_eq!(stub.version(), 4);
    assert_eq!(stub.transaction_status(&id), Some(TransactionStatus::Committed));
    assert_eq!(stub.committed_writes().len(), 1);

    assert_endpoint_sequence(
        &stub.requests(),
        &[
            Endpoint::Create,
            Endpoint::Create,
            Endpoint::Stage,
            Endpoint::Commit,
        ],
    );
}

#[tokio::test]
async fn outdated_commit_and_unknown_delete() {
    let stub = StubDataPlane::start().await.expect("stub");
    let client = reqwest::Client::new();
    let base = stub.base_url().to_string();

    let created = client
        .post(format!("{base}/transactions?version=1"))
        .send()
        .await
        .expect("send");
    let id = body_json(created).await["id"]
        .as_str()
        .expect("id")
        .to_string();
    stub.bump_version();

    let outdated = client
        .put(format!("{base}/transactions/{id}"))
        .send()
        .await
        .expect("send");
    assert_eq!(outdated.status().as_u16(), 406);
    let message = body_json(outdated).await["message"]
        .as_str()
        .expect("message")
        .to_string();
    assert!(message.contains("is outdated and cannot be committed"));

    let deleted = client
        .delete(format!("{base}/transactions/{id}"))
        .send()
        .await
        .expect("send");
    assert_eq!(deleted.status().as_u16(), 204);

    let again = client
        .delete(format!("{base}/transactions/{id}"))
        .send()
        .await
        .expect("send");
    assert_eq!(again.status().as_u16(), 404);
}

#[tokio::test]
async fn scripted_responses_fire_once() {
    let stub = StubDataPlane::start().await.expect("stub");
    stub.script(Endpoint::Version, ScriptedResponse::raw(503, "unavailable"));
    let url = format!("{}/configuration/version", stub.base_url());
    let client = reqwest::Client::new();

    let first = client.get(&url).send().await.expect("send");
    let second = client.get(&url).send().await.expect("send");
    assert_eq!(first.status().as_u16(), 503);
    assert_eq!(second.status().as_u16(), 200);
    assert_eq!(stub.count(Endpoint::Version), 2);
}

#[tokio::test]
async fn writes_without_transaction_are_rejected() {
    let stub = StubDataPlane::start().await.expect("stub");
    let response = reqwest::Client::new()
        .post(format!("{}/services/backends", stub.base_url()))
        .json(&serde_json::json!({ "name": "web" }))
        .send()
        .await
        .expect("send");
    assert_eq!(response.status().as_u16(), 400);
    assert_eq!(
        body_json(response).await["message"],
        "version or transaction not specified"
    );
}
