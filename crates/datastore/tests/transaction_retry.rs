//! Conflict-retry semantics of `run_in_transaction` against a mock server:
//! aborted commits are retried with a fresh transaction, the closure is
//! re-invoked each attempt, and exhausted retries surface a wrapped error.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use datastore::{
    Client, ClientConfig, Entity, Error, Key, MutationOp, StaticTokenSource, TransactionOptions,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;

const PROJECT: &str = "test-project";

async fn client_for(server: &MockServer) -> Client {
    common::init_tracing();
    let config = ClientConfig::new(Arc::new(StaticTokenSource::new("tok", PROJECT)))
        .with_endpoint(Url::parse(&server.uri()).unwrap());
    Client::new(config).unwrap()
}

async fn mount_begin_transaction(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(format!("/projects/{PROJECT}:beginTransaction")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"transaction": "txn-1"})))
        .mount(server)
        .await;
}

#[tokio::test]
async fn retries_on_aborted_commit_and_succeeds_on_the_third_attempt() {
    let server = MockServer::start().await;
    mount_begin_transaction(&server).await;

    let commit_attempts = Arc::new(AtomicUsize::new(0));
    let counter = commit_attempts.clone();
    Mock::given(method("POST"))
        .and(path(format!("/projects/{PROJECT}:commit")))
        .respond_with(move |_req: &wiremock::Request| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                ResponseTemplate::new(409).set_body_json(json!({"error": "ABORTED"}))
            } else {
                ResponseTemplate::new(200).set_body_json(json!({"mutationResults": [{}]}))
            }
        })
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let closure_calls = Arc::new(AtomicUsize::new(0));
    let calls = closure_calls.clone();

    let result = client
        .run_in_transaction(TransactionOptions::default(), &CancellationToken::new(), move |txn| {
            calls.fetch_add(1, Ordering::SeqCst);
            let entity = Entity::empty().with_key(Key::name("Widget", "w1", None));
            let outcome = txn.mutate(MutationOp::Upsert(entity));
            async move { outcome.map(|_| ()) }
        })
        .await;

    assert!(result.is_ok());
    assert_eq!(closure_calls.load(Ordering::SeqCst), 3);
    assert_eq!(commit_attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn a_closure_error_is_never_retried_and_rolls_back() {
    let server = MockServer::start().await;
    mount_begin_transaction(&server).await;

    Mock::given(method("POST"))
        .and(path(format!("/projects/{PROJECT}:rollback")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let closure_calls = Arc::new(AtomicUsize::new(0));
    let calls = closure_calls.clone();

    let result: Result<(), Error> = client
        .run_in_transaction(TransactionOptions::default(), &CancellationToken::new(), move |_txn| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(Error::protocol("application logic failed")) }
        })
        .await;

    assert!(result.is_err());
    assert_eq!(closure_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retries_exhausted_reports_the_attempt_count_and_wraps_the_conflict() {
    let server = MockServer::start().await;
    mount_begin_transaction(&server).await;

    Mock::given(method("POST"))
        .and(path(format!("/projects/{PROJECT}:commit")))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({"error": "ABORTED"})))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let opts = TransactionOptions {
        max_attempts: 3,
        ..TransactionOptions::default()
    };

    let result: Result<(), Error> = client
        .run_in_transaction(opts, &CancellationToken::new(), move |txn| {
            let entity = Entity::empty().with_key(Key::name("Widget", "w1", None));
            let outcome = txn.mutate(MutationOp::Upsert(entity));
            async move { outcome.map(|_| ()) }
        })
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, Error::TransactionRetriesExhausted { attempts: 3, .. }));
    assert!(err.to_string().contains("failed after 3 attempts"));
}
