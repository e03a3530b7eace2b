//! Pagination and cursor behaviour of `QueryIterator` against a mock
//! `runQuery` endpoint.

use std::sync::Arc;

use datastore::{Client, ClientConfig, Error, Key, Query, StaticTokenSource, StoreEntity};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;

const PROJECT: &str = "test-project";

#[derive(Debug, Clone, PartialEq, Default, StoreEntity)]
struct Widget {
    name: String,
}

async fn client_for(server: &MockServer) -> Client {
    common::init_tracing();
    let config = ClientConfig::new(Arc::new(StaticTokenSource::new("tok", PROJECT)))
        .with_endpoint(Url::parse(&server.uri()).unwrap());
    Client::new(config).unwrap()
}

fn key_json(kind: &str, name: &str) -> serde_json::Value {
    json!({"path": [{"kind": kind, "name": name}]})
}

fn entity_result(kind: &str, name: &str) -> serde_json::Value {
    json!({
        "entity": {
            "key": key_json(kind, name),
            "properties": {"name": {"stringValue": name}},
        },
    })
}

#[tokio::test]
async fn iterates_across_two_batches_until_no_more_results() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("/projects/{PROJECT}:runQuery")))
        .respond_with(move |req: &wiremock::Request| {
            let body: serde_json::Value = req.body_json().unwrap();
            let has_cursor = body["query"].get("startCursor").is_some();
            if !has_cursor {
                ResponseTemplate::new(200).set_body_json(json!({
                    "batch": {
                        "entityResults": [entity_result("Widget", "a"), entity_result("Widget", "b")],
                        "endCursor": "cursor-1",
                        "moreResults": "NOT_FINISHED",
                    }
                }))
            } else {
                ResponseTemplate::new(200).set_body_json(json!({
                    "batch": {
                        "entityResults": [entity_result("Widget", "c")],
                        "endCursor": "cursor-2",
                        "moreResults": "NO_MORE_RESULTS",
                    }
                }))
            }
        })
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let mut iter = client.run(Query::new("Widget"));
    let cancellation = CancellationToken::new();

    let mut names = Vec::new();
    loop {
        let mut dst = Widget::default();
        match iter.next(Some(&mut dst), &cancellation).await {
            Ok(_key) => names.push(dst.name),
            Err(Error::Done) => break,
            Err(e) => panic!("unexpected error: {e:?}"),
        }
    }

    assert_eq!(names, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn cursor_fails_before_any_result_is_delivered() {
    let server = MockServer::start().await;
    let client = client_for(&server).await;
    let iter = client.run(Query::new("Widget"));
    assert!(iter.cursor().is_err());
}

#[tokio::test]
async fn cursor_resumes_after_the_last_delivered_entity() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("/projects/{PROJECT}:runQuery")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "batch": {
                "entityResults": [entity_result("Widget", "only")],
                "endCursor": "cursor-final",
                "moreResults": "NO_MORE_RESULTS",
            }
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let mut iter = client.run(Query::new("Widget"));
    let cancellation = CancellationToken::new();

    let mut dst = Widget::default();
    iter.next(Some(&mut dst), &cancellation).await.unwrap();
    assert_eq!(iter.cursor().unwrap(), "cursor-final");
}

#[tokio::test]
async fn keys_only_query_delivers_keys_with_no_destination() {
    let server = MockServer::start().await;
    let key = Key::name("Widget", "k1", None);

    Mock::given(method("POST"))
        .and(path(format!("/projects/{PROJECT}:runQuery")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "batch": {
                "entityResults": [{"entity": {"key": key_json("Widget", "k1")}}],
                "endCursor": "cursor-1",
                "moreResults": "NO_MORE_RESULTS",
            }
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let mut iter = client.run(Query::new("Widget").keys_only());
    let returned = iter
        .next::<Widget>(None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(returned, key);
}
