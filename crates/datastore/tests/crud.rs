//! End-to-end CRUD / batch coverage against an in-process mock server.

use std::sync::Arc;

use datastore::{Client, ClientConfig, Entity, Identifier, Key, MutationOp, StaticTokenSource, StoreEntity};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;

const PROJECT: &str = "test-project";

/// Builds the server JSON key shape directly from a [`Key`]'s public path,
/// without reaching into the crate's private wire module.
fn key_json(key: &Key) -> serde_json::Value {
    let path: Vec<serde_json::Value> = key
        .path()
        .iter()
        .map(|elem| match &elem.id {
            Identifier::Name(name) => json!({"kind": elem.kind, "name": name}),
            Identifier::Id(id) => json!({"kind": elem.kind, "id": id.to_string()}),
            Identifier::Incomplete => json!({"kind": elem.kind}),
        })
        .collect();
    let mut obj = json!({"path": path});
    if let Some(ns) = key.namespace() {
        obj["partitionId"] = json!({"namespaceId": ns});
    }
    obj
}

#[derive(Debug, Clone, PartialEq, Default, StoreEntity)]
struct Widget {
    name: String,
    count: i64,
}

async fn client_for(server: &MockServer) -> Client {
    common::init_tracing();
    let config = ClientConfig::new(Arc::new(StaticTokenSource::new("tok", PROJECT)))
        .with_endpoint(Url::parse(&server.uri()).unwrap());
    Client::new(config).unwrap()
}

fn entity_json(key: &Key, name: &str, count: i64) -> serde_json::Value {
    json!({
        "key": key_json(key),
        "properties": {
            "name": {"stringValue": name},
            "count": {"integerValue": count.to_string()},
        }
    })
}

#[tokio::test]
async fn get_decodes_a_found_entity() {
    let server = MockServer::start().await;
    let key = Key::name("Widget", "w1", None);

    Mock::given(method("POST"))
        .and(path(format!("/projects/{PROJECT}:lookup")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "found": [{"entity": entity_json(&key, "gadget", 3)}],
            "missing": [],
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let mut dst = Widget::default();
    client
        .get(&key, &mut dst, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(dst, Widget { name: "gadget".to_string(), count: 3 });
}

#[tokio::test]
async fn get_of_a_missing_key_surfaces_no_such_entity() {
    let server = MockServer::start().await;
    let key = Key::name("Widget", "missing", None);

    Mock::given(method("POST"))
        .and(path(format!("/projects/{PROJECT}:lookup")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "found": [],
            "missing": [{"entity": {"key": key_json(&key)}}],
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let mut dst = Widget::default();
    let err = client
        .get(&key, &mut dst, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, datastore::Error::NoSuchEntity));
}

#[tokio::test]
async fn get_multi_reports_a_per_element_multierror() {
    let server = MockServer::start().await;
    let k0 = Key::name("Widget", "a", None);
    let k1 = Key::name("Widget", "b", None);
    let k2 = Key::name("Widget", "c", None);

    Mock::given(method("POST"))
        .and(path(format!("/projects/{PROJECT}:lookup")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "found": [{"entity": entity_json(&k0, "only-one", 1)}],
            "missing": [
                {"entity": {"key": key_json(&k1)}},
                {"entity": {"key": key_json(&k2)}},
            ],
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let mut dsts = [Widget::default(), Widget::default(), Widget::default()];
    let err = client
        .get_multi(&[k0, k1, k2], &mut dsts, &CancellationToken::new())
        .await
        .unwrap_err();

    let datastore::Error::Multi(multi) = err else {
        panic!("expected a MultiError, got {err:?}");
    };
    assert!(multi.get(0).is_none());
    assert!(matches!(multi.get(1), Some(datastore::Error::NoSuchEntity)));
    assert!(matches!(multi.get(2), Some(datastore::Error::NoSuchEntity)));
    assert_eq!(dsts[0].name, "only-one");
    assert_eq!(dsts[1], Widget::default());
    assert_eq!(dsts[2], Widget::default());
}

#[tokio::test]
async fn put_returns_the_complete_key() {
    let server = MockServer::start().await;
    let key = Key::name("Widget", "w1", None);

    Mock::given(method("POST"))
        .and(path(format!("/projects/{PROJECT}:commit")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "mutationResults": [{}],
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let record = Widget { name: "gadget".to_string(), count: 5 };
    let returned = client
        .put(&key, &record, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(returned, key);
}

#[tokio::test]
async fn put_resolves_an_incomplete_key_from_the_commit_response() {
    let server = MockServer::start().await;
    let incomplete = Key::incomplete("Widget", None);
    let assigned = Key::id("Widget", 99, None);

    Mock::given(method("POST"))
        .and(path(format!("/projects/{PROJECT}:commit")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "mutationResults": [{"key": key_json(&assigned)}],
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let record = Widget { name: "gadget".to_string(), count: 1 };
    let returned = client
        .put(&incomplete, &record, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(returned, assigned);
    assert!(returned.is_complete());
}

#[tokio::test]
async fn delete_multi_surfaces_no_error_on_a_clean_batch() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("/projects/{PROJECT}:commit")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "mutationResults": [{}, {}],
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let keys = [Key::name("Widget", "a", None), Key::name("Widget", "b", None)];
    client
        .delete_multi(&keys, &CancellationToken::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn get_of_an_incomplete_key_is_rejected_without_a_network_call() {
    let server = MockServer::start().await;
    // No mock mounted for `:lookup`: an unguarded client would hit this
    // server and get a bare 404 back instead of the InvalidKey asserted below.
    let client = client_for(&server).await;
    let key = Key::incomplete("Widget", None);
    let mut dst = Widget::default();
    let err = client
        .get(&key, &mut dst, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, datastore::Error::InvalidKey { .. }));
}

#[tokio::test]
async fn delete_of_an_incomplete_key_is_rejected_without_a_network_call() {
    let server = MockServer::start().await;
    let client = client_for(&server).await;
    let key = Key::incomplete("Widget", None);
    let err = client
        .delete(&key, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, datastore::Error::InvalidKey { .. }));
}

#[tokio::test]
async fn get_multi_reports_invalid_key_per_element_alongside_found_entities() {
    let server = MockServer::start().await;
    let k0 = Key::name("Widget", "a", None);
    let incomplete = Key::incomplete("Widget", None);

    Mock::given(method("POST"))
        .and(path(format!("/projects/{PROJECT}:lookup")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "found": [{"entity": entity_json(&k0, "only-valid", 1)}],
            "missing": [],
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let mut dsts = [Widget::default(), Widget::default()];
    let err = client
        .get_multi(&[k0, incomplete], &mut dsts, &CancellationToken::new())
        .await
        .unwrap_err();

    let datastore::Error::Multi(multi) = err else {
        panic!("expected a MultiError, got {err:?}");
    };
    assert!(multi.get(0).is_none());
    assert!(matches!(multi.get(1), Some(datastore::Error::InvalidKey { .. })));
    assert_eq!(dsts[0].name, "only-valid");
}

#[tokio::test]
async fn delete_multi_reports_invalid_key_per_element_alongside_a_clean_delete() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("/projects/{PROJECT}:commit")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "mutationResults": [{}],
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let keys = [Key::name("Widget", "a", None), Key::incomplete("Widget", None)];
    let err = client
        .delete_multi(&keys, &CancellationToken::new())
        .await
        .unwrap_err();

    let datastore::Error::Multi(multi) = err else {
        panic!("expected a MultiError, got {err:?}");
    };
    assert!(multi.get(0).is_none());
    assert!(matches!(multi.get(1), Some(datastore::Error::InvalidKey { .. })));
}

#[tokio::test]
async fn mutate_applies_a_heterogeneous_batch() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("/projects/{PROJECT}:commit")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "mutationResults": [{}, {}],
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let insert_entity = Entity::empty().with_key(Key::name("Widget", "new", None));
    let delete_key = Key::name("Widget", "old", None);
    let ops = vec![
        MutationOp::Insert(insert_entity),
        MutationOp::Delete(delete_key),
    ];
    let keys = client.mutate(&ops, &CancellationToken::new()).await.unwrap();
    assert_eq!(keys.len(), 2);
}
