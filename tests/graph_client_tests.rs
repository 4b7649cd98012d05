//! Integration tests for Graph client paging and retry logic
//!
//! Uses wiremock to simulate Graph responses and verify nextLink paging,
//! rate limit handling, and error propagation.

use m365report::error::ReportError;
use m365report::graph::query::CollectionQuery;
use m365report::graph::{GraphClient, RetryPolicy};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Deserialize)]
struct Item {
    id: u32,
}

/// Client pointed at the mock server with short backoffs
fn client_for(server: &MockServer) -> GraphClient {
    GraphClient::with_base_urls(
        "test-token".into(),
        &format!("{}/v1.0", server.uri()),
        &format!("{}/beta", server.uri()),
    )
    .with_retry_policy(RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
    })
}

fn items(range: std::ops::Range<u32>) -> Vec<serde_json::Value> {
    range.map(|id| json!({ "id": id })).collect()
}

/// 2500 records in pages of 999 arrive complete and in order
#[tokio::test]
async fn test_paging_follows_next_link_without_gaps() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/widgets"))
        .and(query_param("$top", "999"))
        .and(query_param_is_missing("$skiptoken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": items(0..999),
            "@odata.nextLink": format!("{}/v1.0/widgets?$skiptoken=p2", server.uri()),
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1.0/widgets"))
        .and(query_param("$skiptoken", "p2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": items(999..1998),
            "@odata.nextLink": format!("{}/v1.0/widgets?$skiptoken=p3", server.uri()),
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1.0/widgets"))
        .and(query_param("$skiptoken", "p3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": items(1998..2500),
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let query = CollectionQuery::new("widgets").page_size(999);

    let mut observed = Vec::new();
    let records: Vec<Item> = client
        .get_all_pages_observed(&query, |n| observed.push(n))
        .await
        .unwrap();

    assert_eq!(records.len(), 2500);
    assert!(records.iter().enumerate().all(|(i, r)| r.id == i as u32));
    assert_eq!(observed, vec![999, 1998, 2500]);
}

/// A page with no `value` contributes nothing
#[tokio::test]
async fn test_empty_collection() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/widgets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let records: Vec<Item> = client_for(&server)
        .get_all_pages(&CollectionQuery::new("widgets"))
        .await
        .unwrap();
    assert!(records.is_empty());
}

/// 429 with Retry-After is retried, then the request succeeds
#[tokio::test]
async fn test_rate_limit_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/me"))
        .respond_with(
            ResponseTemplate::new(429)
                .append_header("Retry-After", "0")
                .set_body_string("Rate limited"),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1.0/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 7 })))
        .expect(1)
        .mount(&server)
        .await;

    let item: Item = client_for(&server).get("me").await.unwrap();
    assert_eq!(item.id, 7);
}

/// Server errors are retried up to the attempt limit, then surface
#[tokio::test]
async fn test_server_error_exhausts_retries() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/me"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .expect(3)
        .mount(&server)
        .await;

    let result: Result<Item, _> = client_for(&server).get("me").await;
    match result {
        Err(ReportError::GraphApiError(message)) => assert!(message.starts_with("HTTP 503")),
        other => panic!("expected GraphApiError, got {:?}", other),
    }
}

/// Client errors are not retried and 404 is recognizable
#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/users/ghost@contoso.com"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {
                "code": "Request_ResourceNotFound",
                "message": "Resource 'ghost@contoso.com' does not exist."
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server)
        .get::<Item>("users/ghost@contoso.com")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().contains("Request_ResourceNotFound"));
}

/// Every request carries the bearer token; beta queries hit the beta root
#[tokio::test]
async fn test_bearer_token_and_beta_root() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/beta/widgets"))
        .and(header("Authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": items(0..2) })))
        .expect(1)
        .mount(&server)
        .await;

    let records: Vec<Item> = client_for(&server)
        .get_all_pages(&CollectionQuery::new("widgets").beta())
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
}

/// Writes share the retry loop and resend their body
#[tokio::test]
async fn test_post_is_retried_with_body() {
    let server = MockServer::start().await;
    let body = json!({ "@odata.id": format!("{}/v1.0/directoryObjects/u1", server.uri()) });

    Mock::given(method("POST"))
        .and(path("/v1.0/groups/g1/members/$ref"))
        .and(body_json(&body))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1.0/groups/g1/members/$ref"))
        .and(body_json(&body))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert_eq!(client.directory_object_ref("u1"), body["@odata.id"]);
    client
        .post_no_content("groups/g1/members/$ref", &body)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_delete_surfaces_client_error() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/v1.0/groups/g1/members/u1/$ref"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "code": "Request_ResourceNotFound", "message": "member not found" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server)
        .delete("groups/g1/members/u1/$ref")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}
