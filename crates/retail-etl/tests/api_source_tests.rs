//! Integration tests for the paginated API reader against a mock HTTP server

use retail_common::types::RawValue;
use retail_common::ErrorKind;
use retail_etl::retry::RetryPolicy;
use retail_etl::sources::{ApiReader, ApiSource, Pagination, SourceReader};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Test Helpers
// ============================================================================

fn paged_source(base_url: &str) -> ApiSource {
    ApiSource {
        base_url: base_url.to_string(),
        api_key: Some("test-key".to_string()),
        api_key_header: "x-api-key".to_string(),
        timeout_secs: 5,
        pagination: Pagination::Paged {
            path: "orders".to_string(),
            page_param: "page".to_string(),
            first_page: 1,
            items_field: Some("items".to_string()),
            has_more_field: None,
            max_pages: 100,
        },
    }
}

fn order_page(page: u32, size: u32) -> serde_json::Value {
    let items: Vec<_> = (0..size)
        .map(|i| {
            json!({
                "index": (page - 1) * size + i,
                "product_code": format!("R7-{}", (page - 1) * size + i),
                "product_quantity": i % 5 + 1
            })
        })
        .collect();
    json!({ "items": items })
}

async fn mount_page(server: &MockServer, page: u32, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/orders"))
        .and(query_param("page", page.to_string()))
        .and(header("x-api-key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

// ============================================================================
// Paged Mode
// ============================================================================

#[tokio::test]
async fn test_paged_reads_until_empty_page_with_retries() {
    let server = MockServer::start().await;

    for page in 1..=3 {
        mount_page(&server, page, order_page(page, 50)).await;
    }
    mount_page(&server, 4, json!({ "items": [] })).await;

    // Page 2 is unavailable twice before it recovers
    Mock::given(method("GET"))
        .and(path("/orders"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;

    let reader = ApiReader::new(paged_source(&server.uri()), RetryPolicy::immediate(4)).unwrap();
    let dataset = reader.read().await.unwrap();

    assert_eq!(dataset.len(), 150);
    assert_eq!(dataset.meta.retries, 2);
    assert_eq!(dataset.columns(), ["index", "product_code", "product_quantity"]);
    assert_eq!(
        dataset.records()[149].get("product_code"),
        Some(&RawValue::Text("R7-149".to_string()))
    );
}

#[tokio::test]
async fn test_paged_retries_exhausted_fails_extraction() {
    let server = MockServer::start().await;

    mount_page(&server, 1, order_page(1, 10)).await;
    Mock::given(method("GET"))
        .and(path("/orders"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let reader = ApiReader::new(paged_source(&server.uri()), RetryPolicy::immediate(3)).unwrap();
    let err = reader.read().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SourceUnavailable);
    // Exactly max_attempts requests for the failing page
    let requests = server.received_requests().await.unwrap();
    let page_two = requests
        .iter()
        .filter(|r| r.url.query() == Some("page=2"))
        .count();
    assert_eq!(page_two, 3);
}

#[tokio::test]
async fn test_paged_client_error_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let reader = ApiReader::new(paged_source(&server.uri()), RetryPolicy::immediate(5)).unwrap();
    let err = reader.read().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SourceUnavailable);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_paged_stops_on_has_more_false() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orders"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"product_code": "A1-1"}, {"product_code": "A1-2"}],
            "has_more": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut source = paged_source(&server.uri());
    source.pagination = Pagination::Paged {
        path: "orders".to_string(),
        page_param: "page".to_string(),
        first_page: 1,
        items_field: Some("items".to_string()),
        has_more_field: Some("has_more".to_string()),
        max_pages: 100,
    };

    let dataset = ApiReader::new(source, RetryPolicy::immediate(1))
        .unwrap()
        .read()
        .await
        .unwrap();
    assert_eq!(dataset.len(), 2);
}

#[tokio::test]
async fn test_paged_invalid_json_is_decode_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let reader = ApiReader::new(paged_source(&server.uri()), RetryPolicy::immediate(2)).unwrap();
    let err = reader.read().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DecodeError);
}

// ============================================================================
// Counted Mode
// ============================================================================

#[tokio::test]
async fn test_counted_fetches_every_index_in_order() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/prod/number_stores"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"statusCode": 200, "number_stores": 5})),
        )
        .mount(&server)
        .await;

    for index in 0..5 {
        Mock::given(method("GET"))
            .and(path(format!("/prod/store_details/{}", index)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "index": index,
                "store_code": format!("ST-{}", index),
                "staff_numbers": "12"
            })))
            .mount(&server)
            .await;
    }

    let source = ApiSource {
        base_url: format!("{}/prod", server.uri()),
        api_key: None,
        api_key_header: "x-api-key".to_string(),
        timeout_secs: 5,
        pagination: Pagination::Counted {
            count_path: "number_stores".to_string(),
            count_field: "number_stores".to_string(),
            item_path: "store_details/{index}".to_string(),
            concurrency: 3,
        },
    };

    let dataset = ApiReader::new(source, RetryPolicy::immediate(2))
        .unwrap()
        .read()
        .await
        .unwrap();

    assert_eq!(dataset.len(), 5);
    let codes: Vec<_> = dataset
        .records()
        .iter()
        .map(|r| r.get("store_code").and_then(RawValue::as_text).unwrap().into_owned())
        .collect();
    assert_eq!(codes, ["ST-0", "ST-1", "ST-2", "ST-3", "ST-4"]);
}

#[tokio::test]
async fn test_counted_missing_count_field_is_decode_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/number_stores"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"stores": 5})))
        .mount(&server)
        .await;

    let source = ApiSource {
        base_url: server.uri(),
        api_key: None,
        api_key_header: "x-api-key".to_string(),
        timeout_secs: 5,
        pagination: Pagination::Counted {
            count_path: "number_stores".to_string(),
            count_field: "number_stores".to_string(),
            item_path: "store_details/{index}".to_string(),
            concurrency: 2,
        },
    };

    let err = ApiReader::new(source, RetryPolicy::immediate(1))
        .unwrap()
        .read()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DecodeError);
}

#[tokio::test]
async fn test_paged_page_limit_without_end_signal_fails() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(order_page(1, 5)))
        .mount(&server)
        .await;

    let mut source = paged_source(&server.uri());
    source.pagination = Pagination::Paged {
        path: "orders".to_string(),
        page_param: "page".to_string(),
        first_page: 1,
        items_field: Some("items".to_string()),
        has_more_field: None,
        max_pages: 3,
    };

    let err = ApiReader::new(source, RetryPolicy::immediate(1))
        .unwrap()
        .read()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DecodeError);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}
