//! Integration tests against a local HTTP server.
//!
//! Exercises the real reqwest transport end to end: link-following
//! pagination, paged APIs with bearer auth, remote files, timeouts, and
//! HTTP error statuses.

use axum::Router;
use axum::extract::Query;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use govingest_connectors::{ConnectorFactory, ConnectorSettings, ExtractParams, extract_and_close};
use govingest_core::contract::SourceContract;
use govingest_core::error::{ConnectionError, IngestError};
use govingest_core::record::Value;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn factory() -> ConnectorFactory {
    let mut settings = ConnectorSettings::default();
    settings.pagination.web_delay_ms = 0;
    settings.pagination.api_delay_ms = 0;
    settings.http.timeout_secs = 1;
    settings.http.file_timeout_secs = 1;
    ConnectorFactory::with_settings(settings)
}

async fn reestr(Query(query): Query<HashMap<String, String>>) -> Html<String> {
    let page: u32 = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let (rows, next) = match page {
        1 => (
            vec![("Acme", "7701234567", "Да"), ("Globex", "7702", "нет"), ("Initech", "-", "да")],
            Some("/reestr?page=2"),
        ),
        _ => (vec![("Umbrella", "7703", "✓"), ("Hooli", "7704", "")], None),
    };
    let mut html = String::from(
        "<html><body><table class=\"solutions\"><tr><th>Name</th><th>INN</th><th>Domestic</th></tr>",
    );
    for (name, inn, domestic) in rows {
        html.push_str(&format!("<tr><td>{name}</td><td>{inn}</td><td>{domestic}</td></tr>"));
    }
    html.push_str("</table>");
    if let Some(next) = next {
        html.push_str(&format!("<a class=\"next-page\" href=\"{next}\">»</a>"));
    }
    html.push_str("</body></html>");
    Html(html)
}

async fn indicators(
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        == Some("Bearer s3cret");
    if !authorized {
        return (StatusCode::UNAUTHORIZED, axum::Json(json!({"error": "unauthorized"})));
    }
    let page: usize = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let limit: usize = query.get("limit").and_then(|p| p.parse().ok()).unwrap_or(1000);
    let total = 5usize;
    let start = (page - 1) * limit;
    let items: Vec<_> = (start..total.min(start + limit))
        .map(|i| json!({"id": i + 1, "region": {"code": format!("{:02}", i + 1)}}))
        .collect();
    let total_pages = total.div_ceil(limit);
    (
        StatusCode::OK,
        axum::Json(json!({
            "data": items,
            "pagination": {"current_page": page, "total_pages": total_pages}
        })),
    )
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_secs(3)).await;
    "too late"
}

fn router() -> Router {
    Router::new()
        .route("/reestr", get(reestr))
        .route("/api/indicators", get(indicators))
        .route("/files/export.csv", get(|| async { "name;amount\nAcme;10,5\nGlobex;abc\n" }))
        .route("/slow", get(slow))
        .route("/broken", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
}

#[tokio::test]
async fn test_web_table_follows_links_over_http() {
    let base = spawn(router()).await;
    let yaml = format!(
        r#"
source_name: reestr_po
type: web_table
endpoint: {base}/reestr
parsing:
  selector: "table.solutions tr"
  data_extraction:
    name: "td:nth-child(1)"
    vendor_inn: "td:nth-child(2)"
    is_domestic: "td:nth-child(3)"
  pagination:
    type: next_page_link
schema:
  - name: name
    required: true
  - name: vendor_inn
    required: true
"#
    );
    let contract = SourceContract::from_yaml_str(&yaml).unwrap();
    let mut connector = factory().build(contract).unwrap();
    let result = extract_and_close(connector.as_mut(), &ExtractParams::default())
        .await
        .unwrap();

    assert_eq!(result.row_count(), 5);
    assert_eq!(result.stats().pages_fetched, 2);
    assert_eq!(result.rows()[0].get("vendor_inn"), Some(&Value::from("7701234567")));
    assert_eq!(result.rows()[2].get("vendor_inn"), Some(&Value::Null));
    assert_eq!(result.rows()[3].get("is_domestic"), Some(&Value::Bool(true)));
    assert_eq!(result.rows()[4].get("is_domestic"), Some(&Value::Null));
    // One null in a required field produces a warning, not an error.
    assert_eq!(result.stats().null_warnings.len(), 1);
    assert!(connector.is_closed());
}

#[tokio::test]
async fn test_paged_api_with_bearer_auth() {
    let base = spawn(router()).await;
    let yaml = format!(
        r#"
source_name: fedstat
type: paged_api
endpoint: {base}/api/indicators
parsing:
  page_size: 2
  data_mapping:
    region.code: region_code
schema:
  - name: id
    required: true
auth:
  type: bearer
  token: s3cret
"#
    );
    let contract = SourceContract::from_yaml_str(&yaml).unwrap();
    let mut connector = factory().build(contract).unwrap();
    let result = extract_and_close(connector.as_mut(), &ExtractParams::default())
        .await
        .unwrap();
    assert_eq!(result.row_count(), 5);
    assert_eq!(result.stats().pages_fetched, 3);
    assert_eq!(result.rows()[4].get("region_code"), Some(&Value::from("05")));
}

#[tokio::test]
async fn test_paged_api_without_credentials_is_rejected() {
    let base = spawn(router()).await;
    let yaml = format!("source_name: fedstat\ntype: paged_api\nendpoint: {base}/api/indicators\n");
    let contract = SourceContract::from_yaml_str(&yaml).unwrap();
    let mut connector = factory().build(contract).unwrap();
    let err = extract_and_close(connector.as_mut(), &ExtractParams::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        IngestError::Connection(ConnectionError::Status { status: 401, .. })
    ));
}

#[tokio::test]
async fn test_remote_csv_download() {
    let base = spawn(router()).await;
    let yaml = format!(
        "source_name: eis\ntype: delimited\nendpoint: {base}/files/export.csv\nparsing:\n  delimiter: \";\"\n"
    );
    let contract = SourceContract::from_yaml_str(&yaml).unwrap();
    let mut connector = factory().build(contract).unwrap();
    let result = extract_and_close(connector.as_mut(), &ExtractParams::default())
        .await
        .unwrap();
    assert_eq!(result.rows()[0].get("amount"), Some(&Value::Number(10.5)));
    assert_eq!(result.rows()[1].get("amount"), Some(&Value::from("abc")));
    assert!(result.metadata().file_hash.is_some());
}

#[tokio::test]
async fn test_timeout_is_connection_error() {
    let base = spawn(router()).await;
    let yaml = format!(
        r#"
source_name: slow_source
type: web_table
endpoint: {base}/slow
parsing:
  data_extraction:
    name: "td:nth-child(1)"
"#
    );
    let contract = SourceContract::from_yaml_str(&yaml).unwrap();
    let mut connector = factory().build(contract).unwrap();
    let err = extract_and_close(connector.as_mut(), &ExtractParams::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        IngestError::Connection(ConnectionError::Timeout { .. })
    ));
    assert!(connector.is_closed());
}

#[tokio::test]
async fn test_server_error_is_connection_error() {
    let base = spawn(router()).await;
    let yaml = format!(
        "source_name: broken\ntype: spreadsheet\nendpoint: {base}/broken\n"
    );
    let contract = SourceContract::from_yaml_str(&yaml).unwrap();
    let mut connector = factory().build(contract).unwrap();
    let err = extract_and_close(connector.as_mut(), &ExtractParams::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        IngestError::Connection(ConnectionError::Status { status: 500, .. })
    ));
}
