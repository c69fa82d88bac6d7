//! BigQuery client against a mocked REST API.

use std::sync::Arc;

use quati::auth::StaticToken;
use quati::warehouse::{BigQuery, Warehouse, fetch_query, sync_table_to_schema};
use quati::{Cell, Table};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn warehouse(server: &MockServer) -> BigQuery {
    BigQuery::new(Arc::new(StaticToken::new("test-token")), "mkt").with_endpoint(&server.uri())
}

#[tokio::test]
async fn test_table_schema() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects/mkt/datasets/ads/tables/daily"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "mkt:ads.daily",
            "schema": { "fields": [
                { "name": "date", "type": "DATE", "mode": "NULLABLE" },
                { "name": "clicks", "type": "INTEGER", "mode": "NULLABLE" }
            ]}
        })))
        .mount(&server)
        .await;

    let fields = warehouse(&server)
        .table_schema("ads.daily")
        .await
        .expect("schema loads");
    let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["date", "clicks"]);
    assert_eq!(fields[1].field_type, "INTEGER");
}

#[tokio::test]
async fn test_run_query_follows_page_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/projects/mkt/queries"))
        .and(body_partial_json(json!({ "query": "SELECT n FROM t", "useLegacySql": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobComplete": true,
            "jobReference": { "projectId": "mkt", "jobId": "job_1", "location": "US" },
            "schema": { "fields": [{ "name": "n", "type": "INTEGER" }] },
            "rows": [{ "f": [{ "v": "1" }] }],
            "pageToken": "p2"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/projects/mkt/queries/job_1"))
        .and(query_param("pageToken", "p2"))
        .and(query_param("location", "US"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobComplete": true,
            "jobReference": { "projectId": "mkt", "jobId": "job_1", "location": "US" },
            "rows": [{ "f": [{ "v": "2" }] }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let table = warehouse(&server)
        .run_query("SELECT n FROM t")
        .await
        .expect("query runs");
    assert_eq!(
        table.column("n").expect("column").values,
        vec![Cell::Int(1), Cell::Int(2)]
    );
}

#[tokio::test]
async fn test_run_query_polls_until_complete() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/projects/mkt/queries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobComplete": false,
            "jobReference": { "projectId": "mkt", "jobId": "job_2" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/projects/mkt/queries/job_2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobComplete": true,
            "jobReference": { "projectId": "mkt", "jobId": "job_2" },
            "schema": { "fields": [
                { "name": "campaign", "type": "STRING" },
                { "name": "active", "type": "BOOLEAN" }
            ]},
            "rows": [{ "f": [{ "v": "spring" }, { "v": "true" }] }]
        })))
        .mount(&server)
        .await;

    let table = fetch_query(&warehouse(&server), "SELECT campaign, active FROM c")
        .await
        .expect("rows");
    assert_eq!(table.height(), 1);
    assert_eq!(
        table.column("active").expect("column").values,
        vec![Cell::Bool(true)]
    );
}

#[tokio::test]
async fn test_fetch_query_returns_none_on_bad_sql() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "code": 400, "message": "Syntax error: Unexpected identifier" }
        })))
        .mount(&server)
        .await;

    assert!(fetch_query(&warehouse(&server), "SELEC 1").await.is_none());
}

#[tokio::test]
async fn test_sync_table_to_remote_schema() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects/other/datasets/ads/tables/posts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "schema": { "fields": [
                { "name": "post_id", "type": "INTEGER" },
                { "name": "published", "type": "DATE" },
                { "name": "likes", "type": "INTEGER" }
            ]}
        })))
        .mount(&server)
        .await;

    let mut table = Table::from_rows(
        vec!["post_id".to_string(), "published".to_string(), "likes".to_string()],
        vec![vec!["991".to_string(), "2024-13-40".to_string(), "15".to_string()]],
    )
    .expect("rectangular");

    sync_table_to_schema(&warehouse(&server), &mut table, "other.ads.posts", true)
        .await
        .expect("schema applies");

    assert_eq!(table.column("post_id").expect("col").values, vec![Cell::from("991")]);
    assert_eq!(table.column("published").expect("col").values, vec![Cell::Null]);
    assert_eq!(table.column("likes").expect("col").values, vec![Cell::Int(15)]);
}

#[tokio::test]
async fn test_authenticate_with_service_account_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.from-key",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/projects/mkt/datasets/ads/tables/daily"))
        .and(header("authorization", "Bearer ya29.from-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "schema": { "fields": [{ "name": "date", "type": "DATE" }] }
        })))
        .expect(2)
        .mount(&server)
        .await;

    let key = tempfile::NamedTempFile::new().expect("temp file");
    let contents = json!({
        "type": "service_account",
        "private_key": include_str!("fixtures/test_service_account.pem"),
        "client_email": "etl@mkt.iam.gserviceaccount.com",
        "token_uri": format!("{}/token", server.uri())
    });
    std::fs::write(key.path(), contents.to_string()).expect("write key");

    let bq = BigQuery::authenticate(key.path(), "mkt")
        .expect("key loads")
        .with_endpoint(&server.uri());
    for _ in 0..2 {
        let fields = bq.table_schema("ads.daily").await.expect("schema loads");
        assert_eq!(fields[0].name, "date");
    }
}
