use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::{SchemaField, Warehouse};
use crate::auth::{BIGQUERY_SCOPES, ServiceAccount, TokenSource};
use crate::config::Config;
use crate::error::{QuatiError, Result};
use crate::logging::{self, PipelineStage, messages};
use crate::table::{Cell, Table};

const BIGQUERY_API_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";
const DEFAULT_QUERY_TIMEOUT_MS: u64 = 10_000;

/// BigQuery project over the v2 REST API.
#[derive(Clone)]
pub struct BigQuery {
    http: Client,
    token: Arc<dyn TokenSource>,
    api_url: String,
    project: String,
    location: Option<String>,
    timeout_ms: u64,
}

#[derive(Debug, PartialEq, Eq)]
struct TableRef<'a> {
    project: &'a str,
    dataset: &'a str,
    table: &'a str,
}

#[derive(Deserialize)]
struct TableResource {
    schema: Option<TableSchema>,
}

#[derive(Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<SchemaField>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

/// Shape shared by `jobs.query` and `jobs.getQueryResults`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<Row>,
    page_token: Option<String>,
}

#[derive(Deserialize)]
struct Row {
    f: Vec<RowValue>,
}

#[derive(Deserialize)]
struct RowValue {
    v: Value,
}

impl BigQuery {
    pub fn new(token: Arc<dyn TokenSource>, project: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            token,
            api_url: BIGQUERY_API_URL.to_string(),
            project: project.into(),
            location: None,
            timeout_ms: DEFAULT_QUERY_TIMEOUT_MS,
        }
    }

    /// Client for `project` authenticated by a service-account JSON key.
    pub fn authenticate(credentials_file: impl AsRef<Path>, project: impl Into<String>) -> Result<Self> {
        let account = ServiceAccount::from_file(credentials_file, BIGQUERY_SCOPES)?;
        Ok(Self::new(Arc::new(account), project))
    }

    pub fn from_config(cfg: &Config, token: Arc<dyn TokenSource>) -> Self {
        Self::new(token, cfg.warehouse.project.clone())
            .with_endpoint(&cfg.warehouse.api_url)
            .with_location(cfg.warehouse.location.clone())
            .with_timeout_ms(cfg.warehouse.query_timeout_ms)
    }

    pub fn with_endpoint(mut self, api_url: &str) -> Self {
        self.api_url = api_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    fn table_ref<'a>(&'a self, table_id: &'a str) -> Result<TableRef<'a>> {
        let parts: Vec<&str> = table_id.split(['.', ':']).collect();
        match *parts.as_slice() {
            [dataset, table] => Ok(TableRef {
                project: &self.project,
                dataset,
                table,
            }),
            [project, dataset, table] => Ok(TableRef {
                project,
                dataset,
                table,
            }),
            _ => Err(QuatiError::Config(format!(
                "table id '{table_id}' is not dataset.table or project.dataset.table"
            ))),
        }
    }

    async fn send<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T> {
        let token = self.token.access_token().await?;
        let response = req.bearer_auth(token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::warn!(status = status.as_u16(), "{}", logging::api_failure(status.as_u16()));
            return Err(QuatiError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl Warehouse for BigQuery {
    async fn table_schema(&self, table_id: &str) -> Result<Vec<SchemaField>> {
        let r = self.table_ref(table_id)?;
        tracing::info!(stage = %PipelineStage::Extract, table_id, "{}", messages::BQ_GET_TABLE);
        let url = format!(
            "{}/projects/{}/datasets/{}/tables/{}",
            self.api_url, r.project, r.dataset, r.table
        );

        let resource: TableResource = self.send(self.http.get(url)).await?;
        Ok(resource.schema.map(|s| s.fields).unwrap_or_default())
    }

    async fn run_query(&self, sql: &str) -> Result<Table> {
        let mut body = json!({
            "query": sql,
            "useLegacySql": false,
            "timeoutMs": self.timeout_ms,
        });
        if let Some(location) = &self.location {
            body["location"] = json!(location);
        }

        let url = format!("{}/projects/{}/queries", self.api_url, self.project);
        let mut page: QueryResponse = self.send(self.http.post(url).json(&body)).await?;

        let (job_id, location) = match &page.job_reference {
            Some(job) => (
                job.job_id.clone(),
                job.location.clone().or_else(|| self.location.clone()),
            ),
            None => {
                return Err(QuatiError::Api {
                    status: 200,
                    body: "query response has no job reference".to_string(),
                });
            }
        };

        let mut fields: Option<Vec<SchemaField>> = None;
        let mut rows: Vec<Row> = Vec::new();
        loop {
            if page.job_complete {
                if fields.is_none() {
                    fields = page.schema.take().map(|s| s.fields);
                }
                rows.append(&mut page.rows);
            }

            let page_token = page.page_token.take();
            if page.job_complete && page_token.is_none() {
                break;
            }

            tracing::debug!(job_id = %job_id, complete = page.job_complete, "Polling query results");
            let mut params: Vec<(&str, String)> = vec![("timeoutMs", self.timeout_ms.to_string())];
            if let Some(location) = &location {
                params.push(("location", location.clone()));
            }
            if let Some(token) = page_token {
                params.push(("pageToken", token));
            }
            let url = format!(
                "{}/projects/{}/queries/{}",
                self.api_url, self.project, job_id
            );
            page = self.send(self.http.get(url).query(&params)).await?;
        }

        rows_to_table(fields.unwrap_or_default(), rows)
    }
}

fn rows_to_table(fields: Vec<SchemaField>, rows: Vec<Row>) -> Result<Table> {
    let mut columns: Vec<Vec<Cell>> = vec![Vec::with_capacity(rows.len()); fields.len()];
    for row in rows {
        if row.f.len() != fields.len() {
            return Err(QuatiError::Table(format!(
                "row has {} values but the schema has {} fields",
                row.f.len(),
                fields.len()
            )));
        }
        for (column, (value, field)) in columns.iter_mut().zip(row.f.into_iter().zip(&fields)) {
            column.push(typed_cell(&field.field_type, value.v));
        }
    }

    let mut table = Table::new();
    for (field, values) in fields.into_iter().zip(columns) {
        table.push_column(field.name, values)?;
    }
    Ok(table)
}

/// Scalars arrive as strings; values that do not parse stay text.
fn typed_cell(field_type: &str, raw: Value) -> Cell {
    let text = match raw {
        Value::Null => return Cell::Null,
        Value::String(s) => s,
        other => return Cell::Text(other.to_string()),
    };
    let typed = match field_type {
        "INTEGER" | "INT64" => text.parse().ok().map(Cell::Int),
        "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => text.parse().ok().map(Cell::Float),
        "BOOLEAN" | "BOOL" => text.parse().ok().map(Cell::Bool),
        "DATE" => NaiveDate::parse_from_str(&text, "%Y-%m-%d").ok().map(Cell::Date),
        "DATETIME" => NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(Cell::Timestamp),
        "TIMESTAMP" => text.parse::<f64>().ok().and_then(|secs| {
            let micros = (secs * 1e6).round() as i64;
            DateTime::from_timestamp_micros(micros).map(|dt| Cell::Timestamp(dt.naive_utc()))
        }),
        _ => None,
    };
    typed.unwrap_or(Cell::Text(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;

    fn client() -> BigQuery {
        BigQuery::new(Arc::new(StaticToken::new("t")), "mkt-data")
    }

    #[test]
    fn test_table_ref_forms() {
        let bq = client();
        assert_eq!(
            bq.table_ref("ads.daily").expect("two parts"),
            TableRef {
                project: "mkt-data",
                dataset: "ads",
                table: "daily"
            }
        );
        assert_eq!(
            bq.table_ref("other:ads.daily").expect("three parts").project,
            "other"
        );
        assert!(bq.table_ref("daily").is_err());
    }

    #[test]
    fn test_typed_cells() {
        assert_eq!(typed_cell("INTEGER", json!("42")), Cell::Int(42));
        assert_eq!(typed_cell("BOOLEAN", json!("true")), Cell::Bool(true));
        assert_eq!(typed_cell("STRING", json!("x")), Cell::from("x"));
        assert_eq!(typed_cell("FLOAT", Value::Null), Cell::Null);
        assert_eq!(typed_cell("INTEGER", json!("n/a")), Cell::from("n/a"));
        match typed_cell("TIMESTAMP", json!("1.7040672E9")) {
            Cell::Timestamp(ts) => assert_eq!(ts.to_string(), "2024-01-01 00:00:00"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_rows_to_table_rejects_ragged_rows() {
        let fields = vec![SchemaField::new("a", "STRING"), SchemaField::new("b", "STRING")];
        let rows = vec![Row {
            f: vec![RowValue { v: json!("only") }],
        }];
        assert!(rows_to_table(fields, rows).is_err());
    }
}
