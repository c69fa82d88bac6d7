use std::path::Path;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, RequestBuilder, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::{SpreadsheetClient, ValueInputOption, Worksheet, column_letter};
use crate::auth::{SHEETS_SCOPES, ServiceAccount, TokenSource};
use crate::config::Config;
use crate::error::{QuatiError, Result};
use crate::logging;

const SHEETS_API_URL: &str = "https://sheets.googleapis.com/v4";
const DRIVE_API_URL: &str = "https://www.googleapis.com/drive/v3";
const SPREADSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";

static SPREADSHEET_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/spreadsheets/d/([a-zA-Z0-9_-]+)").expect("spreadsheet key pattern is valid")
});

/// Authenticated HTTP plumbing shared by the client and its tabs.
#[derive(Clone)]
struct GoogleApi {
    http: Client,
    token: Arc<dyn TokenSource>,
}

impl GoogleApi {
    async fn send(&self, req: RequestBuilder) -> Result<reqwest::Response> {
        let token = self.token.access_token().await?;
        let response = req.bearer_auth(token).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        tracing::warn!(status = status.as_u16(), "{}", logging::api_failure(status.as_u16()));
        Err(QuatiError::Api {
            status: status.as_u16(),
            body,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self.send(self.http.get(url)).await?;
        Ok(response.json().await?)
    }
}

/// Google Sheets session over the Sheets v4 and Drive v3 REST APIs.
#[derive(Clone)]
pub struct GoogleSheets {
    api: GoogleApi,
    sheets_url: String,
    drive_url: String,
}

impl GoogleSheets {
    pub fn new(token: Arc<dyn TokenSource>) -> Self {
        Self::with_endpoints(token, SHEETS_API_URL, DRIVE_API_URL)
    }

    pub fn from_config(cfg: &Config, token: Arc<dyn TokenSource>) -> Self {
        Self::with_endpoints(token, &cfg.sheets.sheets_api_url, &cfg.sheets.drive_api_url)
    }

    /// Session authorized by a service-account JSON key.
    pub fn authorize(credentials_file: impl AsRef<Path>) -> Result<Self> {
        let account = ServiceAccount::from_file(credentials_file, SHEETS_SCOPES)?;
        Ok(Self::new(Arc::new(account)))
    }

    pub fn with_endpoints(token: Arc<dyn TokenSource>, sheets_url: &str, drive_url: &str) -> Self {
        Self {
            api: GoogleApi {
                http: Client::new(),
                token,
            },
            sheets_url: sheets_url.trim_end_matches('/').to_string(),
            drive_url: drive_url.trim_end_matches('/').to_string(),
        }
    }

    /// Look a workbook up by its exact title.
    pub async fn find_spreadsheet_id(&self, title: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct FileList {
            #[serde(default)]
            files: Vec<DriveFile>,
        }
        #[derive(Deserialize)]
        struct DriveFile {
            id: String,
        }

        let query = format!(
            "name = '{}' and mimeType = '{SPREADSHEET_MIME}' and trashed = false",
            title.replace('\\', "\\\\").replace('\'', "\\'")
        );
        let url = Url::parse_with_params(
            &format!("{}/files", self.drive_url),
            &[
                ("q", query.as_str()),
                ("fields", "files(id,name)"),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ],
        )
        .map_err(|e| QuatiError::Config(format!("invalid Drive URL: {e}")))?;

        let list: FileList = self.api.get_json(url).await?;
        list.files
            .into_iter()
            .next()
            .map(|f| f.id)
            .ok_or_else(|| QuatiError::SpreadsheetNotFound(title.to_string()))
    }

    /// Resolve a tab of an already-known spreadsheet.
    pub async fn worksheet(&self, spreadsheet_id: &str, tab: &str) -> Result<GoogleWorksheet> {
        #[derive(Deserialize)]
        struct Spreadsheet {
            #[serde(default)]
            sheets: Vec<Sheet>,
        }
        #[derive(Deserialize)]
        struct Sheet {
            properties: SheetProperties,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct SheetProperties {
            sheet_id: i64,
            title: String,
        }

        let url = Url::parse_with_params(
            &format!("{}/spreadsheets/{spreadsheet_id}", self.sheets_url),
            &[("fields", "sheets.properties(sheetId,title)")],
        )
        .map_err(|e| QuatiError::Config(format!("invalid Sheets URL: {e}")))?;

        let spreadsheet: Spreadsheet = self.api.get_json(url).await?;
        let props = spreadsheet
            .sheets
            .into_iter()
            .map(|s| s.properties)
            .find(|p| p.title == tab)
            .ok_or_else(|| QuatiError::WorksheetNotFound(tab.to_string()))?;

        Ok(GoogleWorksheet {
            api: self.api.clone(),
            sheets_url: self.sheets_url.clone(),
            spreadsheet_id: spreadsheet_id.to_string(),
            sheet_id: props.sheet_id,
            title: props.title,
        })
    }
}

/// Extract the spreadsheet key from a `docs.google.com` link.
pub fn spreadsheet_id_from_url(link: &str) -> Result<String> {
    SPREADSHEET_KEY
        .captures(link)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| QuatiError::SpreadsheetNotFound(link.to_string()))
}

#[async_trait]
impl SpreadsheetClient for GoogleSheets {
    type Tab = GoogleWorksheet;

    async fn open_tab(&self, workbook: &str, tab: &str) -> Result<GoogleWorksheet> {
        let id = self.find_spreadsheet_id(workbook).await?;
        self.worksheet(&id, tab).await
    }

    async fn open_tab_by_url(&self, url: &str, tab: &str) -> Result<GoogleWorksheet> {
        let id = spreadsheet_id_from_url(url)?;
        self.worksheet(&id, tab).await
    }
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

fn cell_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// A resolved tab of a Google spreadsheet.
#[derive(Clone)]
pub struct GoogleWorksheet {
    api: GoogleApi,
    sheets_url: String,
    spreadsheet_id: String,
    sheet_id: i64,
    title: String,
}

impl std::fmt::Debug for GoogleWorksheet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleWorksheet")
            .field("spreadsheet_id", &self.spreadsheet_id)
            .field("sheet_id", &self.sheet_id)
            .field("title", &self.title)
            .finish()
    }
}

impl GoogleWorksheet {
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn spreadsheet_id(&self) -> &str {
        &self.spreadsheet_id
    }

    pub fn sheet_id(&self) -> i64 {
        self.sheet_id
    }

    fn quoted_title(&self) -> String {
        format!("'{}'", self.title.replace('\'', "''"))
    }

    /// Qualify an A1 range with this tab's title unless it already names one.
    fn qualify(&self, range: &str) -> String {
        if range.contains('!') {
            range.to_string()
        } else {
            format!("{}!{range}", self.quoted_title())
        }
    }

    fn values_url(&self, qualified_range: &str) -> Result<Url> {
        let mut url = Url::parse(&format!(
            "{}/spreadsheets/{}/values",
            self.sheets_url, self.spreadsheet_id
        ))
        .map_err(|e| QuatiError::Config(format!("invalid Sheets URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| QuatiError::Config("Sheets URL cannot be a base".to_string()))?
            .push(qualified_range);
        Ok(url)
    }
}

#[async_trait]
impl Worksheet for GoogleWorksheet {
    async fn get_all_values(&self) -> Result<Vec<Vec<String>>> {
        // a bare tab title selects every populated cell
        let url = self.values_url(&self.quoted_title())?;
        let body: ValueRange = self.api.get_json(url).await?;

        let width = body.values.iter().map(Vec::len).max().unwrap_or(0);
        Ok(body
            .values
            .into_iter()
            .map(|row| {
                let mut row: Vec<String> = row.into_iter().map(cell_text).collect();
                row.resize(width, String::new());
                row
            })
            .collect())
    }

    async fn col_values(&self, col: usize) -> Result<Vec<String>> {
        let letter = column_letter(col);
        let mut url = self.values_url(&self.qualify(&format!("{letter}:{letter}")))?;
        url.query_pairs_mut().append_pair("majorDimension", "COLUMNS");
        let body: ValueRange = self.api.get_json(url).await?;
        Ok(body
            .values
            .into_iter()
            .next()
            .map(|col| col.into_iter().map(cell_text).collect())
            .unwrap_or_default())
    }

    async fn batch_clear(&self, ranges: Vec<String>) -> Result<()> {
        let url = format!(
            "{}/spreadsheets/{}/values:batchClear",
            self.sheets_url, self.spreadsheet_id
        );
        let ranges: Vec<String> = ranges.iter().map(|r| self.qualify(r)).collect();
        self.api
            .send(self.api.http.post(url).json(&json!({ "ranges": ranges })))
            .await?;
        Ok(())
    }

    async fn update(
        &self,
        range: &str,
        values: Vec<Vec<String>>,
        input: ValueInputOption,
    ) -> Result<()> {
        let mut url = self.values_url(&self.qualify(range))?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", input.as_str());
        let body = json!({ "majorDimension": "ROWS", "values": values });
        self.api.send(self.api.http.put(url).json(&body)).await?;
        tracing::debug!(tab = %self.title, range, mode = input.as_str(), "Range updated");
        Ok(())
    }
}
