use crate::google_auth::{AuthError, TokenProvider};
use log::{debug, warn};
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;

pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com";

#[derive(Error, Debug)]
pub enum GoogleApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Google API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid API base URL: {0}")]
    BaseUrl(String),

    #[error("unexpected response: {0}")]
    Unexpected(String),
}

/// A tab inside a spreadsheet.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SheetTab {
    #[serde(rename = "sheetId")]
    pub sheet_id: i64,
    pub title: String,
}

#[derive(Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Deserialize)]
struct SheetEntry {
    properties: SheetTab,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Serialize)]
struct ValuesBody<'a> {
    values: &'a [Vec<String>],
}

#[derive(Deserialize)]
struct AppendResponse {
    updates: AppendUpdates,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendUpdates {
    updated_range: String,
}

/// Narrow Sheets v4 client: the values and batchUpdate calls the logger needs.
pub struct SheetsClient {
    client: reqwest::Client,
    base_url: String,
    auth: Arc<dyn TokenProvider>,
}

impl SheetsClient {
    pub fn new(client: reqwest::Client, base_url: String, auth: Arc<dyn TokenProvider>) -> Self {
        Self {
            client,
            base_url,
            auth,
        }
    }

    fn url(&self, spreadsheet_id: &str, tail: &[&str]) -> Result<Url, GoogleApiError> {
        let mut url =
            Url::parse(&self.base_url).map_err(|e| GoogleApiError::BaseUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| GoogleApiError::BaseUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", spreadsheet_id])
            .extend(tail);
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<Value>,
    ) -> Result<reqwest::Response, GoogleApiError> {
        let token = self.auth.access_token().await?;
        debug!("{} {}", method, url.path());
        let mut request = self.client.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        check_status(response).await
    }

    /// Tabs of the spreadsheet, in display order.
    pub async fn tabs(&self, spreadsheet_id: &str) -> Result<Vec<SheetTab>, GoogleApiError> {
        let mut url = self.url(spreadsheet_id, &[])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties(sheetId,title)");
        let meta: SpreadsheetMeta = self.send(Method::GET, url, None).await?.json().await?;
        Ok(meta.sheets.into_iter().map(|s| s.properties).collect())
    }

    pub async fn add_tab(&self, spreadsheet_id: &str, title: &str) -> Result<SheetTab, GoogleApiError> {
        let replies = self
            .batch_update(
                spreadsheet_id,
                vec![json!({ "addSheet": { "properties": { "title": title } } })],
            )
            .await?;
        let properties = replies
            .first()
            .and_then(|reply| reply.pointer("/addSheet/properties"))
            .cloned()
            .ok_or_else(|| GoogleApiError::Unexpected("addSheet reply missing".into()))?;
        serde_json::from_value(properties).map_err(|e| GoogleApiError::Unexpected(e.to_string()))
    }

    /// Runs `requests` as one batchUpdate and returns the replies.
    pub async fn batch_update(
        &self,
        spreadsheet_id: &str,
        requests: Vec<Value>,
    ) -> Result<Vec<Value>, GoogleApiError> {
        let url = self.url(spreadsheet_id, &[])?;
        let url = with_suffix(url, ":batchUpdate");
        let body: Value = self
            .send(Method::POST, url, Some(json!({ "requests": requests })))
            .await?
            .json()
            .await?;
        Ok(body
            .get("replies")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Cell values of `range` as display strings. Missing trailing cells are
    /// simply absent, as the API returns them.
    pub async fn get_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
    ) -> Result<Vec<Vec<String>>, GoogleApiError> {
        let url = self.url(spreadsheet_id, &["values", range])?;
        let body: ValueRange = self.send(Method::GET, url, None).await?.json().await?;
        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    /// Overwrites `range` with literal values.
    pub async fn update_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: &[Vec<String>],
    ) -> Result<(), GoogleApiError> {
        let mut url = self.url(spreadsheet_id, &["values", range])?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        let body = serde_json::to_value(ValuesBody { values })
            .map_err(|e| GoogleApiError::Unexpected(e.to_string()))?;
        self.send(Method::PUT, url, Some(body)).await?;
        Ok(())
    }

    /// Appends rows after the table found in `range`, parsing values as if
    /// typed by a user so formulas are evaluated. Returns the updated range,
    /// e.g. `Logs!A5:N5`.
    pub async fn append_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: &[Vec<String>],
    ) -> Result<String, GoogleApiError> {
        let url = self.url(spreadsheet_id, &["values", range])?;
        let mut url = with_suffix(url, ":append");
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED")
            .append_pair("insertDataOption", "INSERT_ROWS");
        let body = serde_json::to_value(ValuesBody { values })
            .map_err(|e| GoogleApiError::Unexpected(e.to_string()))?;
        let response: AppendResponse = self
            .send(Method::POST, url, Some(body))
            .await?
            .json()
            .await?;
        Ok(response.updates.updated_range)
    }
}

pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, GoogleApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!("Google API request failed with status code: {}", status);
    Err(GoogleApiError::Status {
        status: status.as_u16(),
        body,
    })
}

fn with_suffix(mut url: Url, suffix: &str) -> Url {
    let path = format!("{}{}", url.path(), suffix);
    url.set_path(&path);
    url
}

fn cell_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// A1 notation for `cells` on `tab`, quoting the tab name when needed.
pub fn a1_range(tab: &str, cells: &str) -> String {
    let plain = tab.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        format!("{}!{}", tab, cells)
    } else {
        format!("'{}'!{}", tab.replace('\'', "''"), cells)
    }
}

/// First row number in an A1 range such as `Logs!A5:N5` or `'My Tab'!A12`.
pub fn first_row_of(range: &str) -> Option<u32> {
    let cells = range.rsplit_once('!').map_or(range, |(_, cells)| cells);
    let start = cells.split(':').next()?;
    let digits: String = start.chars().skip_while(|c| c.is_ascii_alphabetic()).collect();
    digits.parse().ok()
}
