//! Google Sheets sink over the Sheets v4 REST API.
//!
//! Authentication uses a service-account key: a short-lived RS256 JWT is
//! exchanged for an access token at the key's `token_uri`
//! (`urn:ietf:params:oauth:grant-type:jwt-bearer`). Tokens are cached until a
//! minute before expiry; a 401 from the API surfaces as
//! [`SinkError::Unauthorized`] so the writer can refresh and retry.
//!
//! Inserting rows at a position is a single `batchUpdate` carrying an
//! `insertDimension` request that opens the rows and an `updateCells`
//! request that fills them. The API applies the requests of one batch
//! update together, so a rejected or retried insert never leaves blank
//! rows behind.

use crate::config::SinkConfig;
use crate::error::SinkError;
use crate::sink::TabularSink;
use crate::utils::truncate_for_log;
use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, instrument, warn};
use url::Url;

const SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const JWT_BEARER: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl ServiceAccountKey {
    /// Parse `source` as an inline JSON key, or read it as a path to one.
    pub fn load(source: &str) -> Result<Self, SinkError> {
        let source = source.trim();
        let text = if source.starts_with('{') {
            source.to_string()
        } else {
            std::fs::read_to_string(source)
                .map_err(|e| SinkError::Credentials(format!("{source}: {e}")))?
        };
        serde_json::from_str(&text).map_err(|e| SinkError::Credentials(e.to_string()))
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_ttl")]
    expires_in: u64,
}

fn default_token_ttl() -> u64 {
    3600
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

pub struct SheetsClient {
    http: Client,
    api_base: String,
    spreadsheet_id: String,
    sheet: String,
    key: ServiceAccountKey,
    token: Mutex<Option<AccessToken>>,
    sheet_id: OnceCell<i64>,
}

impl SheetsClient {
    /// Build a client for the sheet named in `config`.
    ///
    /// Fails with [`SinkError::Credentials`] when the spreadsheet id or the
    /// service-account key is missing or unreadable.
    pub fn new(config: &SinkConfig, timeout: Duration) -> Result<Self, SinkError> {
        let spreadsheet_id = config
            .spreadsheet_id
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SinkError::Credentials("no spreadsheet id configured".into()))?;
        let credentials = config
            .credentials
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SinkError::Credentials("no service-account key configured".into()))?;
        let key = ServiceAccountKey::load(credentials)?;
        let http = Client::builder().timeout(timeout).build()?;

        info!(
            spreadsheet = %spreadsheet_id,
            sheet = %config.sheet,
            account = %key.client_email,
            "Initialized Sheets client"
        );
        Ok(Self {
            http,
            api_base: config.api_base.clone(),
            spreadsheet_id,
            sheet: config.sheet.clone(),
            key,
            token: Mutex::new(None),
            sheet_id: OnceCell::new(),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, SinkError> {
        self.spreadsheet_url(&self.spreadsheet_id, segments)
    }

    /// `{api_base}/{spreadsheet}/{segments..}`; `spreadsheet` may carry a
    /// `:method` suffix.
    fn spreadsheet_url(&self, spreadsheet: &str, segments: &[&str]) -> Result<Url, SinkError> {
        let mut url = Url::parse(&self.api_base).map_err(|e| SinkError::Write(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| SinkError::Write("cannot extend sheets base url".into()))?
            .pop_if_empty()
            .push(spreadsheet)
            .extend(segments);
        Ok(url)
    }

    fn range(&self, cells: Option<&str>) -> String {
        a1_range(&self.sheet, cells)
    }

    /// Sign a fresh assertion and trade it for an access token.
    async fn fetch_token(&self) -> Result<AccessToken, SinkError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_TTL_SECS,
        };
        let signing_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| SinkError::Credentials(e.to_string()))?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
            .map_err(|e| SinkError::Credentials(e.to_string()))?;

        debug!(token_uri = %self.key.token_uri, "Requesting Google access token");
        let resp = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER), ("assertion", assertion.as_str())])
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SinkError::Credentials(format!("HTTP {status}: {body}")));
        }
        let token: TokenResponse = resp.json().await?;
        Ok(AccessToken {
            value: token.access_token,
            expires_at: Instant::now()
                + Duration::from_secs(token.expires_in.saturating_sub(60)),
        })
    }

    async fn bearer(&self) -> Result<String, SinkError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }
        let token = self.fetch_token().await?;
        let value = token.value.clone();
        *guard = Some(token);
        Ok(value)
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, SinkError> {
        let resp = req.bearer_auth(self.bearer().await?).send().await?;
        check_status(resp).await
    }

    /// Numeric id of the configured tab, needed by `insertDimension`.
    async fn sheet_id(&self) -> Result<i64, SinkError> {
        self.sheet_id
            .get_or_try_init(|| async {
                let mut url = self.url(&[])?;
                url.query_pairs_mut()
                    .append_pair("fields", "sheets.properties(sheetId,title)");
                let body: Value = self.send(self.http.get(url)).await?.json().await?;
                find_sheet_id(&body, &self.sheet).ok_or_else(|| {
                    SinkError::Write(format!("no tab named `{}` in spreadsheet", self.sheet))
                })
            })
            .await
            .copied()
    }
}

#[async_trait]
impl TabularSink for SheetsClient {
    #[instrument(level = "debug", skip_all)]
    async fn append_row(&self, row: Vec<String>) -> Result<(), SinkError> {
        let append = format!("{}:append", self.range(Some("A1")));
        let mut url = self.url(&["values", append.as_str()])?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");
        self.send(self.http.post(url).json(&json!({ "values": [row] })))
            .await?;
        Ok(())
    }

    #[instrument(level = "info", skip(self, rows), fields(rows = rows.len()))]
    async fn insert_rows(&self, rows: Vec<Vec<String>>, position: usize) -> Result<(), SinkError> {
        if rows.is_empty() {
            return Ok(());
        }
        let sheet_id = self.sheet_id().await?;
        let url = self.spreadsheet_url(&format!("{}:batchUpdate", self.spreadsheet_id), &[])?;
        self.send(
            self.http
                .post(url)
                .json(&insert_rows_request(sheet_id, position, &rows)),
        )
        .await?;
        debug!(position, count = rows.len(), "Inserted rows");
        Ok(())
    }

    async fn first_row(&self) -> Result<Option<Vec<String>>, SinkError> {
        let url = self.url(&["values", self.range(Some("1:1")).as_str()])?;
        let body: ValueRange = self.send(self.http.get(url)).await?.json().await?;
        Ok(body
            .values
            .into_iter()
            .next()
            .map(|row| row.into_iter().map(cell_text).collect()))
    }

    async fn get_all_rows(&self) -> Result<Vec<Vec<String>>, SinkError> {
        let url = self.url(&["values", self.range(None).as_str()])?;
        let body: ValueRange = self.send(self.http.get(url)).await?.json().await?;
        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    #[instrument(level = "info", skip(self))]
    async fn clear(&self, preserve_header: bool) -> Result<(), SinkError> {
        let range = if preserve_header {
            self.range(Some("A2:Z"))
        } else {
            self.range(None)
        };
        let url = self.url(&["values", format!("{range}:clear").as_str()])?;
        self.send(self.http.post(url).json(&json!({}))).await?;
        info!(%range, "Cleared sheet");
        Ok(())
    }

    async fn refresh_credentials(&self) -> Result<(), SinkError> {
        let token = self.fetch_token().await?;
        *self.token.lock().await = Some(token);
        info!("Refreshed Google credentials");
        Ok(())
    }

    fn location(&self) -> String {
        format!("{}/{}", self.spreadsheet_id, self.sheet)
    }
}

/// A1 notation for `cells` on `sheet`, or the whole sheet when `cells` is `None`.
fn a1_range(sheet: &str, cells: Option<&str>) -> String {
    let quoted = format!("'{}'", sheet.replace('\'', "''"));
    match cells {
        Some(cells) => format!("{quoted}!{cells}"),
        None => quoted,
    }
}

/// Batch update that opens `rows.len()` rows so the first lands on
/// `position`, then writes `rows` into them as plain strings.
fn insert_rows_request(sheet_id: i64, position: usize, rows: &[Vec<String>]) -> Value {
    let start = position.saturating_sub(1);
    let row_data: Vec<Value> = rows
        .iter()
        .map(|row| {
            let cells: Vec<Value> = row
                .iter()
                .map(|cell| json!({ "userEnteredValue": { "stringValue": cell } }))
                .collect();
            json!({ "values": cells })
        })
        .collect();
    json!({
        "requests": [
            {
                "insertDimension": {
                    "range": {
                        "sheetId": sheet_id,
                        "dimension": "ROWS",
                        "startIndex": start,
                        "endIndex": start + rows.len(),
                    },
                    "inheritFromBefore": start > 0,
                }
            },
            {
                "updateCells": {
                    "start": { "sheetId": sheet_id, "rowIndex": start, "columnIndex": 0 },
                    "rows": row_data,
                    "fields": "userEnteredValue",
                }
            }
        ]
    })
}

fn find_sheet_id(spreadsheet: &Value, title: &str) -> Option<i64> {
    spreadsheet["sheets"]
        .as_array()?
        .iter()
        .map(|s| &s["properties"])
        .find(|p| p["title"].as_str() == Some(title))
        .and_then(|p| p["sheetId"].as_i64())
}

fn cell_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

async fn check_status(resp: Response) -> Result<Response, SinkError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = truncate_for_log(&resp.text().await.unwrap_or_default(), 200);
    if status == StatusCode::UNAUTHORIZED {
        warn!("Sheets API rejected the access token");
        Err(SinkError::Unauthorized(message))
    } else {
        Err(SinkError::Write(format!("HTTP {status}: {message}")))
    }
}
