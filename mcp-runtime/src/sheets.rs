//! Google Sheets v4 REST client.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use sheets_mcp_core::TokenSource;
use url::Url;

use crate::backend::{BackendError, SpreadsheetBackend};

pub const DEFAULT_API_BASE_URL: &str = "https://sheets.googleapis.com";
const DEFAULT_READ_RANGE: &str = "Sheet1";

pub struct SheetsClient {
    http: reqwest::Client,
    base_url: Url,
    tokens: Arc<dyn TokenSource>,
}

impl SheetsClient {
    pub fn new(http: reqwest::Client, base_url: Url, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            http,
            base_url,
            tokens,
        }
    }

    fn endpoint(&self, context: &'static str, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| BackendError::BaseUrl { context })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn values_endpoint(
        &self,
        context: &'static str,
        spreadsheet_id: &str,
        range_segment: &str,
    ) -> Result<Url, BackendError> {
        self.endpoint(
            context,
            &["v4", "spreadsheets", spreadsheet_id, "values", range_segment],
        )
    }

    async fn send<T: DeserializeOwned>(
        &self,
        context: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, BackendError> {
        let header = self
            .tokens
            .authorization_header()
            .await
            .map_err(|source| BackendError::Credential { context, source })?;

        let resp = request
            .header(AUTHORIZATION, header)
            .send()
            .await
            .map_err(|source| BackendError::Http { context, source })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                context,
                status: status.as_u16(),
                message: google_error_message(&body),
            });
        }

        resp.json()
            .await
            .map_err(|source| BackendError::Http { context, source })
    }
}

/// Pulls `error.message` out of a Google API error body, else the raw body.
fn google_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

fn cell_text(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ValueRange {
    range: String,
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UpdateValuesResponse {
    updated_range: String,
    updated_rows: i64,
    updated_columns: i64,
    updated_cells: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AppendValuesResponse {
    updates: UpdateValuesResponse,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ClearValuesResponse {
    cleared_range: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Spreadsheet {
    spreadsheet_id: String,
    spreadsheet_url: String,
    properties: SpreadsheetProperties,
    sheets: Vec<Sheet>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SpreadsheetProperties {
    title: String,
    locale: String,
    time_zone: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Sheet {
    properties: SheetProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SheetProperties {
    sheet_id: i64,
    title: String,
    index: i64,
    sheet_type: String,
    grid_properties: GridProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GridProperties {
    row_count: i64,
    column_count: i64,
    frozen_row_count: i64,
    frozen_column_count: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct BatchUpdateResponse {
    spreadsheet_id: String,
    replies: Vec<Value>,
}

fn update_summary(updates: UpdateValuesResponse, message: &str) -> Value {
    json!({
        "updated_range": updates.updated_range,
        "updated_rows": updates.updated_rows,
        "updated_columns": updates.updated_columns,
        "updated_cells": updates.updated_cells,
        "message": message,
    })
}

#[async_trait]
impl SpreadsheetBackend for SheetsClient {
    async fn read_sheet(
        &self,
        spreadsheet_id: &str,
        range: Option<&str>,
    ) -> Result<Value, BackendError> {
        const CONTEXT: &str = "unable to retrieve data from sheet";
        let range = range
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_READ_RANGE);
        let url = self.values_endpoint(CONTEXT, spreadsheet_id, range)?;
        let resp: ValueRange = self.send(CONTEXT, self.http.get(url)).await?;

        if resp.values.is_empty() {
            return Ok(json!({
                "range": resp.range,
                "values": [],
                "message": "No data found",
            }));
        }

        let values: Vec<Vec<String>> = resp
            .values
            .iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect();
        let col_count = values.first().map_or(0, Vec::len);
        Ok(json!({
            "range": resp.range,
            "row_count": values.len(),
            "col_count": col_count,
            "values": values,
        }))
    }

    async fn write_sheet(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: &[Vec<String>],
    ) -> Result<Value, BackendError> {
        const CONTEXT: &str = "unable to write data to sheet";
        let url = self.values_endpoint(CONTEXT, spreadsheet_id, range)?;
        let request = self
            .http
            .put(url)
            .query(&[("valueInputOption", "USER_ENTERED")])
            .json(&json!({ "values": values }));
        let resp: UpdateValuesResponse = self.send(CONTEXT, request).await?;
        Ok(update_summary(resp, "Data written successfully"))
    }

    async fn append_sheet(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: &[Vec<String>],
    ) -> Result<Value, BackendError> {
        const CONTEXT: &str = "unable to append data to sheet";
        let url = self.values_endpoint(CONTEXT, spreadsheet_id, &format!("{range}:append"))?;
        let request = self
            .http
            .post(url)
            .query(&[
                ("valueInputOption", "USER_ENTERED"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&json!({ "values": values }));
        let resp: AppendValuesResponse = self.send(CONTEXT, request).await?;
        Ok(update_summary(resp.updates, "Data appended successfully"))
    }

    async fn create_spreadsheet(
        &self,
        title: &str,
        sheets: &[String],
    ) -> Result<Value, BackendError> {
        const CONTEXT: &str = "unable to create spreadsheet";
        let url = self.endpoint(CONTEXT, &["v4", "spreadsheets"])?;
        let mut body = json!({ "properties": { "title": title } });
        if !sheets.is_empty() {
            body["sheets"] = sheets
                .iter()
                .map(|name| json!({ "properties": { "title": name } }))
                .collect();
        }
        let resp: Spreadsheet = self.send(CONTEXT, self.http.post(url).json(&body)).await?;

        let titles: Vec<String> = resp
            .sheets
            .into_iter()
            .map(|sheet| sheet.properties.title)
            .collect();
        Ok(json!({
            "spreadsheet_id": resp.spreadsheet_id,
            "spreadsheet_url": resp.spreadsheet_url,
            "title": resp.properties.title,
            "sheets": titles,
            "message": "Spreadsheet created successfully",
        }))
    }

    async fn get_spreadsheet_info(&self, spreadsheet_id: &str) -> Result<Value, BackendError> {
        const CONTEXT: &str = "unable to retrieve spreadsheet info";
        let url = self.endpoint(CONTEXT, &["v4", "spreadsheets", spreadsheet_id])?;
        let resp: Spreadsheet = self.send(CONTEXT, self.http.get(url)).await?;

        let sheets: Vec<Value> = resp
            .sheets
            .iter()
            .map(|sheet| {
                let props = &sheet.properties;
                let grid = &props.grid_properties;
                json!({
                    "sheet_id": props.sheet_id,
                    "title": props.title,
                    "index": props.index,
                    "sheet_type": props.sheet_type,
                    "row_count": grid.row_count,
                    "col_count": grid.column_count,
                    "frozen_rows": grid.frozen_row_count,
                    "frozen_cols": grid.frozen_column_count,
                })
            })
            .collect();
        Ok(json!({
            "spreadsheet_id": resp.spreadsheet_id,
            "title": resp.properties.title,
            "locale": resp.properties.locale,
            "time_zone": resp.properties.time_zone,
            "spreadsheet_url": resp.spreadsheet_url,
            "sheets": sheets,
        }))
    }

    async fn add_sheet(
        &self,
        spreadsheet_id: &str,
        sheet_name: &str,
    ) -> Result<Value, BackendError> {
        const CONTEXT: &str = "unable to add sheet";
        let url = self.endpoint(
            CONTEXT,
            &["v4", "spreadsheets", &format!("{spreadsheet_id}:batchUpdate")],
        )?;
        let body = json!({
            "requests": [{ "addSheet": { "properties": { "title": sheet_name } } }]
        });
        let resp: BatchUpdateResponse = self.send(CONTEXT, self.http.post(url).json(&body)).await?;

        let added = resp
            .replies
            .first()
            .and_then(|reply| reply.get("addSheet"))
            .and_then(|reply| reply.get("properties"));
        Ok(match added {
            Some(props) => json!({
                "sheet_id": props.get("sheetId").cloned().unwrap_or(json!(0)),
                "title": props.get("title").cloned().unwrap_or(json!(sheet_name)),
                "index": props.get("index").cloned().unwrap_or(json!(0)),
                "message": "Sheet added successfully",
            }),
            None => json!({ "message": "Sheet added successfully" }),
        })
    }

    async fn clear_sheet(&self, spreadsheet_id: &str, range: &str) -> Result<Value, BackendError> {
        const CONTEXT: &str = "unable to clear sheet";
        let url = self.values_endpoint(CONTEXT, spreadsheet_id, &format!("{range}:clear"))?;
        let resp: ClearValuesResponse = self
            .send(CONTEXT, self.http.post(url).json(&json!({})))
            .await?;
        Ok(json!({
            "cleared_range": resp.cleared_range,
            "message": "Range cleared successfully",
        }))
    }

    async fn batch_update(
        &self,
        spreadsheet_id: &str,
        requests: &[Map<String, Value>],
    ) -> Result<Value, BackendError> {
        const CONTEXT: &str = "unable to batch update";
        let url = self.endpoint(
            CONTEXT,
            &["v4", "spreadsheets", &format!("{spreadsheet_id}:batchUpdate")],
        )?;
        let body = json!({ "requests": requests });
        let resp: BatchUpdateResponse = self.send(CONTEXT, self.http.post(url).json(&body)).await?;
        Ok(json!({
            "spreadsheet_id": resp.spreadsheet_id,
            "replies_count": resp.replies.len(),
            "message": "Batch update completed successfully",
        }))
    }
}
