use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::backend::{BackendError, SpreadsheetBackend};

/// The closed set of tools this server exposes, in listing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    ReadSheet,
    WriteSheet,
    AppendSheet,
    CreateSpreadsheet,
    GetSpreadsheetInfo,
    AddSheet,
    ClearSheet,
    BatchUpdate,
}

impl ToolName {
    pub const ALL: [ToolName; 8] = [
        ToolName::ReadSheet,
        ToolName::WriteSheet,
        ToolName::AppendSheet,
        ToolName::CreateSpreadsheet,
        ToolName::GetSpreadsheetInfo,
        ToolName::AddSheet,
        ToolName::ClearSheet,
        ToolName::BatchUpdate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::ReadSheet => "read_sheet",
            ToolName::WriteSheet => "write_sheet",
            ToolName::AppendSheet => "append_sheet",
            ToolName::CreateSpreadsheet => "create_spreadsheet",
            ToolName::GetSpreadsheetInfo => "get_spreadsheet_info",
            ToolName::AddSheet => "add_sheet",
            ToolName::ClearSheet => "clear_sheet",
            ToolName::BatchUpdate => "batch_update",
        }
    }

    /// Exact, case-sensitive match.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.as_str() == name)
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct ToolDefinition {
    pub name: ToolName,
    pub description: &'static str,
    pub input_schema: Value,
}

/// Immutable catalog built once at startup.
#[derive(Debug)]
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: ToolName::ALL.into_iter().map(tool_definition).collect(),
        }
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn list_payload(&self) -> Value {
        let tools: Vec<Value> = self
            .definitions()
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name.as_str(),
                    "description": tool.description,
                    "inputSchema": tool.input_schema,
                })
            })
            .collect();
        json!({ "tools": tools })
    }
}

fn spreadsheet_id_property(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

fn rows_property(description: &str) -> Value {
    json!({
        "type": "array",
        "description": description,
        "items": { "type": "array", "items": { "type": "string" } }
    })
}

fn tool_definition(name: ToolName) -> ToolDefinition {
    let from_url = "The ID of the Google Spreadsheet (from the URL)";
    let plain_id = "The ID of the Google Spreadsheet";
    let (description, input_schema) = match name {
        ToolName::ReadSheet => (
            "Read data from a Google Sheet. Specify the spreadsheet ID and optional range (e.g., 'Sheet1!A1:D10'). If no range is provided, reads the entire first sheet.",
            json!({
                "type": "object",
                "properties": {
                    "spreadsheet_id": spreadsheet_id_property(from_url),
                    "range": {
                        "type": "string",
                        "description": "The A1 notation range to read (e.g., 'Sheet1!A1:D10'). Optional - defaults to entire first sheet."
                    }
                },
                "required": ["spreadsheet_id"]
            }),
        ),
        ToolName::WriteSheet => (
            "Write data to a Google Sheet. Specify the spreadsheet ID, range, and data as a 2D array. Data overwrites existing content in the range.",
            json!({
                "type": "object",
                "properties": {
                    "spreadsheet_id": spreadsheet_id_property(from_url),
                    "range": {
                        "type": "string",
                        "description": "The A1 notation range to write to (e.g., 'Sheet1!A1:D10')"
                    },
                    "values": rows_property("2D array of values to write (array of rows, each row is an array of cell values)")
                },
                "required": ["spreadsheet_id", "range", "values"]
            }),
        ),
        ToolName::AppendSheet => (
            "Append data to a Google Sheet. Adds new rows after the last row with data in the specified range.",
            json!({
                "type": "object",
                "properties": {
                    "spreadsheet_id": spreadsheet_id_property(from_url),
                    "range": {
                        "type": "string",
                        "description": "The A1 notation range (e.g., 'Sheet1!A:D' or 'Sheet1')"
                    },
                    "values": rows_property("2D array of values to append (array of rows)")
                },
                "required": ["spreadsheet_id", "range", "values"]
            }),
        ),
        ToolName::CreateSpreadsheet => (
            "Create a new Google Spreadsheet with the specified title and optional sheet names.",
            json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string", "description": "The title of the new spreadsheet" },
                    "sheets": {
                        "type": "array",
                        "description": "Optional array of sheet names to create. If not provided, creates one default sheet.",
                        "items": { "type": "string" }
                    }
                },
                "required": ["title"]
            }),
        ),
        ToolName::GetSpreadsheetInfo => (
            "Get metadata about a spreadsheet including title, sheets, and properties.",
            json!({
                "type": "object",
                "properties": {
                    "spreadsheet_id": spreadsheet_id_property(from_url)
                },
                "required": ["spreadsheet_id"]
            }),
        ),
        ToolName::AddSheet => (
            "Add a new sheet (tab) to an existing spreadsheet.",
            json!({
                "type": "object",
                "properties": {
                    "spreadsheet_id": spreadsheet_id_property(plain_id),
                    "sheet_name": { "type": "string", "description": "The name for the new sheet" }
                },
                "required": ["spreadsheet_id", "sheet_name"]
            }),
        ),
        ToolName::ClearSheet => (
            "Clear all data in a specified range of a Google Sheet.",
            json!({
                "type": "object",
                "properties": {
                    "spreadsheet_id": spreadsheet_id_property(plain_id),
                    "range": {
                        "type": "string",
                        "description": "The A1 notation range to clear (e.g., 'Sheet1!A1:D10' or 'Sheet1')"
                    }
                },
                "required": ["spreadsheet_id", "range"]
            }),
        ),
        ToolName::BatchUpdate => (
            "Perform multiple update operations on a spreadsheet in a single request. Supports formatting, adding sheets, and more complex operations.",
            json!({
                "type": "object",
                "properties": {
                    "spreadsheet_id": spreadsheet_id_property(plain_id),
                    "requests": {
                        "type": "array",
                        "description": "Array of update request objects (see Google Sheets API documentation for request format)",
                        "items": { "type": "object" }
                    }
                },
                "required": ["spreadsheet_id", "requests"]
            }),
        ),
    };
    ToolDefinition {
        name,
        description,
        input_schema,
    }
}

#[derive(Debug, Deserialize)]
struct RangeArgs {
    spreadsheet_id: String,
    #[serde(default)]
    range: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ValuesArgs {
    spreadsheet_id: String,
    range: String,
    values: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct CreateArgs {
    title: String,
    #[serde(default)]
    sheets: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetArgs {
    spreadsheet_id: String,
}

#[derive(Debug, Deserialize)]
struct AddSheetArgs {
    spreadsheet_id: String,
    sheet_name: String,
}

#[derive(Debug, Deserialize)]
struct ClearArgs {
    spreadsheet_id: String,
    range: String,
}

#[derive(Debug, Deserialize)]
struct BatchArgs {
    spreadsheet_id: String,
    requests: Vec<Map<String, Value>>,
}

/// A tool invocation with its arguments decoded into the tool's shape.
#[derive(Debug)]
pub enum ToolCall {
    ReadSheet {
        spreadsheet_id: String,
        range: Option<String>,
    },
    WriteSheet {
        spreadsheet_id: String,
        range: String,
        values: Vec<Vec<String>>,
    },
    AppendSheet {
        spreadsheet_id: String,
        range: String,
        values: Vec<Vec<String>>,
    },
    CreateSpreadsheet {
        title: String,
        sheets: Vec<String>,
    },
    GetSpreadsheetInfo {
        spreadsheet_id: String,
    },
    AddSheet {
        spreadsheet_id: String,
        sheet_name: String,
    },
    ClearSheet {
        spreadsheet_id: String,
        range: String,
    },
    BatchUpdate {
        spreadsheet_id: String,
        requests: Vec<Map<String, Value>>,
    },
}

impl ToolCall {
    pub fn decode(name: ToolName, arguments: Value) -> Result<Self, serde_json::Error> {
        Ok(match name {
            ToolName::ReadSheet => {
                let args: RangeArgs = serde_json::from_value(arguments)?;
                ToolCall::ReadSheet {
                    spreadsheet_id: args.spreadsheet_id,
                    range: args.range,
                }
            }
            ToolName::WriteSheet => {
                let args: ValuesArgs = serde_json::from_value(arguments)?;
                ToolCall::WriteSheet {
                    spreadsheet_id: args.spreadsheet_id,
                    range: args.range,
                    values: args.values,
                }
            }
            ToolName::AppendSheet => {
                let args: ValuesArgs = serde_json::from_value(arguments)?;
                ToolCall::AppendSheet {
                    spreadsheet_id: args.spreadsheet_id,
                    range: args.range,
                    values: args.values,
                }
            }
            ToolName::CreateSpreadsheet => {
                let args: CreateArgs = serde_json::from_value(arguments)?;
                ToolCall::CreateSpreadsheet {
                    title: args.title,
                    sheets: args.sheets,
                }
            }
            ToolName::GetSpreadsheetInfo => {
                let args: SpreadsheetArgs = serde_json::from_value(arguments)?;
                ToolCall::GetSpreadsheetInfo {
                    spreadsheet_id: args.spreadsheet_id,
                }
            }
            ToolName::AddSheet => {
                let args: AddSheetArgs = serde_json::from_value(arguments)?;
                ToolCall::AddSheet {
                    spreadsheet_id: args.spreadsheet_id,
                    sheet_name: args.sheet_name,
                }
            }
            ToolName::ClearSheet => {
                let args: ClearArgs = serde_json::from_value(arguments)?;
                ToolCall::ClearSheet {
                    spreadsheet_id: args.spreadsheet_id,
                    range: args.range,
                }
            }
            ToolName::BatchUpdate => {
                let args: BatchArgs = serde_json::from_value(arguments)?;
                ToolCall::BatchUpdate {
                    spreadsheet_id: args.spreadsheet_id,
                    requests: args.requests,
                }
            }
        })
    }

    pub async fn execute(&self, backend: &dyn SpreadsheetBackend) -> Result<Value, BackendError> {
        match self {
            ToolCall::ReadSheet {
                spreadsheet_id,
                range,
            } => backend.read_sheet(spreadsheet_id, range.as_deref()).await,
            ToolCall::WriteSheet {
                spreadsheet_id,
                range,
                values,
            } => backend.write_sheet(spreadsheet_id, range, values).await,
            ToolCall::AppendSheet {
                spreadsheet_id,
                range,
                values,
            } => backend.append_sheet(spreadsheet_id, range, values).await,
            ToolCall::CreateSpreadsheet { title, sheets } => {
                backend.create_spreadsheet(title, sheets).await
            }
            ToolCall::GetSpreadsheetInfo { spreadsheet_id } => {
                backend.get_spreadsheet_info(spreadsheet_id).await
            }
            ToolCall::AddSheet {
                spreadsheet_id,
                sheet_name,
            } => backend.add_sheet(spreadsheet_id, sheet_name).await,
            ToolCall::ClearSheet {
                spreadsheet_id,
                range,
            } => backend.clear_sheet(spreadsheet_id, range).await,
            ToolCall::BatchUpdate {
                spreadsheet_id,
                requests,
            } => backend.batch_update(spreadsheet_id, requests).await,
        }
    }
}
