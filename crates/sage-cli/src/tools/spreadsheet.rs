//! Excel and OpenDocument spreadsheets

use super::data::Table;
use async_trait::async_trait;
use calamine::{Reader, open_workbook_auto};
use sage_agent::tool::{Tool, ToolError, ToolOutput, opt_str_arg, str_arg};
use serde_json::{Value, json};
use std::fmt::Display;
use tokio_util::sync::CancellationToken;

fn read_error(e: impl Display) -> ToolError {
    ToolError::execution(format!("Error reading Excel file: {}", e))
}

/// First row of the sheet is the header
fn read_sheet(path: &str, sheet: Option<&str>) -> Result<Table, ToolError> {
    let mut workbook = open_workbook_auto(path).map_err(read_error)?;
    let name = match sheet {
        Some(name) => name.to_string(),
        None => workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| ToolError::execution(format!("{} has no sheets", path)))?,
    };
    let range = workbook.worksheet_range(&name).map_err(read_error)?;

    let records: Vec<Vec<String>> = range
        .rows()
        .map(|row| row.iter().map(|cell| cell.to_string()).collect())
        .collect();
    Table::from_records(records)
        .ok_or_else(|| ToolError::execution(format!("Sheet '{}' in {} is empty", name, path)))
}

async fn load_sheet(path: &str, sheet: Option<&str>) -> Result<Table, ToolError> {
    if tokio::fs::metadata(path).await.is_err() {
        return Err(ToolError::execution(format!("File not found: {}", path)));
    }

    let path = path.to_string();
    let sheet = sheet.map(str::to_string);
    tokio::task::spawn_blocking(move || read_sheet(&path, sheet.as_deref()))
        .await
        .map_err(|e| ToolError::execution(format!("Spreadsheet task failed: {}", e)))?
}

fn file_path_property() -> Value {
    json!({ "type": "string", "description": "Path to the spreadsheet (.xlsx, .xls, .ods)" })
}

pub struct ReadExcelTool;

#[async_trait]
impl Tool for ReadExcelTool {
    fn name(&self) -> &str {
        "read_excel_file"
    }

    fn description(&self) -> &str {
        "Summarize a spreadsheet: its shape, column names, first rows and column types."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": file_path_property(),
                "sheet_name": {
                    "type": "string",
                    "description": "Sheet to read (default: first sheet)"
                }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, arguments: Value, cancel: CancellationToken) -> ToolOutput {
        let path = str_arg(&arguments, "file_path")?;
        let sheet = opt_str_arg(&arguments, "sheet_name");
        let table = super::until_cancelled(&cancel, load_sheet(path, sheet)).await?;
        Ok(table.summary(&format!("Excel file: {}", path), true))
    }
}

pub struct AnalyzeExcelTool;

#[async_trait]
impl Tool for AnalyzeExcelTool {
    fn name(&self) -> &str {
        "analyze_excel_data"
    }

    fn description(&self) -> &str {
        "Answer a simple question about a spreadsheet: sum, count, average, \
         totals by category, or summary statistics."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": file_path_property(),
                "query": {
                    "type": "string",
                    "description": "Question such as \"sum of sales\" or \"total sales by category\""
                }
            },
            "required": ["file_path", "query"]
        })
    }

    async fn execute(&self, arguments: Value, cancel: CancellationToken) -> ToolOutput {
        let path = str_arg(&arguments, "file_path")?;
        let query = str_arg(&arguments, "query")?;
        let table = super::until_cancelled(&cancel, load_sheet(path, None)).await?;

        let mut lines = vec![format!("Analyzing: {}", path), format!("Query: {}\n", query)];
        lines.extend(table.analyze(query));
        Ok(lines.join("\n"))
    }
}

pub struct FilterExcelTool;

#[async_trait]
impl Tool for FilterExcelTool {
    fn name(&self) -> &str {
        "filter_excel_data"
    }

    fn description(&self) -> &str {
        "List the spreadsheet rows where a column matches a condition (>, <, ==, !=, contains)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": file_path_property(),
                "column": { "type": "string", "description": "Column to filter on" },
                "condition": {
                    "type": "string",
                    "enum": [">", "<", "==", "!=", "contains"],
                    "description": "Comparison operator"
                },
                "value": { "type": "string", "description": "Value to compare against" }
            },
            "required": ["file_path", "column", "condition", "value"]
        })
    }

    async fn execute(&self, arguments: Value, cancel: CancellationToken) -> ToolOutput {
        let path = str_arg(&arguments, "file_path")?;
        let column = str_arg(&arguments, "column")?;
        let condition = str_arg(&arguments, "condition")?;
        let value = str_arg(&arguments, "value")?;
        let table = super::until_cancelled(&cancel, load_sheet(path, None)).await?;
        table.filter(column, condition, value)
    }
}

pub struct CalculateExcelTool;

#[async_trait]
impl Tool for CalculateExcelTool {
    fn name(&self) -> &str {
        "calculate_from_excel"
    }

    fn description(&self) -> &str {
        "Compute sum, average, max, min or count over one spreadsheet column."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": file_path_property(),
                "operation": {
                    "type": "string",
                    "description": "sum, average, mean, max, min or count"
                },
                "column": { "type": "string", "description": "Column to compute over" }
            },
            "required": ["file_path", "operation", "column"]
        })
    }

    async fn execute(&self, arguments: Value, cancel: CancellationToken) -> ToolOutput {
        let path = str_arg(&arguments, "file_path")?;
        let operation = str_arg(&arguments, "operation")?;
        let column = str_arg(&arguments, "column")?;
        let table = super::until_cancelled(&cancel, load_sheet(path, None)).await?;
        table.calculate(operation, column)
    }
}
