//! Built-in tools for the question answering agent

mod chess;
mod code;
mod data;
mod database;
mod spreadsheet;
mod text;
mod web;

use sage_agent::tool::{BoxedTool, ToolError};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use chess::{AnalyzeChessTool, ChessPositionTool, ValidateChessMoveTool};
use code::{AnalyzeCodeOutputTool, EvaluateExpressionTool, ExecutePythonTool, PythonRunner};
use data::ReadCsvTool;
use database::{
    DatabaseSchemaTool, Databases, ExploreTableTool, ListDatabasesTool, QueryDatabaseTool,
};
use spreadsheet::{AnalyzeExcelTool, CalculateExcelTool, FilterExcelTool, ReadExcelTool};
use text::{
    CategorizeProduceTool, CheckPalindromeTool, CountWordsTool, ExtractNumbersTool,
    FindAntonymTool, ReverseTextTool, ReverseWordsTool, WordAtPositionTool,
};
use web::{
    ExtractLinksTool, ReadUrlTool, SearchClient, SearchInDocumentTool, WebSearchTool,
    WikipediaSearchTool,
};

/// What the built-in tools need from the environment
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub data_dir: PathBuf,
    pub python: String,
    pub tavily_api_key: Option<String>,
}

/// Resolve a tool future unless the session is cancelled first
pub(crate) async fn until_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, ToolError>>,
) -> Result<T, ToolError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ToolError::Cancelled),
        result = fut => result,
    }
}

/// Every built-in tool, in the order they are advertised to the model
pub fn builtin_tools(settings: &ToolSettings) -> anyhow::Result<Vec<BoxedTool>> {
    let http = web::http_client()?;
    let search = SearchClient::new(http.clone(), settings.tavily_api_key.clone());
    let python = PythonRunner::new(settings.python.clone());
    let databases = Databases::new(settings.data_dir.clone());

    let tools: Vec<BoxedTool> = vec![
        Arc::new(WebSearchTool::new(search.clone())),
        Arc::new(WikipediaSearchTool::new(search)),
        Arc::new(ReadUrlTool::new(http.clone())),
        Arc::new(ExtractLinksTool::new(http.clone())),
        Arc::new(SearchInDocumentTool::new(http)),
        Arc::new(ExecutePythonTool::new(python.clone())),
        Arc::new(EvaluateExpressionTool::new(python.clone())),
        Arc::new(AnalyzeCodeOutputTool::new(python)),
        Arc::new(ReverseTextTool),
        Arc::new(ReverseWordsTool),
        Arc::new(WordAtPositionTool),
        Arc::new(FindAntonymTool),
        Arc::new(CheckPalindromeTool),
        Arc::new(CountWordsTool),
        Arc::new(ExtractNumbersTool),
        Arc::new(CategorizeProduceTool),
        Arc::new(ListDatabasesTool::new(databases.clone())),
        Arc::new(DatabaseSchemaTool::new(databases.clone())),
        Arc::new(ExploreTableTool::new(databases.clone())),
        Arc::new(QueryDatabaseTool::new(databases)),
        Arc::new(ReadCsvTool),
        Arc::new(ReadExcelTool),
        Arc::new(AnalyzeExcelTool),
        Arc::new(FilterExcelTool),
        Arc::new(CalculateExcelTool),
        Arc::new(ChessPositionTool),
        Arc::new(ValidateChessMoveTool),
        Arc::new(AnalyzeChessTool),
    ];
    Ok(tools)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sage_agent::ToolRegistry;

    fn settings() -> ToolSettings {
        ToolSettings {
            data_dir: PathBuf::from("data"),
            python: "python3".into(),
            tavily_api_key: None,
        }
    }

    #[test]
    fn test_builtin_tools_register_cleanly() {
        let registry = ToolRegistry::register(builtin_tools(&settings()).unwrap()).unwrap();
        assert_eq!(registry.len(), 28);
        for name in [
            "web_search",
            "evaluate_python_expression",
            "reverse_text",
            "query_database",
            "read_csv_file",
            "get_chess_position_info",
            "read_excel_file",
            "calculate_from_excel",
            "validate_chess_move",
            "analyze_chess_fen",
            "analyze_code_output",
        ] {
            assert!(registry.lookup(name).is_ok(), "{}", name);
        }
    }

    #[test]
    fn test_every_tool_declares_an_object_schema() {
        for tool in builtin_tools(&settings()).unwrap() {
            let schema = tool.parameters_schema();
            assert_eq!(schema["type"], "object", "{}", tool.name());
            assert!(!tool.description().is_empty(), "{}", tool.name());
        }
    }

    #[tokio::test]
    async fn test_until_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), ToolError> =
            until_cancelled(&cancel, std::future::pending()).await;
        assert_eq!(result, Err(ToolError::Cancelled));
    }
}
