//! Read-only SQLite access to the databases in the data directory

use async_trait::async_trait;
use rusqlite::{Connection, OpenFlags, types::ValueRef};
use sage_agent::tool::{Tool, ToolError, ToolOutput, int_arg, str_arg};
use serde_json::{Value, json};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use super::until_cancelled;

const MAX_ROWS: usize = 200;

/// Statements a query may start with
const READ_ONLY_KEYWORDS: &[&str] = &["SELECT", "WITH", "PRAGMA", "EXPLAIN", "VALUES"];

/// The `<name>.db` files under one directory
#[derive(Debug, Clone)]
pub struct Databases {
    data_dir: PathBuf,
}

impl Databases {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn path(&self, name: &str) -> Result<PathBuf, ToolError> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(ToolError::invalid(format!(
                "'{}' is not a valid database name",
                name
            )));
        }

        let path = self.data_dir.join(format!("{}.db", name));
        if !path.is_file() {
            return Err(ToolError::execution(format!(
                "Database '{}' not found at {}",
                name,
                path.display()
            )));
        }
        Ok(path)
    }

    /// Run `f` against a read-only connection on the blocking pool
    async fn with_connection<T, F>(&self, name: &str, f: F) -> Result<T, ToolError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let path = self.path(name)?;
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open_with_flags(
                &path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            f(&conn)
        })
        .await
        .map_err(|e| ToolError::execution(format!("Database task failed: {}", e)))?
        .map_err(|e| ToolError::execution(format!("Error executing query: {}", e)))
    }

    async fn list(&self) -> ToolOutput {
        let mut names = Vec::new();
        if let Ok(mut entries) = tokio::fs::read_dir(&self.data_dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "db") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        names.push(stem.to_string());
                    }
                }
            }
        }
        names.sort();

        if names.is_empty() {
            return Ok(format!(
                "No databases found in {}.",
                self.data_dir.display()
            ));
        }
        let lines: Vec<String> = names.iter().map(|n| format!("  - {}", n)).collect();
        Ok(format!("Available databases:\n{}", lines.join("\n")))
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn render_value(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => format!("<{} bytes>", b.len()),
    }
}

fn schema(conn: &Connection) -> rusqlite::Result<String> {
    let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type='table'")?;
    let tables: Vec<String> = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;

    let mut sections = Vec::new();
    for table in tables {
        let mut info = conn.prepare(&format!("PRAGMA table_info({})", quote_identifier(&table)))?;
        let columns: Vec<String> = info
            .query_map([], |row| {
                let name: String = row.get(1)?;
                let kind: String = row.get(2)?;
                Ok(format!("{} ({})", name, kind))
            })?
            .collect::<rusqlite::Result<_>>()?;
        sections.push(format!("Table: {}\n  Columns: {}", table, columns.join(", ")));
    }
    Ok(sections.join("\n\n"))
}

/// Run one statement and render its rows as a ` | ` separated table
fn run_query(conn: &Connection, sql: &str) -> rusqlite::Result<String> {
    let mut stmt = conn.prepare(sql)?;
    let header = stmt
        .column_names()
        .into_iter()
        .collect::<Vec<_>>()
        .join(" | ");
    let width = stmt.column_count();

    let mut lines = Vec::new();
    let mut total = 0usize;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        total += 1;
        if lines.len() < MAX_ROWS {
            let cells = (0..width)
                .map(|i| row.get_ref(i).map(render_value))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            lines.push(cells.join(" | "));
        }
    }

    if total == 0 {
        return Ok("No results found.".to_string());
    }
    let mut out = format!("{}\n{}\n{}", header, "-".repeat(header.chars().count()), lines.join("\n"));
    if total > MAX_ROWS {
        out.push_str(&format!("\n[{} more rows not shown]", total - MAX_ROWS));
    }
    Ok(out)
}

fn ensure_read_only(sql: &str) -> Result<(), ToolError> {
    let keyword = sql
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or("")
        .to_uppercase();
    if READ_ONLY_KEYWORDS.contains(&keyword.as_str()) {
        Ok(())
    } else {
        Err(ToolError::invalid(format!(
            "only read-only queries are allowed (SELECT, WITH, PRAGMA), got '{}'",
            keyword
        )))
    }
}

fn database_schema_property() -> Value {
    json!({
        "type": "string",
        "description": "Name of the database, without the .db extension"
    })
}

pub struct ListDatabasesTool {
    databases: Databases,
}

impl ListDatabasesTool {
    pub fn new(databases: Databases) -> Self {
        Self { databases }
    }
}

#[async_trait]
impl Tool for ListDatabasesTool {
    fn name(&self) -> &str {
        "list_available_databases"
    }

    fn description(&self) -> &str {
        "List the SQLite databases that can be queried."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _arguments: Value, cancel: CancellationToken) -> ToolOutput {
        until_cancelled(&cancel, self.databases.list()).await
    }
}

pub struct DatabaseSchemaTool {
    databases: Databases,
}

impl DatabaseSchemaTool {
    pub fn new(databases: Databases) -> Self {
        Self { databases }
    }
}

#[async_trait]
impl Tool for DatabaseSchemaTool {
    fn name(&self) -> &str {
        "get_database_schema"
    }

    fn description(&self) -> &str {
        "Show the tables and columns of a database. Call this before writing a query."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "database_name": database_schema_property() },
            "required": ["database_name"]
        })
    }

    async fn execute(&self, arguments: Value, cancel: CancellationToken) -> ToolOutput {
        let name = str_arg(&arguments, "database_name")?;
        until_cancelled(&cancel, self.databases.with_connection(name, schema)).await
    }
}

pub struct ExploreTableTool {
    databases: Databases,
}

impl ExploreTableTool {
    pub fn new(databases: Databases) -> Self {
        Self { databases }
    }
}

#[async_trait]
impl Tool for ExploreTableTool {
    fn name(&self) -> &str {
        "explore_table"
    }

    fn description(&self) -> &str {
        "Show sample rows from a table."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "database_name": database_schema_property(),
                "table_name": { "type": "string", "description": "Table to sample" },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of rows to return (default: 10)"
                }
            },
            "required": ["database_name", "table_name"]
        })
    }

    async fn execute(&self, arguments: Value, cancel: CancellationToken) -> ToolOutput {
        let name = str_arg(&arguments, "database_name")?;
        let table = str_arg(&arguments, "table_name")?;
        let limit = int_arg(&arguments, "limit", 10)?.clamp(1, MAX_ROWS as i64);

        let sql = format!("SELECT * FROM {} LIMIT {}", quote_identifier(table), limit);
        until_cancelled(
            &cancel,
            self.databases
                .with_connection(name, move |conn| run_query(conn, &sql)),
        )
        .await
    }
}

pub struct QueryDatabaseTool {
    databases: Databases,
}

impl QueryDatabaseTool {
    pub fn new(databases: Databases) -> Self {
        Self { databases }
    }
}

#[async_trait]
impl Tool for QueryDatabaseTool {
    fn name(&self) -> &str {
        "query_database"
    }

    fn description(&self) -> &str {
        "Run a read-only SQL query (SELECT, WITH or PRAGMA) against a database."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "database_name": database_schema_property(),
                "sql_query": { "type": "string", "description": "The SQL query to execute" }
            },
            "required": ["database_name", "sql_query"]
        })
    }

    async fn execute(&self, arguments: Value, cancel: CancellationToken) -> ToolOutput {
        let name = str_arg(&arguments, "database_name")?;
        let sql = str_arg(&arguments, "sql_query")?.to_string();
        ensure_read_only(&sql)?;
        until_cancelled(
            &cancel,
            self.databases
                .with_connection(name, move |conn| run_query(conn, &sql)),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, Databases) {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(dir.path().join("baseball.db")).unwrap();
        conn.execute_batch(
            "CREATE TABLE players (player_id INTEGER PRIMARY KEY, name TEXT NOT NULL);
             CREATE TABLE statistics (player_id INTEGER, year INTEGER, walks INTEGER);
             INSERT INTO players VALUES (1, 'Derek Jeter'), (2, 'Mariano Rivera');
             INSERT INTO statistics VALUES (1, 1998, 57), (2, 1998, NULL);",
        )
        .unwrap();
        let databases = Databases::new(dir.path());
        (dir, databases)
    }

    async fn run(tool: &dyn Tool, args: Value) -> ToolOutput {
        tool.execute(args, CancellationToken::new()).await
    }

    #[tokio::test]
    async fn test_list_databases() {
        let (dir, databases) = fixture();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        let out = run(&ListDatabasesTool::new(databases), json!({})).await.unwrap();
        assert_eq!(out, "Available databases:\n  - baseball");
    }

    #[tokio::test]
    async fn test_list_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out = run(&ListDatabasesTool::new(Databases::new(dir.path())), json!({}))
            .await
            .unwrap();
        assert!(out.starts_with("No databases found in"));
    }

    #[tokio::test]
    async fn test_schema() {
        let (_dir, databases) = fixture();
        let out = run(
            &DatabaseSchemaTool::new(databases),
            json!({"database_name": "baseball"}),
        )
        .await
        .unwrap();
        assert_eq!(
            out,
            "Table: players\n  Columns: player_id (INTEGER), name (TEXT)\n\n\
             Table: statistics\n  Columns: player_id (INTEGER), year (INTEGER), walks (INTEGER)"
        );
    }

    #[tokio::test]
    async fn test_query() {
        let (_dir, databases) = fixture();
        let tool = QueryDatabaseTool::new(databases);
        let out = run(
            &tool,
            json!({
                "database_name": "baseball",
                "sql_query": "SELECT p.name, s.walks FROM players p JOIN statistics s USING (player_id) ORDER BY p.player_id"
            }),
        )
        .await
        .unwrap();
        assert_eq!(
            out,
            "name | walks\n------------\nDerek Jeter | 57\nMariano Rivera | NULL"
        );

        let empty = run(
            &tool,
            json!({"database_name": "baseball", "sql_query": "SELECT * FROM players WHERE 0"}),
        )
        .await
        .unwrap();
        assert_eq!(empty, "No results found.");
    }

    #[tokio::test]
    async fn test_writes_are_rejected() {
        let (_dir, databases) = fixture();
        let tool = QueryDatabaseTool::new(databases.clone());
        let err = run(
            &tool,
            json!({"database_name": "baseball", "sql_query": "DELETE FROM players"}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));

        // The connection itself is read-only too
        let err = run(
            &tool,
            json!({"database_name": "baseball", "sql_query": "WITH x AS (SELECT 1) DELETE FROM players"}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolError::Execution(_)));

        let rows = run(
            &tool,
            json!({"database_name": "baseball", "sql_query": "SELECT COUNT(*) AS n FROM players"}),
        )
        .await
        .unwrap();
        assert!(rows.ends_with("\n2"));
    }

    #[tokio::test]
    async fn test_explore_table() {
        let (_dir, databases) = fixture();
        let out = run(
            &ExploreTableTool::new(databases),
            json!({"database_name": "baseball", "table_name": "players", "limit": 1}),
        )
        .await
        .unwrap();
        assert_eq!(out, "player_id | name\n----------------\n1 | Derek Jeter");
    }

    #[tokio::test]
    async fn test_unknown_and_invalid_names() {
        let (_dir, databases) = fixture();
        let tool = DatabaseSchemaTool::new(databases);

        let err = run(&tool, json!({"database_name": "olympics"})).await.unwrap_err();
        assert!(matches!(err, ToolError::Execution(m) if m.starts_with("Database 'olympics' not found")));

        let err = run(&tool, json!({"database_name": "../baseball"})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("players"), "\"players\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }
}
