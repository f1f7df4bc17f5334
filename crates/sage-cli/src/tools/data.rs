//! Tabular data files
//!
//! [`Table`] holds every cell as text and infers column types on demand. The
//! CSV tool and the spreadsheet tools share its summary, filter and
//! statistics code.

use async_trait::async_trait;
use regex::RegexBuilder;
use sage_agent::tool::{Tool, ToolError, ToolOutput, opt_str_arg, str_arg};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

const PREVIEW_ROWS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Int,
    Float,
    Text,
}

impl ColumnType {
    fn dtype(self) -> &'static str {
        match self {
            ColumnType::Int => "int64",
            ColumnType::Float => "float64",
            ColumnType::Text => "object",
        }
    }

    fn is_numeric(self) -> bool {
        self != ColumnType::Text
    }
}

/// Right-aligned columns under a header, with a left-aligned index column
fn render_grid(header: &[String], rows: &[(String, Vec<String>)]) -> String {
    let index_width = rows
        .iter()
        .map(|(index, _)| index.chars().count())
        .max()
        .unwrap_or(0);
    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for (_, cells) in rows {
        for (i, cell) in cells.iter().enumerate().take(widths.len()) {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let render_line = |index: &str, cells: &[String]| {
        let mut line = format!("{:<width$}", index, width = index_width);
        for (i, width) in widths.iter().enumerate() {
            let cell = cells.get(i).map_or("", String::as_str);
            line.push_str(&format!("  {:>width$}", cell, width = width));
        }
        line
    };

    let mut lines = vec![render_line("", header)];
    for (index, cells) in rows {
        lines.push(render_line(index, cells));
    }
    lines.join("\n")
}

/// Index labels left-aligned, values right-aligned
fn render_series(entries: &[(String, String)]) -> String {
    let key_width = entries.iter().map(|(k, _)| k.chars().count()).max().unwrap_or(0);
    let value_width = entries.iter().map(|(_, v)| v.chars().count()).max().unwrap_or(0);
    entries
        .iter()
        .map(|(k, v)| format!("{:<kw$}    {:>vw$}", k, v, kw = key_width, vw = value_width))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_number(value: f64) -> String {
    format!("{}", value)
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation
fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Linear interpolation between the closest ranks; `sorted` must not be empty
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (position - lower as f64)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// A header row and the records under it
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Table {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// First record is the header; the rest are padded or cut to its width
    pub(crate) fn from_records(records: Vec<Vec<String>>) -> Option<Self> {
        let mut records = records.into_iter();
        let header = records.next()?;
        let rows = records
            .map(|mut row| {
                row.resize(header.len(), String::new());
                row
            })
            .collect();
        Some(Self { header, rows })
    }

    pub(crate) fn from_csv(text: &str, delimiter: u8) -> Result<Option<Self>, csv::Error> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut records = Vec::new();
        for record in reader.records() {
            let record = record?;
            if record.len() == 1 && record[0].trim().is_empty() {
                continue;
            }
            records.push(record.iter().map(str::to_string).collect());
        }
        Ok(Self::from_records(records))
    }

    fn column_list(&self) -> String {
        self.header.join(", ")
    }

    fn column_index(&self, name: &str) -> Result<usize, ToolError> {
        self.header.iter().position(|h| h == name).ok_or_else(|| {
            ToolError::execution(format!(
                "Column '{}' not found. Available: {}",
                name,
                self.column_list()
            ))
        })
    }

    fn cells(&self, column: usize) -> impl Iterator<Item = &str> {
        self.rows.iter().map(move |row| row[column].as_str())
    }

    fn column_type(&self, column: usize) -> ColumnType {
        if self.rows.is_empty() {
            return ColumnType::Text;
        }
        let mut ty = ColumnType::Int;
        let mut saw_empty = false;
        for cell in self.cells(column).map(str::trim) {
            if cell.is_empty() {
                saw_empty = true;
                continue;
            }
            if cell.parse::<i64>().is_err() {
                if cell.parse::<f64>().is_err() {
                    return ColumnType::Text;
                }
                ty = ColumnType::Float;
            }
        }
        // Missing values force a float column
        if saw_empty && ty == ColumnType::Int {
            ColumnType::Float
        } else {
            ty
        }
    }

    fn numbers(&self, column: usize) -> Vec<f64> {
        self.cells(column)
            .filter_map(|cell| cell.trim().parse::<f64>().ok())
            .collect()
    }

    /// The rows at `indices`, labelled with their position in the table
    pub(crate) fn render(&self, indices: &[usize]) -> String {
        if indices.is_empty() {
            return format!(
                "Empty DataFrame\nColumns: [{}]\nIndex: []",
                self.column_list()
            );
        }
        let rows: Vec<(String, Vec<String>)> = indices
            .iter()
            .map(|&i| (i.to_string(), self.rows[i].clone()))
            .collect();
        render_grid(&self.header, &rows)
    }

    /// Shape, columns and the first rows under `title`
    pub(crate) fn summary(&self, title: &str, with_types: bool) -> String {
        let preview: Vec<usize> = (0..self.rows.len().min(PREVIEW_ROWS)).collect();
        let mut lines = vec![
            title.to_string(),
            format!(
                "Shape: {} rows × {} columns",
                self.rows.len(),
                self.header.len()
            ),
            format!("\nColumns: {}", self.column_list()),
            "\nFirst 5 rows:".to_string(),
            self.render(&preview),
        ];
        if with_types {
            let types: Vec<(String, String)> = (0..self.header.len())
                .map(|i| {
                    (
                        self.header[i].clone(),
                        self.column_type(i).dtype().to_string(),
                    )
                })
                .collect();
            lines.push("\nData types:".to_string());
            lines.push(render_series(&types));
        }
        lines.join("\n")
    }

    /// Rows where `column <condition> value` holds
    pub(crate) fn filter(
        &self,
        column: &str,
        condition: &str,
        value: &str,
    ) -> Result<String, ToolError> {
        let col = self.column_index(column)?;
        let number = value.trim().parse::<f64>().ok();
        let cell_number = |cell: &str| cell.trim().parse::<f64>().ok();

        let matches: Vec<usize> = match condition {
            ">" | "<" => {
                let bound = number.ok_or_else(|| {
                    ToolError::invalid(format!("could not convert '{}' to a number", value))
                })?;
                let greater = condition == ">";
                (0..self.rows.len())
                    .filter(|&i| {
                        cell_number(&self.rows[i][col])
                            .is_some_and(|n| if greater { n > bound } else { n < bound })
                    })
                    .collect()
            }
            "==" | "!=" => {
                let equal = |cell: &str| match number {
                    Some(target) => cell_number(cell) == Some(target),
                    None => cell == value,
                };
                let want = condition == "==";
                (0..self.rows.len())
                    .filter(|&i| equal(&self.rows[i][col]) == want)
                    .collect()
            }
            "contains" => {
                let pattern = RegexBuilder::new(value)
                    .case_insensitive(true)
                    .build()
                    .or_else(|_| {
                        RegexBuilder::new(&regex::escape(value))
                            .case_insensitive(true)
                            .build()
                    })
                    .map_err(|e| ToolError::invalid(format!("Invalid pattern: {}", e)))?;
                (0..self.rows.len())
                    .filter(|&i| pattern.is_match(&self.rows[i][col]))
                    .collect()
            }
            other => {
                return Err(ToolError::execution(format!(
                    "Unknown condition '{}'. Use: >, <, ==, !=, contains",
                    other
                )));
            }
        };

        Ok([
            format!("Filter: {} {} {}", column, condition, value),
            format!("Matches found: {} rows", matches.len()),
            "\nFiltered data:".to_string(),
            self.render(&matches),
        ]
        .join("\n"))
    }

    /// One aggregate over a column
    pub(crate) fn calculate(&self, operation: &str, column: &str) -> Result<String, ToolError> {
        let col = self.column_index(column)?;
        let numeric = self.column_type(col).is_numeric();
        let numbers = self.numbers(col);
        let non_numeric = || {
            ToolError::execution(format!(
                "Cannot compute {} of non-numeric column '{}'",
                operation.to_lowercase(),
                column
            ))
        };

        let result = match operation.to_lowercase().as_str() {
            "sum" if numeric => format_number(numbers.iter().sum()),
            "average" | "mean" if numeric => format_number(mean(&numbers)),
            "sum" | "average" | "mean" => return Err(non_numeric()),
            "max" | "min" if numeric => {
                let pick = if operation.eq_ignore_ascii_case("max") {
                    f64::max
                } else {
                    f64::min
                };
                numbers
                    .iter()
                    .copied()
                    .reduce(pick)
                    .map_or_else(|| "nan".to_string(), format_number)
            }
            "max" | "min" => {
                let cells = self.cells(col).filter(|c| !c.is_empty());
                let picked = if operation.eq_ignore_ascii_case("max") {
                    cells.max()
                } else {
                    cells.min()
                };
                picked.unwrap_or("nan").to_string()
            }
            "count" => self
                .cells(col)
                .filter(|c| !c.trim().is_empty())
                .count()
                .to_string(),
            _ => {
                return Err(ToolError::execution(format!(
                    "Unknown operation '{}'. Use: sum, average, max, min, count",
                    operation
                )));
            }
        };
        Ok(format!("{} of '{}': {}", capitalize(operation), column, result))
    }

    /// Keyword-driven analysis: sums, counts, averages, grouping or statistics
    pub(crate) fn analyze(&self, query: &str) -> Vec<String> {
        let query = query.to_lowercase();
        let mentioned = |name: &&String| !name.is_empty() && query.contains(&name.to_lowercase());
        let numeric_mentioned = || {
            self.header
                .iter()
                .enumerate()
                .filter(|(i, name)| mentioned(name) && self.column_type(*i).is_numeric())
                .map(|(i, name)| (name.clone(), self.numbers(i)))
                .collect::<Vec<_>>()
        };

        let mut lines = Vec::new();
        if query.contains("sum") {
            for (name, numbers) in numeric_mentioned() {
                lines.push(format!(
                    "Sum of '{}': {}",
                    name,
                    format_number(numbers.iter().sum())
                ));
            }
        } else if query.contains("count") || query.contains("how many") {
            lines.push(format!("Total rows: {}", self.rows.len()));
        } else if query.contains("average") || query.contains("mean") {
            for (name, numbers) in numeric_mentioned() {
                lines.push(format!("Average of '{}': {}", name, format_number(mean(&numbers))));
            }
        } else if query.contains("by") {
            if let Some(grouped) = self.group_sums() {
                lines.push(grouped);
            }
        } else if query.contains("filter") || query.contains("where") {
            lines.push("Available columns for filtering:".to_string());
            lines.push(self.column_list());
            lines.push("\nPlease use execute_python_code for complex filtering".to_string());
        } else {
            lines.push("Summary statistics:".to_string());
            lines.push(self.describe());
        }

        if lines.is_empty() {
            lines.push("Could not parse query. Available columns:".to_string());
            lines.push(self.column_list());
        }
        lines
    }

    /// Sums of the value-like column per category-like column
    fn group_sums(&self) -> Option<String> {
        let find = |keys: &[&str]| {
            self.header
                .iter()
                .rposition(|h| keys.iter().any(|k| h.to_lowercase().contains(k)))
        };
        let group = find(&["category", "type", "group"])?;
        let value = find(&["sales", "amount", "value"])?;

        let mut sums: BTreeMap<&str, f64> = BTreeMap::new();
        for row in &self.rows {
            let key = row[group].as_str();
            if key.is_empty() {
                continue;
            }
            let amount = row[value].trim().parse::<f64>().unwrap_or(0.0);
            *sums.entry(key).or_default() += amount;
        }

        let entries: Vec<(String, String)> = sums
            .into_iter()
            .map(|(k, v)| (k.to_string(), format_number(v)))
            .collect();
        Some(format!(
            "\nGrouped by '{}':\n{}\n{}\nName: {}, dtype: {}",
            self.header[group],
            self.header[group],
            render_series(&entries),
            self.header[value],
            self.column_type(value).dtype()
        ))
    }

    /// Count, mean, spread and quartiles per numeric column
    fn describe(&self) -> String {
        let numeric: Vec<usize> = (0..self.header.len())
            .filter(|&i| self.column_type(i).is_numeric())
            .collect();
        if numeric.is_empty() {
            return self.describe_text();
        }

        let stats = ["count", "mean", "std", "min", "25%", "50%", "75%", "max"];
        let columns: Vec<Vec<String>> = numeric
            .iter()
            .map(|&i| {
                let mut values = self.numbers(i);
                values.sort_by(f64::total_cmp);
                let figures = if values.is_empty() {
                    vec![0.0, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN]
                } else {
                    vec![
                        values.len() as f64,
                        mean(&values),
                        std_dev(&values),
                        values[0],
                        quantile(&values, 0.25),
                        quantile(&values, 0.5),
                        quantile(&values, 0.75),
                        values[values.len() - 1],
                    ]
                };
                figures.iter().map(|f| format!("{:.6}", f)).collect()
            })
            .collect();

        let header: Vec<String> = numeric.iter().map(|&i| self.header[i].clone()).collect();
        let rows: Vec<(String, Vec<String>)> = stats
            .iter()
            .enumerate()
            .map(|(s, name)| {
                (
                    name.to_string(),
                    columns.iter().map(|c| c[s].clone()).collect(),
                )
            })
            .collect();
        render_grid(&header, &rows)
    }

    /// Count, distinct values and the most frequent value per column
    fn describe_text(&self) -> String {
        let columns: Vec<Vec<String>> = (0..self.header.len())
            .map(|i| {
                let mut freq: BTreeMap<&str, usize> = BTreeMap::new();
                for cell in self.cells(i).filter(|c| !c.is_empty()) {
                    *freq.entry(cell).or_default() += 1;
                }
                let count: usize = freq.values().sum();
                // Ties go to the smallest value
                let top = freq
                    .iter()
                    .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)));
                vec![
                    count.to_string(),
                    freq.len().to_string(),
                    top.map_or("NaN".to_string(), |(v, _)| v.to_string()),
                    top.map_or("NaN".to_string(), |(_, n)| n.to_string()),
                ]
            })
            .collect();

        let rows: Vec<(String, Vec<String>)> = ["count", "unique", "top", "freq"]
            .iter()
            .enumerate()
            .map(|(s, name)| {
                (
                    name.to_string(),
                    columns.iter().map(|c| c[s].clone()).collect(),
                )
            })
            .collect();
        render_grid(&self.header, &rows)
    }
}

fn parse_delimiter(arguments: &Value) -> Result<u8, ToolError> {
    match opt_str_arg(arguments, "delimiter") {
        None => Ok(b','),
        Some("\\t") => Ok(b'\t'),
        Some(d) if d.len() == 1 => Ok(d.as_bytes()[0]),
        Some(_) => Err(ToolError::invalid(
            "'delimiter' must be a single ASCII character",
        )),
    }
}

async fn load_csv(path: &str, delimiter: u8) -> Result<Table, ToolError> {
    let text = tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ToolError::execution(format!("File not found: {}", path))
        } else {
            ToolError::execution(format!("Error reading CSV file: {}", e))
        }
    })?;
    Table::from_csv(&text, delimiter)
        .map_err(|e| ToolError::execution(format!("Error reading CSV file: {}", e)))?
        .ok_or_else(|| ToolError::execution(format!("{} is empty", path)))
}

pub struct ReadCsvTool;

#[async_trait]
impl Tool for ReadCsvTool {
    fn name(&self) -> &str {
        "read_csv_file"
    }

    fn description(&self) -> &str {
        "Summarize a CSV file: its shape, column names and first rows."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string", "description": "Path to the CSV file" },
                "delimiter": {
                    "type": "string",
                    "description": "Field delimiter (default: comma)"
                }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, arguments: Value, _cancel: CancellationToken) -> ToolOutput {
        let path = str_arg(&arguments, "file_path")?;
        let delimiter = parse_delimiter(&arguments)?;
        let table = load_csv(path, delimiter).await?;
        Ok(table.summary(&format!("CSV file: {}", path), false))
    }
}
