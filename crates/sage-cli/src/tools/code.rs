//! Python code execution through an interpreter subprocess

use async_trait::async_trait;
use sage_agent::tool::{Tool, ToolError, ToolOutput, int_arg, str_arg};
use serde_json::{Value, json};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

const DEFAULT_TIMEOUT_SECS: i64 = 10;
const MAX_TIMEOUT_SECS: i64 = 120;
const ANALYZE_TIMEOUT_SECS: i64 = 5;

/// Reads an expression from stdin and prints its value
const EVAL_PROGRAM: &str = "import sys\nprint(eval(sys.stdin.read()))";

/// Spawns the interpreter, feeds it stdin, and collects its output
#[derive(Debug, Clone)]
pub struct PythonRunner {
    interpreter: String,
}

impl PythonRunner {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }

    async fn run(
        &self,
        args: &[&str],
        stdin: &str,
        timeout_secs: u64,
        cancel: &CancellationToken,
    ) -> Result<Output, ToolError> {
        let mut child = Command::new(&self.interpreter)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ToolError::execution(format!("Failed to start {}: {}", self.interpreter, e))
            })?;

        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(stdin.as_bytes())
                .await
                .map_err(|e| ToolError::execution(format!("Failed to write program: {}", e)))?;
        }

        // Dropping the wait future kills the child
        tokio::select! {
            _ = cancel.cancelled() => Err(ToolError::Cancelled),
            _ = tokio::time::sleep(Duration::from_secs(timeout_secs)) => Err(ToolError::execution(
                format!("Code execution timed out after {} seconds", timeout_secs),
            )),
            output = child.wait_with_output() => output
                .map_err(|e| ToolError::execution(format!("Failed to run {}: {}", self.interpreter, e))),
        }
    }
}

impl Default for PythonRunner {
    fn default() -> Self {
        Self::new("python3")
    }
}

fn last_line(text: &str) -> &str {
    text.trim_end().lines().last().unwrap_or("").trim()
}

/// Run a Python program and report what it printed
pub struct ExecutePythonTool {
    runner: PythonRunner,
}

impl ExecutePythonTool {
    pub fn new(runner: PythonRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Tool for ExecutePythonTool {
    fn name(&self) -> &str {
        "execute_python_code"
    }

    fn description(&self) -> &str {
        "Execute a Python program and return what it printed to stdout and stderr. \
         Use print() to show results."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Python code to execute"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Maximum execution time in seconds (default: 10)"
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, arguments: Value, cancel: CancellationToken) -> ToolOutput {
        let code = str_arg(&arguments, "code")?;
        let timeout = int_arg(&arguments, "timeout", DEFAULT_TIMEOUT_SECS)?
            .clamp(1, MAX_TIMEOUT_SECS) as u64;

        let output = self.runner.run(&["-"], code, timeout, &cancel).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let mut sections = Vec::new();
        if !stdout.is_empty() {
            sections.push(format!("Output:\n{}", stdout));
        }
        if !stderr.is_empty() {
            sections.push(format!("Errors:\n{}", stderr));
        }

        if !output.status.success() {
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            sections.insert(0, format!("Runtime Error (exit code {})", code));
            return Err(ToolError::execution(sections.join("\n")));
        }

        if sections.is_empty() {
            return Ok("Code executed successfully with no output.".to_string());
        }
        Ok(sections.join("\n"))
    }
}

/// Evaluate a single Python expression
pub struct EvaluateExpressionTool {
    runner: PythonRunner,
}

impl EvaluateExpressionTool {
    pub fn new(runner: PythonRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Tool for EvaluateExpressionTool {
    fn name(&self) -> &str {
        "evaluate_python_expression"
    }

    fn description(&self) -> &str {
        "Evaluate a Python expression and return its value (e.g. \"2 ** 10\", \"sum([1, 2, 3])\")."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "Python expression to evaluate"
                }
            },
            "required": ["expression"]
        })
    }

    async fn execute(&self, arguments: Value, cancel: CancellationToken) -> ToolOutput {
        let expression = str_arg(&arguments, "expression")?;
        let output = self
            .runner
            .run(
                &["-c", EVAL_PROGRAM],
                expression.trim(),
                DEFAULT_TIMEOUT_SECS as u64,
                &cancel,
            )
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ToolError::execution(last_line(&stderr)));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(format!("Result: {}", stdout.trim_end()))
    }
}

/// Run a snippet briefly to show what it prints
pub struct AnalyzeCodeOutputTool {
    python: ExecutePythonTool,
}

impl AnalyzeCodeOutputTool {
    pub fn new(runner: PythonRunner) -> Self {
        Self {
            python: ExecutePythonTool::new(runner),
        }
    }
}

#[async_trait]
impl Tool for AnalyzeCodeOutputTool {
    fn name(&self) -> &str {
        "analyze_code_output"
    }

    fn description(&self) -> &str {
        "Predict what a short Python snippet outputs by running it with a 5 second limit."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Python code to analyze"
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, arguments: Value, cancel: CancellationToken) -> ToolOutput {
        let code = str_arg(&arguments, "code")?;
        let arguments = json!({ "code": code, "timeout": ANALYZE_TIMEOUT_SECS });
        match self.python.execute(arguments, cancel).await {
            Ok(output) => Ok(format!("Code Analysis:\n{}", output)),
            Err(ToolError::Execution(message)) => Err(ToolError::execution(format!(
                "Code Analysis:\n{}",
                message
            ))),
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    #[test]
    fn test_last_line() {
        assert_eq!(
            last_line("Traceback (most recent call last):\n  ...\nZeroDivisionError: division by zero\n"),
            "ZeroDivisionError: division by zero"
        );
        assert_eq!(last_line(""), "");
    }

    #[tokio::test]
    async fn test_evaluate_expression() {
        if !python_available() {
            return;
        }
        let tool = EvaluateExpressionTool::new(PythonRunner::default());
        let out = tool
            .execute(json!({"expression": "2 ** 10"}), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, "Result: 1024");
    }

    #[tokio::test]
    async fn test_evaluate_error_reports_exception() {
        if !python_available() {
            return;
        }
        let tool = EvaluateExpressionTool::new(PythonRunner::default());
        let err = tool
            .execute(json!({"expression": "1 / 0"}), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution(m) if m.starts_with("ZeroDivisionError")));
    }

    #[tokio::test]
    async fn test_execute_collects_stdout() {
        if !python_available() {
            return;
        }
        let tool = ExecutePythonTool::new(PythonRunner::default());
        let out = tool
            .execute(
                json!({"code": "for i in range(3):\n    print(i)"}),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out, "Output:\n0\n1\n2\n");

        let quiet = tool
            .execute(json!({"code": "x = 1"}), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(quiet, "Code executed successfully with no output.");
    }

    #[tokio::test]
    async fn test_execute_failure_is_error() {
        if !python_available() {
            return;
        }
        let tool = ExecutePythonTool::new(PythonRunner::default());
        let err = tool
            .execute(json!({"code": "raise ValueError('boom')"}), CancellationToken::new())
            .await
            .unwrap_err();
        let ToolError::Execution(message) = err else {
            panic!("expected execution error");
        };
        assert!(message.starts_with("Runtime Error (exit code 1)"));
        assert!(message.contains("ValueError: boom"));
    }

    #[tokio::test]
    async fn test_execute_times_out() {
        if !python_available() {
            return;
        }
        let tool = ExecutePythonTool::new(PythonRunner::default());
        let err = tool
            .execute(
                json!({"code": "import time\ntime.sleep(30)", "timeout": 1}),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ToolError::Execution("Code execution timed out after 1 seconds".into())
        );
    }

    #[tokio::test]
    async fn test_cancelled_run() {
        if !python_available() {
            return;
        }
        let cancel = CancellationToken::new();
        cancel.cancel();
        let tool = ExecutePythonTool::new(PythonRunner::default());
        let err = tool
            .execute(json!({"code": "import time\ntime.sleep(30)"}), cancel)
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::Cancelled);
    }

    #[tokio::test]
    async fn test_analyze_code_output_wraps_execution() {
        if !python_available() {
            return;
        }
        let tool = AnalyzeCodeOutputTool::new(PythonRunner::default());
        let out = tool
            .execute(json!({"code": "print(sum(range(5)))"}), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, "Code Analysis:\nOutput:\n10\n");

        let err = tool
            .execute(
                json!({"code": "import time\ntime.sleep(30)"}),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ToolError::Execution("Code Analysis:\nCode execution timed out after 5 seconds".into())
        );
    }

    #[tokio::test]
    async fn test_missing_interpreter() {
        let tool = EvaluateExpressionTool::new(PythonRunner::new("sage-no-such-python"));
        let err = tool
            .execute(json!({"expression": "1"}), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution(m) if m.starts_with("Failed to start")));
    }
}
