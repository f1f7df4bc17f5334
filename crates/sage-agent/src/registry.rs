//! The immutable name-keyed set of tools a session may call.

use serde_json::Value;
use std::{collections::HashMap, sync::Arc};

use crate::{
    error::{Error, Result},
    tool::{BoxedTool, to_api_tool},
};

struct Entry {
    tool: BoxedTool,
    validator: Arc<jsonschema::Validator>,
}

/// Tools keyed by name, with their compiled parameter schemas.
///
/// Built once and shared read-only across sessions (wrap it in an `Arc`).
pub struct ToolRegistry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Register a fixed set of tools.
    ///
    /// Fails on a repeated name or on a schema that does not compile, so a
    /// broken declaration is caught at startup instead of at call time.
    pub fn register(tools: impl IntoIterator<Item = BoxedTool>) -> Result<Self> {
        let mut entries = Vec::new();
        let mut index = HashMap::new();

        for tool in tools {
            let name = tool.name().to_string();
            if index.contains_key(&name) {
                return Err(Error::DuplicateTool { name });
            }
            let validator = jsonschema::validator_for(&tool.parameters_schema()).map_err(|e| {
                Error::InvalidSchema {
                    tool: name.clone(),
                    message: e.to_string(),
                }
            })?;
            index.insert(name, entries.len());
            entries.push(Entry {
                tool,
                validator: Arc::new(validator),
            });
        }

        tracing::debug!(tools = entries.len(), "tool registry built");
        Ok(Self { entries, index })
    }

    /// An empty registry
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Look up a tool by name
    pub fn lookup(&self, name: &str) -> Result<&BoxedTool> {
        self.entry(name).map(|e| &e.tool)
    }

    /// Check arguments against the tool's declared schema.
    ///
    /// Returns a readable description of every violation, or `None` when the
    /// arguments conform.
    pub fn validate(&self, name: &str, args: &Value) -> Result<Option<String>> {
        let entry = self.entry(name)?;
        let errors: Vec<String> = entry
            .validator
            .iter_errors(args)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{}: {}", path, e)
                }
            })
            .collect();

        Ok((!errors.is_empty()).then(|| {
            format!("Tool argument validation failed:\n{}", errors.join("\n"))
        }))
    }

    /// Descriptors advertised to the model, in registration order
    pub fn api_tools(&self) -> Vec<sage_ai::Tool> {
        self.entries
            .iter()
            .map(|e| to_api_tool(e.tool.as_ref()))
            .collect()
    }

    /// Registered names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.tool.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoxedTool> {
        self.entries.iter().map(|e| &e.tool)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, name: &str) -> Result<&Entry> {
        self.index
            .get(name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| Error::UnknownTool {
                name: name.to_string(),
            })
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
