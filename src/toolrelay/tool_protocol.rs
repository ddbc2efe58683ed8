//! Tool definitions and the executor seam used by the tool loop.
//!
//! The model sees tools as flat function specs (`{type:"function", function:{name,
//! description, parameters}}`); the adapters translate those into each provider's own
//! schema. When the model asks for a tool, the [`ChatSession`](crate::chat_session::ChatSession)
//! hands the call to a [`ToolExecutor`] and feeds the returned string back as a `tool` message.
//!
//! ```text
//! ChatSession → ToolExecutor (trait) → [ToolRegistry | host implementation]
//! ```
//!
//! # Example
//!
//! ```rust
//! use toolrelay::tool_protocol::{
//!     ToolExecutor, ToolMetadata, ToolParameter, ToolParameterType, ToolRegistry, ToolResult,
//! };
//!
//! let mut registry = ToolRegistry::new();
//! registry.register_fn(
//!     ToolMetadata::new("get_weather", "Current weather at the colony").with_parameter(
//!         ToolParameter::new("unit", ToolParameterType::String)
//!             .with_description("celsius or fahrenheit"),
//!     ),
//!     |_args| Ok(ToolResult::success(serde_json::json!("sunny"))),
//! );
//!
//! assert_eq!(registry.execute("get_weather", "{}"), "sunny");
//! assert_eq!(registry.tool_specs()[0]["function"]["name"], "get_weather");
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

/// Represents the result of a tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool execution was successful
    pub success: bool,
    /// The output data from the tool
    pub output: Value,
    /// Optional error message if execution failed
    pub error: Option<String>,
}

impl ToolResult {
    /// Convenience constructor for successful tool execution.
    pub fn success(output: Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    /// Convenience constructor for failed tool execution.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(error.into()),
        }
    }

    /// Text fed back to the model. Strings are passed verbatim, other JSON is compact text,
    /// failures become `Error: <message>`.
    pub fn to_result_string(&self) -> String {
        if !self.success {
            return format!(
                "Error: {}",
                self.error.as_deref().unwrap_or("Unknown error")
            );
        }
        match &self.output {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// Defines the type of a tool parameter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ToolParameterType {
    fn schema_name(&self) -> &'static str {
        match self {
            ToolParameterType::String => "string",
            ToolParameterType::Number => "number",
            ToolParameterType::Integer => "integer",
            ToolParameterType::Boolean => "boolean",
            ToolParameterType::Array => "array",
            ToolParameterType::Object => "object",
        }
    }
}

/// Defines a parameter for a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ToolParameterType,
    pub description: Option<String>,
    pub required: bool,
    /// Closed set of accepted values, rendered as a JSON-schema `enum`.
    pub allowed_values: Option<Vec<String>>,
    /// For array types, specifies the type of items
    pub items: Option<ToolParameterType>,
}

impl ToolParameter {
    /// Define a new tool parameter with the provided name and type.
    pub fn new(name: impl Into<String>, param_type: ToolParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
            allowed_values: None,
            items: None,
        }
    }

    /// Add a human readable description that will surface in generated schemas.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the argument as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Restrict the parameter to a fixed list of strings.
    pub fn with_allowed_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// For array parameters, declare the type of the contained items.
    pub fn with_items(mut self, item_type: ToolParameterType) -> Self {
        self.items = Some(item_type);
        self
    }

    /// JSON-schema fragment describing this parameter.
    pub fn to_schema(&self) -> Value {
        let mut schema = Map::new();
        schema.insert("type".into(), json!(self.param_type.schema_name()));
        if let Some(description) = &self.description {
            schema.insert("description".into(), json!(description));
        }
        if let Some(values) = &self.allowed_values {
            schema.insert("enum".into(), json!(values));
        }
        if let Some(items) = &self.items {
            schema.insert("items".into(), json!({ "type": items.schema_name() }));
        }
        Value::Object(schema)
    }
}

/// Metadata about a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolMetadata {
    /// Create metadata with the supplied identifier and description.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    /// Append a parameter definition to the tool metadata.
    pub fn with_parameter(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }

    /// Object schema describing the tool's arguments.
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            properties.insert(param.name.clone(), param.to_schema());
            if param.required {
                required.push(json!(param.name));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Flat function spec understood by [`ChatRequest::tool_specs`](crate::client_wrapper::ChatRequest::tool_specs).
    pub fn to_function_spec(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters_schema(),
            }
        })
    }
}

/// Error types for tool operations
#[derive(Debug, Clone)]
pub enum ToolError {
    /// Requested tool is not registered.
    NotFound(String),
    /// The argument string was not a JSON object.
    InvalidParameters(String),
    /// Tool execution completed with an application level failure.
    ExecutionFailed(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "Tool not found: {}", name),
            ToolError::InvalidParameters(msg) => write!(f, "Invalid parameters: {}", msg),
            ToolError::ExecutionFailed(msg) => write!(f, "Tool execution failed: {}", msg),
        }
    }
}

impl Error for ToolError {}

/// Executes model-requested tools on the controlling thread.
///
/// Implementations must return promptly and must encode every failure in the returned string:
/// the session forwards whatever comes back to the model without inspecting it.
pub trait ToolExecutor: Send + Sync {
    /// Run `name` with the raw JSON `arguments` and return the text fed back to the model.
    fn execute(&self, name: &str, arguments: &str) -> String;

    /// Flat function specs for every tool this executor understands.
    fn tool_specs(&self) -> Vec<Value> {
        Vec::new()
    }
}

/// Handler signature for tools registered on a [`ToolRegistry`].
pub type ToolFunction = Arc<dyn Fn(Value) -> Result<ToolResult, ToolError> + Send + Sync>;

/// Registry of closure-backed tools, kept in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<ToolMetadata>,
    functions: HashMap<String, ToolFunction>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a tool. Replacing keeps the tool's original position.
    pub fn register(&mut self, metadata: ToolMetadata, function: ToolFunction) {
        let name = metadata.name.clone();
        match self.tools.iter_mut().find(|t| t.name == name) {
            Some(existing) => *existing = metadata,
            None => self.tools.push(metadata),
        }
        self.functions.insert(name, function);
    }

    /// Register a closure without wrapping it in an [`Arc`] first.
    pub fn register_fn<F>(&mut self, metadata: ToolMetadata, function: F)
    where
        F: Fn(Value) -> Result<ToolResult, ToolError> + Send + Sync + 'static,
    {
        self.register(metadata, Arc::new(function));
    }

    /// Remove a tool by name, returning its metadata if it was registered.
    pub fn unregister(&mut self, name: &str) -> Option<ToolMetadata> {
        self.functions.remove(name);
        let index = self.tools.iter().position(|t| t.name == name)?;
        Some(self.tools.remove(index))
    }

    /// List metadata for registered tools in registration order.
    pub fn list_tools(&self) -> &[ToolMetadata] {
        &self.tools
    }

    /// Run a tool and keep the structured result.
    pub fn execute_tool(&self, name: &str, arguments: &str) -> Result<ToolResult, ToolError> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        let params = if arguments.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_str::<Value>(arguments)
                .map_err(|e| ToolError::InvalidParameters(e.to_string()))?
        };
        if !params.is_object() {
            return Err(ToolError::InvalidParameters(
                "arguments must be a JSON object".into(),
            ));
        }

        catch_unwind(AssertUnwindSafe(|| function(params)))
            .unwrap_or_else(|_| Err(ToolError::ExecutionFailed(format!("'{}' panicked", name))))
    }
}

impl ToolExecutor for ToolRegistry {
    fn execute(&self, name: &str, arguments: &str) -> String {
        let started = Instant::now();
        let result = match self.execute_tool(name, arguments) {
            Ok(result) => result.to_result_string(),
            Err(err) => {
                log::warn!("tool '{}' failed: {}", name, err);
                format!("Error: {}", err)
            }
        };
        log::debug!(
            "tool '{}' finished in {} ms ({} chars)",
            name,
            started.elapsed().as_millis(),
            result.len()
        );
        result
    }

    fn tool_specs(&self) -> Vec<Value> {
        self.tools.iter().map(ToolMetadata::to_function_spec).collect()
    }
}
