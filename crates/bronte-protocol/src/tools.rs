//! Tool declaration types

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool offered to the model.
///
/// Either a function with a JSON Schema input, or an Anthropic built-in
/// (`computer_*`, `text_editor_*`, `bash_*`) carried through verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolDecl {
    Function(FunctionTool),
    Builtin(Value),
}

impl ToolDecl {
    /// Tool name, when one is present.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Function(f) => Some(&f.name),
            Self::Builtin(v) => v.get("name").and_then(|n| n.as_str()),
        }
    }
}

/// A function tool with a JSON Schema describing its input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionTool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<Value>,
}
