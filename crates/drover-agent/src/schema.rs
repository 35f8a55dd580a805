//! Tool definitions exported to the model

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Name, description and JSON input schema for one tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDefinition {
    fn new(name: &str, description: &str, input_schema: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

/// Definitions for all six tools
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            "read_file",
            "Read a file relative to the project root. Optionally pass a 1-indexed inclusive line range. The result includes total_lines.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Path relative to the project root"},
                    "line_start": {"type": "integer", "minimum": 1, "description": "First line to return (1-indexed)"},
                    "line_end": {"type": "integer", "minimum": 1, "description": "Last line to return (inclusive)"}
                },
                "required": ["path"]
            }),
        ),
        ToolDefinition::new(
            "write_file",
            "Create or fully overwrite a file. Parent directories are created as needed. Prefer edit_file for changes to existing files.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Path relative to the project root"},
                    "content": {"type": "string", "description": "Complete file content"}
                },
                "required": ["path", "content"]
            }),
        ),
        ToolDefinition::new(
            "edit_file",
            "Replace one exact occurrence of old_string with new_string. old_string must match exactly once; include surrounding lines if it is not unique. A backup is written to <file>.bak.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Path relative to the project root"},
                    "old_string": {"type": "string", "description": "Exact text to replace, including whitespace"},
                    "new_string": {"type": "string", "description": "Replacement text"}
                },
                "required": ["path", "old_string", "new_string"]
            }),
        ),
        ToolDefinition::new(
            "list_directory",
            "List a directory. Directories end with '/'. Defaults to the project root.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Directory relative to the project root"}
                }
            }),
        ),
        ToolDefinition::new(
            "search_files",
            "Search file contents with a regular expression. Returns up to 50 matches as {path, line, text}.",
            json!({
                "type": "object",
                "properties": {
                    "pattern": {"type": "string", "description": "Regular expression"},
                    "path": {"type": "string", "description": "Directory to search, relative to the project root"},
                    "file_glob": {"type": "string", "description": "Only search files matching this glob, e.g. *.rs"}
                },
                "required": ["pattern"]
            }),
        ),
        ToolDefinition::new(
            "run_command",
            "Run an allow-listed command (tests, linters, builds, read-only inspection) in the project root. Shell operators are not permitted. A non-zero exit code is returned as data.",
            json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "Command line, e.g. 'cargo test -p mycrate'"}
                },
                "required": ["command"]
            }),
        ),
    ]
}
