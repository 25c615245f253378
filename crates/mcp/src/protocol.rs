//! MCP protocol types.
//!
//! Wire types come from `rmcp`; this module adds the caller-facing
//! [`ToolCallResult`] and the protocol revisions this crate accepts.

use rmcp::model::{CallToolResult, Content, ErrorCode, ProtocolVersion};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use rmcp::model::{Implementation, JsonObject, ServerInfo, Tool};

/// Protocol revisions both sides of this crate speak.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[ProtocolVersion] = &[
    ProtocolVersion::V_2024_11_05,
    ProtocolVersion::V_2025_03_26,
    ProtocolVersion::V_2025_06_18,
];

/// JSON-RPC error codes used on the wire.
pub mod codes {
    use rmcp::model::ErrorCode;

    pub const PARSE_ERROR: ErrorCode = ErrorCode::PARSE_ERROR;
    pub const INVALID_REQUEST: ErrorCode = ErrorCode::INVALID_REQUEST;
    pub const METHOD_NOT_FOUND: ErrorCode = ErrorCode::METHOD_NOT_FOUND;
    pub const INVALID_PARAMS: ErrorCode = ErrorCode::INVALID_PARAMS;
    pub const INTERNAL_ERROR: ErrorCode = ErrorCode::INTERNAL_ERROR;
    /// A request other than `initialize` or `ping` arrived before the handshake.
    pub const NOT_INITIALIZED: ErrorCode = ErrorCode(-32002);
}

pub(crate) fn is_supported(version: &ProtocolVersion) -> bool {
    SUPPORTED_PROTOCOL_VERSIONS.contains(version)
}

/// Outcome of one tool invocation: a value, or the tool's error message.
///
/// Tool failures are data, not transport errors; they never abort a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "lowercase")]
pub enum ToolCallResult {
    Ok(Value),
    Err(String),
}

impl ToolCallResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn is_err(&self) -> bool {
        matches!(self, Self::Err(_))
    }

    pub fn into_result(self) -> Result<Value, String> {
        match self {
            Self::Ok(value) => Ok(value),
            Self::Err(message) => Err(message),
        }
    }
}

/// Wire form of an outcome. Strings travel verbatim as text, everything else
/// as compact JSON text; the value itself rides along as structured content.
impl From<ToolCallResult> for CallToolResult {
    fn from(outcome: ToolCallResult) -> Self {
        match outcome {
            ToolCallResult::Ok(value) => {
                let text = match &value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let mut result = CallToolResult::success(vec![Content::text(text)]);
                result.structured_content = Some(serde_json::json!({ "result": value }));
                result
            }
            ToolCallResult::Err(message) => CallToolResult::error(vec![Content::text(message)]),
        }
    }
}

impl From<CallToolResult> for ToolCallResult {
    fn from(result: CallToolResult) -> Self {
        let text = result
            .content
            .iter()
            .filter_map(|content| content.as_text())
            .map(|text| text.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        if result.is_error.unwrap_or(false) {
            return Self::Err(text);
        }
        match result.structured_content {
            Some(Value::Object(mut map)) if map.contains_key("result") => {
                Self::Ok(map.remove("result").unwrap_or(Value::Null))
            }
            Some(other) => Self::Ok(other),
            None => Self::Ok(Value::String(text)),
        }
    }
}

pub(crate) fn code_name(code: ErrorCode) -> &'static str {
    match code {
        codes::PARSE_ERROR => "parse error",
        codes::INVALID_REQUEST => "invalid request",
        codes::METHOD_NOT_FOUND => "method not found",
        codes::INVALID_PARAMS => "invalid params",
        codes::NOT_INITIALIZED => "not initialized",
        _ => "internal error",
    }
}
