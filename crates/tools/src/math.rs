//! Integer arithmetic tools.

use mcp::{Arguments, ParamType, RegistryBuilder, ReturnType, ToolFailure, ToolSpec};
use serde_json::{Value, json};

fn binary(name: &str, description: &str) -> ToolSpec {
    ToolSpec::new(name, description)
        .param("a", ParamType::Integer, "First operand")
        .param("b", ParamType::Integer, "Second operand")
        .returns(ReturnType::Integer)
}

fn add(args: &Arguments) -> Result<Value, ToolFailure> {
    let (a, b) = (args.integer("a")?, args.integer("b")?);
    let sum = a
        .checked_add(b)
        .ok_or_else(|| format!("integer overflow: {a} + {b}"))?;
    Ok(json!(sum))
}

fn multiply(args: &Arguments) -> Result<Value, ToolFailure> {
    let (a, b) = (args.integer("a")?, args.integer("b")?);
    let product = a
        .checked_mul(b)
        .ok_or_else(|| format!("integer overflow: {a} * {b}"))?;
    Ok(json!(product))
}

/// `add` and `multiply`.
pub fn tools() -> RegistryBuilder {
    mcp::ToolRegistry::builder()
        .function(binary("add", "Add two numbers and return the result."), add)
        .function(
            binary("multiply", "Multiply two numbers and return the result."),
            multiply,
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcp::ToolCallResult;

    fn args(a: i64, b: i64) -> Option<serde_json::Map<String, Value>> {
        json!({"a": a, "b": b}).as_object().cloned()
    }

    #[tokio::test]
    async fn arithmetic() {
        let registry = tools().build().unwrap();
        assert_eq!(registry.dispatch("add", args(3, 5)).await, ToolCallResult::Ok(json!(8)));
        assert_eq!(
            registry.dispatch("multiply", args(8, 12)).await,
            ToolCallResult::Ok(json!(96))
        );
        assert_eq!(
            registry.dispatch("add", args(-4, 4)).await,
            ToolCallResult::Ok(json!(0))
        );
    }

    #[tokio::test]
    async fn overflow_is_a_tool_error() {
        let registry = tools().build().unwrap();
        let result = registry.dispatch("multiply", args(i64::MAX, 2)).await;
        assert!(matches!(result, ToolCallResult::Err(m) if m.starts_with("integer overflow")));
    }
}
