//! Prompt templates for the agent loop.

use crate::tools::ToolSpec;

const PREAMBLE: &str = "You are a helpful assistant that solves tasks step by step using the tools listed below.";

const FORMAT: &str = r#"To call a tool, reply with only this JSON object:
{"action": "call_tool", "tool": "<tool name>", "input": {<arguments>}}

The result of the tool will be sent back to you as an observation.

When you know the answer, reply with:
{"action": "final", "response": "<your answer>"}"#;

/// Build the system prompt: tool catalogue, reply format and termination rules.
pub fn system_prompt(
    tools: &[ToolSpec],
    max_steps: u32,
    preamble: Option<&str>,
    instructions: Option<&str>,
) -> String {
    let mut prompt = String::from(preamble.unwrap_or(PREAMBLE));

    if let Some(instructions) = instructions {
        prompt.push_str("\n\n");
        prompt.push_str(instructions.trim());
    }

    prompt.push_str("\n\nAvailable tools:\n");
    if tools.is_empty() {
        prompt.push_str("(none)\n");
    }
    for tool in tools {
        prompt.push_str(&format!(
            "- {}: {}\n  input schema: {}\n",
            tool.name, tool.description, tool.schema
        ));
    }

    prompt.push('\n');
    prompt.push_str(FORMAT);
    prompt.push_str(&format!(
        "\n\nIMPORTANT: Once you have the final answer, you MUST complete the task by \
         providing it, either as the final JSON object above or in this exact format:\n\n\
         Final Answer: [your result]\n\n\
         Do not get stuck in a loop of tool calls. You may call at most {max_steps} tools."
    ));
    prompt
}

/// The goal as the first user message.
pub fn task(goal: &str) -> String {
    format!("Solve this step by step: {goal}")
}

pub fn observation(tool: &str, result: &str) -> String {
    format!("Observation from {tool}: {result}")
}

pub fn unknown_tool(tool: &str, available: &[ToolSpec]) -> String {
    let names: Vec<&str> = available.iter().map(|t| t.name.as_str()).collect();
    format!(
        "Error: unknown tool `{tool}`. Available tools: {}",
        names.join(", ")
    )
}

/// Asks for an answer once the tool budget is spent.
pub fn budget_exhausted(max_steps: u32) -> String {
    format!(
        "You have used all {max_steps} tool calls. Tools are no longer available. \
         Reply now with your best final answer to the original task in the format:\n\n\
         Final Answer: [your result]"
    )
}

/// System prompt for the closing call, with no tools on offer.
pub fn closing_system_prompt(preamble: Option<&str>) -> String {
    format!(
        "{}\n\nNo tools are available. Answer with the information gathered so far.",
        preamble.unwrap_or(PREAMBLE)
    )
}

pub fn budget_summary(max_steps: u32) -> String {
    format!(
        "I could not reach a final answer within {max_steps} tool calls. \
         Please try rephrasing or narrowing the question."
    )
}
