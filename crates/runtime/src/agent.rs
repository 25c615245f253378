//! The agent loop: plan, act, observe until the model answers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::model::{Backend, Message, ModelRequest};
use crate::prompt;
use crate::tools::{ToolCall, ToolError, Toolbox};
use crate::{Error, Result};

/// Marker a model may use instead of a JSON directive.
const FINAL_ANSWER_MARKER: &str = "Final Answer:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Upper bound on tool invocations per run.
    pub max_steps: u32,
    /// Replaces the default preamble of the system prompt.
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 20,
            system_prompt: None,
        }
    }
}

/// Final answer of a run, and how many tool calls it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOutcome {
    pub answer: String,
    pub steps: u32,
}

/// What the model asked for in one reply.
#[derive(Debug, Clone, PartialEq)]
enum Directive {
    CallTool(ToolCall),
    Final(String),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum RawDirective {
    CallTool {
        tool: String,
        #[serde(default)]
        input: Value,
    },
    Final {
        response: String,
    },
}

impl Directive {
    fn parse(reply: &str) -> Self {
        if let Some(raw) = json_object(reply).and_then(|s| serde_json::from_str(s).ok()) {
            return match raw {
                RawDirective::CallTool { tool, input } => {
                    let input = match input {
                        Value::Object(map) => map,
                        _ => Map::new(),
                    };
                    Self::CallTool(ToolCall::new(tool, input))
                }
                RawDirective::Final { response } => Self::Final(response),
            };
        }

        match reply.rfind(FINAL_ANSWER_MARKER) {
            Some(at) => Self::Final(reply[at + FINAL_ANSWER_MARKER.len()..].trim().to_string()),
            None => Self::Final(reply.trim().to_string()),
        }
    }
}

/// The outermost `{...}` span of a reply, ignoring code fences and chatter.
fn json_object(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (start < end).then(|| &reply[start..=end])
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Drives a model against a toolbox.
pub struct Agent<B> {
    backend: B,
    config: AgentConfig,
}

impl<B: Backend> Agent<B> {
    pub fn new(backend: B, config: AgentConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Work on `goal` until the model gives a final answer or the tool budget
    /// runs out. Always terminates.
    pub async fn run<T: Toolbox>(&self, toolbox: &mut T, goal: &str) -> Result<AgentOutcome> {
        self.run_with_instructions(toolbox, goal, None).await
    }

    /// Like [`Agent::run`], with host-provided usage hints added to the prompt.
    pub async fn run_with_instructions<T: Toolbox>(
        &self,
        toolbox: &mut T,
        goal: &str,
        instructions: Option<&str>,
    ) -> Result<AgentOutcome> {
        let max_steps = self.config.max_steps;
        let preamble = self.config.system_prompt.as_deref();
        let system = prompt::system_prompt(toolbox.specs(), max_steps, preamble, instructions);
        let mut messages = vec![Message::user(prompt::task(goal))];
        let mut steps = 0;

        info!(tools = toolbox.specs().len(), max_steps, "Agent started");

        while steps < max_steps {
            let request = ModelRequest::new(&messages).with_system(&system);
            let reply = self.backend.call(request).await?.text;
            messages.push(Message::assistant(reply.clone()));

            let call = match Directive::parse(&reply) {
                Directive::Final(answer) => {
                    info!(steps, "Agent finished");
                    return Ok(AgentOutcome { answer, steps });
                }
                Directive::CallTool(call) => call,
            };

            steps += 1;
            let observation = if !toolbox.offers(&call.name) {
                warn!(tool = %call.name, step = steps, "Model requested an unknown tool");
                prompt::unknown_tool(&call.name, toolbox.specs())
            } else {
                debug!(tool = %call.name, step = steps, "Calling tool");
                match toolbox.execute(&call).await {
                    Ok(value) => prompt::observation(&call.name, &render(&value)),
                    Err(ToolError::Transport(e)) => {
                        return Err(Error::Tool(ToolError::Transport(e)));
                    }
                    Err(e) => {
                        warn!(tool = %call.name, error = %e, "Tool call failed");
                        prompt::observation(&call.name, &format!("Error: {e}"))
                    }
                }
            };
            messages.push(Message::user(observation));
        }

        warn!(max_steps, "Tool budget exhausted, asking for a final answer");
        Ok(AgentOutcome {
            answer: self.conclude(&mut messages).await,
            steps,
        })
    }

    /// One last model call with tools disabled.
    async fn conclude(&self, messages: &mut Vec<Message>) -> String {
        let max_steps = self.config.max_steps;
        messages.push(Message::user(prompt::budget_exhausted(max_steps)));
        let system = prompt::closing_system_prompt(self.config.system_prompt.as_deref());

        match self
            .backend
            .call(ModelRequest::new(messages).with_system(&system))
            .await
        {
            Ok(response) => match Directive::parse(&response.text) {
                Directive::Final(answer) if !answer.is_empty() => answer,
                _ => prompt::budget_summary(max_steps),
            },
            Err(e) => {
                warn!(error = %e, "Closing model call failed");
                prompt::budget_summary(max_steps)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelError, ModelResponse, Usage};
    use crate::tools::{LocalToolbox, ToolSpec};
    use mcp::{ParamType, ReturnType, ToolRegistry};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replies from a script; repeats `fallback` once the script runs out.
    struct Scripted {
        replies: Mutex<VecDeque<std::result::Result<String, ModelError>>>,
        fallback: String,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    impl Scripted {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().map(|r| Ok(r.to_string())).collect()),
                fallback: String::new(),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn forever(reply: &str) -> Self {
            Self {
                fallback: reply.to_string(),
                ..Self::new(&[])
            }
        }

        fn failing(error: ModelError) -> Self {
            let script = Self::new(&[]);
            script.replies.lock().unwrap().push_back(Err(error));
            script
        }

        fn requests(&self) -> Vec<Vec<Message>> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Backend for Scripted {
        async fn call(
            &self,
            request: ModelRequest<'_>,
        ) -> std::result::Result<ModelResponse, ModelError> {
            self.seen.lock().unwrap().push(request.messages.to_vec());
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(self.fallback.clone()))?;
            Ok(ModelResponse {
                text: reply,
                usage: Usage::default(),
            })
        }
    }

    /// Offers one tool that always fails, counting executions.
    struct Broken {
        specs: Vec<ToolSpec>,
        executions: u32,
    }

    impl Broken {
        fn new() -> Self {
            Self {
                specs: vec![ToolSpec {
                    name: "lookup".into(),
                    description: "Always fails".into(),
                    schema: json!({"type": "object"}),
                }],
                executions: 0,
            }
        }
    }

    impl Toolbox for Broken {
        fn specs(&self) -> &[ToolSpec] {
            &self.specs
        }

        async fn execute(&mut self, _call: &ToolCall) -> std::result::Result<Value, ToolError> {
            self.executions += 1;
            Err(ToolError::Execution("service unavailable".into()))
        }
    }

    fn math() -> LocalToolbox {
        let binary = |name: &str| {
            mcp::ToolSpec::new(name, name)
                .param("a", ParamType::Integer, "")
                .param("b", ParamType::Integer, "")
                .returns(ReturnType::Integer)
        };
        let registry = ToolRegistry::builder()
            .function(binary("add"), |args| {
                Ok(json!(args.integer("a")? + args.integer("b")?))
            })
            .function(binary("multiply"), |args| {
                Ok(json!(args.integer("a")? * args.integer("b")?))
            })
            .build()
            .unwrap();
        LocalToolbox::new(Arc::new(registry))
    }

    #[test]
    fn parses_directives() {
        let call = Directive::parse(
            "```json\n{\"action\": \"call_tool\", \"tool\": \"add\", \"input\": {\"a\": 1, \"b\": 2}}\n```",
        );
        assert_eq!(
            call,
            Directive::CallTool(ToolCall::new("add", json!({"a": 1, "b": 2}).as_object().cloned().unwrap()))
        );

        let json_final = Directive::parse(r#"{"action": "final", "response": "96"}"#);
        assert_eq!(json_final, Directive::Final("96".into()));

        let marker = Directive::parse("8 times 12 is 96.\nFinal Answer: 96");
        assert_eq!(marker, Directive::Final("96".into()));

        let plain = Directive::parse("  Paris is the capital of France. ");
        assert_eq!(plain, Directive::Final("Paris is the capital of France.".into()));
    }

    #[tokio::test]
    async fn solves_with_tools() {
        let backend = Scripted::new(&[
            r#"{"action": "call_tool", "tool": "add", "input": {"a": 3, "b": 5}}"#,
            r#"{"action": "call_tool", "tool": "multiply", "input": {"a": 8, "b": 12}}"#,
            "Final Answer: 96",
        ]);
        let agent = Agent::new(&backend, AgentConfig::default());
        let mut toolbox = math();

        let outcome = agent.run(&mut toolbox, "what's (3 + 5) x 12?").await.unwrap();
        assert_eq!(outcome, AgentOutcome { answer: "96".into(), steps: 2 });

        let requests = backend.requests();
        let last = requests.last().unwrap();
        assert_eq!(last[2].content, "Observation from add: 8");
        assert_eq!(last[4].content, "Observation from multiply: 96");
    }

    #[tokio::test]
    async fn unknown_tools_are_never_executed() {
        let backend = Scripted::new(&[
            r#"{"action": "call_tool", "tool": "delete_everything", "input": {}}"#,
            "Final Answer: I cannot do that.",
        ]);
        let agent = Agent::new(&backend, AgentConfig::default());
        let mut toolbox = Broken::new();

        let outcome = agent.run(&mut toolbox, "clean up").await.unwrap();
        assert_eq!(outcome.steps, 1);
        assert_eq!(toolbox.executions, 0);

        let requests = backend.requests();
        assert!(requests[1][2].content.contains("unknown tool `delete_everything`"));
    }

    #[tokio::test]
    async fn always_failing_tool_stops_at_budget() {
        let backend = Scripted::forever(r#"{"action": "call_tool", "tool": "lookup", "input": {}}"#);
        let agent = Agent::new(&backend, AgentConfig::default());
        let mut toolbox = Broken::new();

        let outcome = agent.run(&mut toolbox, "look it up").await.unwrap();
        assert_eq!(outcome.steps, 20);
        assert_eq!(toolbox.executions, 20);
        assert_eq!(outcome.answer, prompt::budget_summary(20));
        // 20 planning calls plus the closing call.
        assert_eq!(backend.requests().len(), 21);
    }

    #[tokio::test]
    async fn closing_call_can_answer() {
        let backend = Scripted::new(&[
            r#"{"action": "call_tool", "tool": "lookup", "input": {}}"#,
            r#"{"action": "call_tool", "tool": "lookup", "input": {}}"#,
            "Final Answer: the service is down",
        ]);
        let config = AgentConfig {
            max_steps: 2,
            ..AgentConfig::default()
        };
        let agent = Agent::new(&backend, config);
        let mut toolbox = Broken::new();

        let outcome = agent.run(&mut toolbox, "look it up").await.unwrap();
        assert_eq!(outcome.answer, "the service is down");
        assert_eq!(outcome.steps, 2);
    }

    #[tokio::test]
    async fn model_errors_propagate() {
        let backend = Scripted::failing(ModelError::Network("unreachable".into()));
        let agent = Agent::new(&backend, AgentConfig::default());
        let result = agent.run(&mut math(), "1 + 1").await;
        assert!(matches!(result, Err(Error::Model(ModelError::Network(_)))));
    }
}
