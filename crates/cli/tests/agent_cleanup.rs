//! The agent service releases its tool host even when the model fails.
//!
//! Kept in its own test binary so no other test's hosts are children of this
//! process.

#![cfg(target_os = "linux")]

use std::collections::HashMap;

use cli::config::Config;
use cli::error::Error;
use cli::service::{AgentService, ChatService};
use mcp::{Endpoint, ServerConfig};
use runtime::AgentConfig;

/// Children of this process that have not exited.
fn live_children() -> Vec<u32> {
    let me = std::process::id();
    std::fs::read_dir("/proc")
        .unwrap()
        .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse::<u32>().ok())
        .filter(|pid| {
            let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
                return false;
            };
            // After the parenthesised command name: state, then parent pid.
            let Some((_, rest)) = stat.rsplit_once(')') else {
                return false;
            };
            let mut fields = rest.split_whitespace();
            let state = fields.next();
            let parent = fields.next().and_then(|ppid| ppid.parse::<u32>().ok());
            parent == Some(me) && state != Some("Z")
        })
        .collect()
}

#[tokio::test]
async fn failing_backend_leaves_no_host_running() {
    let endpoint = Endpoint::Stdio(ServerConfig {
        name: "math".to_string(),
        command: env!("CARGO_BIN_EXE_toolwire").to_string(),
        args: vec!["host".to_string(), "math".to_string()],
        env: HashMap::new(),
    });
    // No model credentials: every backend call fails.
    let config = Config::parse("[retry]\nmax_attempts = 1").unwrap();
    let service = AgentService::new(&config, AgentConfig::default(), endpoint);

    let result = service.answer("what's (3 + 5) x 12?").await;
    assert!(matches!(result, Err(Error::Runtime(_))), "{result:?}");
    assert_eq!(live_children(), Vec::<u32>::new());
}
