//! Connect an MCP filesystem server and read a file through the orchestrator.
//!
//! Run with: cargo run -p runtime --example mcp_session

use std::collections::HashMap;
use std::sync::Arc;

use mcp::ServerConfig;
use policy::Policy;
use runtime::{ApprovalGate, Orchestrator, OrchestratorSettings, ToolRegistry};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig {
        name: "filesystem".to_string(),
        command: "mcp-server-filesystem".to_string(),
        args: vec!["/tmp".to_string()],
        env: HashMap::new(),
        timeout_secs: Some(60),
    };

    let registry = Arc::new(ToolRegistry::new());
    registry.connect_servers([config]).await;

    for provider in registry.providers().await {
        println!("{} {:?}: {} tools", provider.provider_id, provider.status, provider.tools.len());
    }
    for spec in registry.specs().await {
        println!("  - {}: {}", spec.name, spec.description);
    }

    std::fs::write("/tmp/capstan-example.txt", "Hello from capstan!")?;

    let gate = ApprovalGate::new(Policy::restrictive());
    let mut orchestrator = Orchestrator::new(Arc::clone(&registry), gate, OrchestratorSettings::default());
    orchestrator.start_session("read the example file");
    let result = orchestrator
        .execute_tool("read_file", json!({"path": "/tmp/capstan-example.txt"}))
        .await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    orchestrator.complete();
    println!("{}", orchestrator.get_session_summary());

    registry.shutdown().await;
    Ok(())
}
