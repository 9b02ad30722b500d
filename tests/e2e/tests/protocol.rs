//! Protocol-level behavior through real JSON-RPC frames.

use serde_json::json;

use durandal_e2e_tests::TestHarness;

#[tokio::test]
async fn initialize_negotiates_version() {
    let harness = TestHarness::new();

    let response = harness
        .rpc("initialize", json!({"protocolVersion": "2024-11-05"}))
        .await
        .unwrap();
    let result = response.result.unwrap();
    // Client is older; the server answers with the client's version.
    assert_eq!(result["protocolVersion"], "2024-11-05");
    assert_eq!(result["serverInfo"]["name"], "durandal-mcp");
    assert!(result["capabilities"]["tools"].is_object());
}

#[tokio::test]
async fn requests_rejected_before_initialize() {
    let harness = TestHarness::new();

    let response = harness.rpc("tools/list", json!({})).await.unwrap();
    let error = response.error.expect("should reject");
    assert_eq!(error.code, -32002);
}

#[tokio::test]
async fn initialized_notification_gets_no_response() {
    let harness = TestHarness::new();
    harness.initialize().await;

    let request = durandal_mcp::protocol::types::JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        id: None,
        method: "notifications/initialized".to_string(),
        params: None,
    };
    assert!(harness.server.handle_request(request).await.is_none());
}

#[tokio::test]
async fn tools_list_exposes_the_full_table() {
    let harness = TestHarness::new();
    harness.initialize().await;

    let response = harness.rpc("tools/list", json!({})).await.unwrap();
    let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();
    let names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();

    for expected in [
        "store_memory",
        "search_memories",
        "get_context",
        "optimize_memory",
        "get_status",
        "configure_logging",
        "get_logs",
        "list_projects_sessions",
    ] {
        assert!(names.contains(&expected), "missing tool {}", expected);
    }
    for tool in &tools {
        assert_eq!(tool["inputSchema"]["type"], "object");
    }
}

#[tokio::test]
async fn unknown_method_and_unknown_tool() {
    let harness = TestHarness::new();
    harness.initialize().await;

    let response = harness.rpc("resources/list", json!({})).await.unwrap();
    assert_eq!(response.error.unwrap().code, -32601);

    let response = harness
        .rpc("tools/call", json!({"name": "no_such_tool", "arguments": {}}))
        .await
        .unwrap();
    assert_eq!(response.error.unwrap().code, -32601);
}

#[tokio::test]
async fn ping_answers_empty_object() {
    let harness = TestHarness::new();
    harness.initialize().await;

    let response = harness.rpc("ping", json!({})).await.unwrap();
    assert_eq!(response.result.unwrap(), json!({}));
}

#[tokio::test]
async fn tool_error_is_content_not_protocol_error() {
    let harness = TestHarness::new();
    harness.initialize().await;

    let reply = harness
        .call_tool("search_memories", json!({"query": ""}))
        .await;
    assert!(reply.is_error);
    assert!(reply.text.starts_with("❌"));
    assert!(reply.text.contains("Recovery:"));
}

#[tokio::test]
async fn get_context_round_trip() {
    let harness = TestHarness::new();
    harness.initialize().await;

    harness
        .call_tool(
            "store_memory",
            json!({"content": "context entry", "metadata": {"project": "p", "session": "s"}}),
        )
        .await;
    harness.wait_for_rows(1).await;

    let reply = harness
        .call_tool(
            "get_context",
            json!({"project": "p", "session": "s", "include_stats": true}),
        )
        .await;
    assert!(!reply.is_error);
    assert!(reply.text.contains("Recent memories (1):"));
    assert!(reply.text.contains("context entry"));
    assert!(reply.text.contains("Stats:"));
}

#[tokio::test]
async fn list_projects_sessions_through_rpc() {
    let harness = TestHarness::new();
    harness.initialize().await;

    harness
        .call_tool(
            "store_memory",
            json!({"content": "grouped", "metadata": {"project": "proj-x"}}),
        )
        .await;
    harness.wait_for_rows(1).await;

    let reply = harness
        .call_tool("list_projects_sessions", json!({"type": "projects"}))
        .await;
    assert!(reply.text.contains("proj-x"));
}
