//! Drives `Client` against an in-memory provider over `tokio::io::duplex`.

use mcp::{Client, Error, JsonRpcRequest, JsonRpcResponse, MAX_OUTPUT_SIZE, RequestId};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

/// Minimal provider: two tools split over two pages, `echo` and `fail`.
async fn serve(stream: DuplexStream) {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let request: JsonRpcRequest = serde_json::from_str(&line).expect("valid request");
        let Some(id) = request.id.clone() else {
            continue; // notifications need no answer
        };

        let result = match request.method.as_str() {
            "initialize" => json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "mock", "version": "0.0.1"}
            }),
            "tools/list" => {
                let cursor = request
                    .params
                    .as_ref()
                    .and_then(|p| p.get("cursor"))
                    .and_then(Value::as_str);
                match cursor {
                    None => json!({
                        "tools": [{
                            "name": "echo",
                            "description": "Echo the input",
                            "inputSchema": {"type": "object", "properties": {"text": {"type": "string"}}},
                            "annotations": {"readOnlyHint": true}
                        }],
                        "nextCursor": "page-2"
                    }),
                    Some(_) => json!({
                        "tools": [{
                            "name": "fail",
                            "inputSchema": {"type": "object"}
                        }]
                    }),
                }
            }
            "tools/call" => {
                let params = request.params.clone().unwrap_or(Value::Null);
                // Interleave a notification before the answer.
                write_line(
                    &mut writer,
                    &json!({"jsonrpc": "2.0", "method": "notifications/progress"}),
                )
                .await;
                match params["name"].as_str() {
                    Some("echo") => json!({
                        "content": [{"type": "text", "text": params["arguments"]["text"]}]
                    }),
                    _ => json!({
                        "content": [{"type": "text", "text": "boom"}],
                        "isError": true
                    }),
                }
            }
            _ => Value::Null,
        };

        write_line(&mut writer, &JsonRpcResponse::success(id, result)).await;
    }
}

async fn write_line(writer: &mut (impl AsyncWriteExt + Unpin), message: &impl serde::Serialize) {
    let mut bytes = serde_json::to_vec(message).unwrap();
    bytes.push(b'\n');
    writer.write_all(&bytes).await.unwrap();
}

async fn connected_client() -> Client {
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    tokio::spawn(serve(server_side));
    let (reader, writer) = tokio::io::split(client_side);
    let client = Client::new("mock", reader, writer);
    client.initialize().await.unwrap();
    client
}

#[tokio::test]
async fn handshake_records_server_info() {
    let client = connected_client().await;
    assert!(client.is_initialized());
    let info = client.server_info().await.unwrap();
    assert_eq!(info.server_info.name, "mock");
}

#[tokio::test]
async fn list_tools_follows_pagination() {
    let client = connected_client().await;
    let names: Vec<String> = client
        .list_tools()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, vec!["echo".to_string(), "fail".to_string()]);
}

#[tokio::test]
async fn call_tool_skips_notifications() {
    let client = connected_client().await;
    let result = client
        .call_tool("echo", Some(json!({"text": "hi"})))
        .await
        .unwrap();
    assert_eq!(result.text(), "hi");
}

#[tokio::test]
async fn error_results_become_errors() {
    let client = connected_client().await;
    let err = client.call_tool("fail", None).await.unwrap_err();
    assert!(matches!(err, Error::ToolCallFailed(ref text) if text == "boom"));
}

#[tokio::test]
async fn silent_provider_times_out() {
    let (client_side, _server_side) = tokio::io::duplex(1024);
    let (reader, writer) = tokio::io::split(client_side);
    let client =
        Client::new("silent", reader, writer).with_timeout(std::time::Duration::from_millis(50));

    let err = client.initialize().await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
}

#[tokio::test]
async fn interrupted_response_breaks_the_connection() {
    let (client_side, server_side) = tokio::io::duplex(1024);
    let (server_reader, mut server_writer) = tokio::io::split(server_side);
    tokio::spawn(async move {
        let mut lines = BufReader::new(server_reader).lines();
        let _ = lines.next_line().await;
        // Half a response, then nothing.
        server_writer
            .write_all(br#"{"jsonrpc":"2.0","id":1,"#)
            .await
            .unwrap();
        while let Ok(Some(_)) = lines.next_line().await {}
    });

    let (reader, writer) = tokio::io::split(client_side);
    let client =
        Client::new("stalled", reader, writer).with_timeout(std::time::Duration::from_millis(50));

    assert!(matches!(client.initialize().await, Err(Error::Timeout(_))));
    assert!(client.is_broken());
    assert!(matches!(
        client.initialize().await,
        Err(Error::ConnectionBroken)
    ));
}

#[tokio::test]
async fn oversized_line_fails_without_waiting_for_its_end() {
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let (server_reader, mut server_writer) = tokio::io::split(server_side);
    tokio::spawn(async move {
        let mut lines = BufReader::new(server_reader).lines();
        let _ = lines.next_line().await;
        let blob = vec![b'x'; MAX_OUTPUT_SIZE + 1];
        let _ = server_writer.write_all(&blob).await;
        // Keep the stream open with no newline in sight.
        while let Ok(Some(_)) = lines.next_line().await {}
    });

    let (reader, writer) = tokio::io::split(client_side);
    let client = Client::new("flood", reader, writer).with_timeout(std::time::Duration::from_secs(5));

    let err = client.initialize().await.unwrap_err();
    assert!(matches!(err, Error::OutputTooLarge { max: MAX_OUTPUT_SIZE, .. }));
    assert!(client.is_broken());
}

#[test]
fn request_ids_are_numbers() {
    let req = JsonRpcRequest::new(3i64, "tools/list");
    assert_eq!(req.id, Some(RequestId::Number(3)));
}
