//! Engine Integration Tests
//!
//! Exercises correlation, cancellation, timeouts, progress, elicitation,
//! batching, and the initialization gate over an in-process transport
//! pair, with the client and server facades where they apply.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use rill_mcp::engine::{EngineConfig, FnRequestHandler, IncomingRequest, JsonRpcEngine};
use rill_mcp::integration::{ElicitationHandler, McpClient, McpServer};
use rill_mcp::protocol::{
    Content, ElicitationAction, ElicitationRequest, ElicitationResult, JsonRpcResponse, McpError,
    McpResult, RequestId, ServerCapabilities, ToolCapabilities,
};
use rill_mcp::transport::{MemoryTransport, Transport};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Server engine without the handshake gate, for raw wire-level tests
async fn raw_server(transport: MemoryTransport) -> JsonRpcEngine {
    init_tracing();
    let config = EngineConfig {
        enforce_initialization: false,
        ..EngineConfig::server()
    };
    JsonRpcEngine::start(transport, config).await.unwrap()
}

/// A facade client/server pair plus the client's progress collector
async fn facade_pair() -> (McpClient, JsonRpcEngine, Arc<Mutex<Vec<f64>>>) {
    init_tracing();
    let (left, right) = MemoryTransport::pair();

    let server = McpServer::builder()
        .server_info("s", "1")
        .capabilities(ServerCapabilities {
            tools: Some(ToolCapabilities::default()),
            ..Default::default()
        })
        .with_method_handler(
            "tools/call",
            Arc::new(FnRequestHandler(|request: IncomingRequest| async move {
                let params: Value = request.params_as()?;
                let a = params["arguments"]["a"].as_i64().unwrap_or(0);
                let b = params["arguments"]["b"].as_i64().unwrap_or(0);
                Ok(json!({
                    "content": [{"type": "text", "text": (a + b).to_string()}],
                    "isError": false
                }))
            })),
        )
        .with_method_handler(
            "tasks/run",
            Arc::new(FnRequestHandler(|request: IncomingRequest| async move {
                request.progress.report(0.0, Some(100.0), None).await?;
                request.progress.report(50.0, Some(100.0), None).await?;
                request
                    .progress
                    .report(100.0, Some(100.0), Some("done".to_string()))
                    .await?;
                Ok(json!({"done": true}))
            })),
        )
        .with_method_handler(
            "tasks/slow",
            Arc::new(FnRequestHandler(|_request: IncomingRequest| async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(json!({"done": true}))
            })),
        )
        .build();
    let server_engine = server.connect(right).await.unwrap();

    let collected: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&collected);
    let client = McpClient::builder()
        .client_info("c", "1")
        .default_timeout(Duration::from_secs(5))
        .on_progress(Arc::new(move |params| {
            sink.lock().unwrap().push(params.progress);
        }))
        .connect(left)
        .await
        .unwrap();

    (client, server_engine, collected)
}

#[tokio::test]
async fn initialize_round_trip_negotiates() {
    let (client, server_engine, _progress) = facade_pair().await;

    let response = client.initialize().await.unwrap();
    assert_eq!(response.server_info.name, "s");
    assert!(response.capabilities.tools.is_some());

    // The server's gate opens once the initialized notification lands.
    tokio::time::timeout(Duration::from_secs(1), async {
        while !server_engine.is_ready() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("server never became ready");

    client.close().await;
}

#[tokio::test]
async fn concurrent_calls_resolve_with_matching_payloads() {
    let (left, right) = MemoryTransport::pair();
    let server = raw_server(right).await;
    server
        .register_handler(
            "echo",
            Arc::new(FnRequestHandler(|request: IncomingRequest| async move {
                Ok(request.params.unwrap_or(Value::Null))
            })),
        )
        .await;

    let client = JsonRpcEngine::start(left, EngineConfig::client())
        .await
        .unwrap();

    let calls = (0..8).map(|i| {
        let client = client.clone();
        async move {
            let result = client.call("echo", Some(json!({"index": i}))).await.unwrap();
            (i, result)
        }
    });
    for (i, result) in futures::future::join_all(calls).await {
        assert_eq!(result, json!({"index": i}));
    }
    assert_eq!(client.pending_requests(), 0);

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn cancellation_resolves_exactly_once() {
    let (client, _server_engine, _progress) = facade_pair().await;
    client.initialize().await.unwrap();

    let engine = client.engine().clone();
    let call = tokio::spawn(async move { engine.call("tasks/slow", None).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    // The handshake took request id 1; the slow call is id 2.
    client
        .cancel(&RequestId::new_number(2), Some("user".to_string()))
        .await
        .unwrap();

    let result = call.await.unwrap();
    assert_eq!(
        result.unwrap_err(),
        McpError::request_cancelled(Some("user".to_string()))
    );
    assert_eq!(client.engine().pending_requests(), 0);

    // Cancelling an id that is no longer in flight is a no-op.
    client
        .cancel(&RequestId::new_number(2), None)
        .await
        .unwrap();

    client.close().await;
}

#[tokio::test]
async fn timeout_resolves_without_leaking_the_continuation() {
    let (client, _server_engine, _progress) = facade_pair().await;
    client.initialize().await.unwrap();

    let error = client
        .call_with_timeout("tasks/slow", None, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(error, McpError::RequestTimeout { .. }));
    assert_eq!(client.engine().pending_requests(), 0);

    client.close().await;
}

#[tokio::test]
async fn tool_call_round_trip() {
    let (client, _server_engine, _progress) = facade_pair().await;
    client.initialize().await.unwrap();

    let result = client.call_tool("add", json!({"a": 2, "b": 3})).await.unwrap();
    assert!(!result.is_error);
    assert_eq!(result.content.len(), 1);
    let Content::Text { text } = &result.content[0];
    assert_eq!(text, "5");

    client.close().await;
}

#[tokio::test]
async fn progress_is_monotonic_and_correlated() {
    let (client, _server_engine, progress) = facade_pair().await;
    client.initialize().await.unwrap();

    let result = client
        .call("tasks/run", Some(json!({"_meta": {"progressToken": "p1"}})))
        .await
        .unwrap();
    assert_eq!(result, json!({"done": true}));

    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if progress.lock().unwrap().len() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("progress notifications never arrived");

    assert_eq!(*progress.lock().unwrap(), vec![0.0, 50.0, 100.0]);

    client.close().await;
}

#[tokio::test]
async fn requests_without_progress_token_emit_nothing() {
    let (client, _server_engine, progress) = facade_pair().await;
    client.initialize().await.unwrap();

    let result = client.call("tasks/run", None).await.unwrap();
    assert_eq!(result, json!({"done": true}));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(progress.lock().unwrap().is_empty());

    client.close().await;
}

struct AcceptingUser;

#[async_trait::async_trait]
impl ElicitationHandler for AcceptingUser {
    async fn handle(&self, request: ElicitationRequest) -> McpResult<ElicitationResult> {
        assert_eq!(request.message, "really delete?");
        Ok(ElicitationResult {
            action: ElicitationAction::Accept,
            content: Some(json!({"confirm": true})),
        })
    }
}

#[tokio::test]
async fn elicitation_round_trip() {
    let (left, right) = MemoryTransport::pair();

    let server = McpServer::builder()
        .server_info("s", "1")
        .with_method_handler(
            "danger/delete",
            Arc::new(FnRequestHandler(|request: IncomingRequest| async move {
                let answer = McpServer::elicit(
                    &request.peer,
                    ElicitationRequest {
                        message: "really delete?".to_string(),
                        requested_schema: None,
                    },
                )
                .await?;
                Ok(json!({"action": answer.action}))
            })),
        )
        .build();
    let _server_engine = server.connect(right).await.unwrap();

    let client = McpClient::builder()
        .with_elicitation_handler(Arc::new(AcceptingUser))
        .connect(left)
        .await
        .unwrap();
    client.initialize().await.unwrap();

    let result = client.call("danger/delete", None).await.unwrap();
    assert_eq!(result, json!({"action": "accept"}));

    client.close().await;
}

#[tokio::test]
async fn requests_before_initialization_are_rejected() {
    let (mut left, right) = MemoryTransport::pair();

    let server = McpServer::builder().server_info("s", "1").build();
    let _server_engine = server.connect(right).await.unwrap();

    left.connect().await.unwrap();
    left.send(
        bytes::Bytes::from(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#),
        None,
    )
    .await
    .unwrap();

    let message = left.receive().await.unwrap();
    let response: JsonRpcResponse = serde_json::from_slice(&message.data).unwrap();
    assert_eq!(response.error.as_ref().unwrap()["code"], -32600);
}

#[tokio::test]
async fn batch_responses_preserve_input_order_and_omit_notifications() {
    let (mut left, right) = MemoryTransport::pair();
    let server = raw_server(right).await;
    server
        .register_handler(
            "math/add",
            Arc::new(FnRequestHandler(|request: IncomingRequest| async move {
                let params: Value = request.params_as()?;
                let sum = params["a"].as_i64().unwrap_or(0) + params["b"].as_i64().unwrap_or(0);
                Ok(json!(sum))
            })),
        )
        .await;

    left.connect().await.unwrap();
    let batch = r#"[
        {"jsonrpc":"2.0","id":1,"method":"math/add","params":{"a":1,"b":2}},
        {"jsonrpc":"2.0","method":"notifications/noop"},
        {"jsonrpc":"2.0","id":2,"method":"math/add","params":{"a":3,"b":4}}
    ]"#;
    left.send(bytes::Bytes::from(batch), None).await.unwrap();

    let message = left.receive().await.unwrap();
    let responses: Vec<JsonRpcResponse> = serde_json::from_slice(&message.data).unwrap();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].id, Some(RequestId::new_number(1)));
    assert_eq!(responses[0].result, Some(json!(3)));
    assert_eq!(responses[1].id, Some(RequestId::new_number(2)));
    assert_eq!(responses[1].result, Some(json!(7)));

    server.close().await;
}

#[tokio::test]
async fn unknown_method_answers_method_not_found() {
    let (left, right) = MemoryTransport::pair();
    let server = raw_server(right).await;
    let client = JsonRpcEngine::start(left, EngineConfig::client())
        .await
        .unwrap();

    let error = client.call("no/such", None).await.unwrap_err();
    assert!(matches!(error, McpError::MethodNotFound { .. }));

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn close_is_idempotent_and_fails_pending() {
    let (left, right) = MemoryTransport::pair();
    let server = raw_server(right).await;
    server
        .register_handler(
            "hang",
            Arc::new(FnRequestHandler(|_request: IncomingRequest| async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Value::Null)
            })),
        )
        .await;

    let client = JsonRpcEngine::start(left, EngineConfig::client())
        .await
        .unwrap();
    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.call("hang", None).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    client.close().await;
    client.close().await;

    let result = pending.await.unwrap();
    assert_eq!(result.unwrap_err(), McpError::connection_closed());

    server.close().await;
}
