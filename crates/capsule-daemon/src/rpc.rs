//! JSON-RPC server over Unix socket.
//!
//! Listens on a Unix domain socket, accepts connections, and dispatches
//! newline-delimited JSON-RPC method calls to the command handlers. After
//! `subscribe_events` the connection also receives `event` notifications.

use std::path::PathBuf;
use std::sync::Arc;

use capsule_sched::SchedulerError;
use capsule_store::StoreError;
use capsule_types::events::Event;
use capsule_wallet::LedgerError;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::commands;
use crate::events::EventFilter;
use crate::DaemonState;

/// JSON-RPC request.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request ID.
    pub id: serde_json::Value,
    /// Method name.
    pub method: String,
    /// Parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// JSON-RPC response.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    /// JSON-RPC version.
    pub jsonrpc: String,
    /// Request ID.
    pub id: serde_json::Value,
    /// Result or error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// Server-initiated notification carrying one event.
#[derive(Debug, Serialize)]
struct RpcNotification<'a> {
    jsonrpc: &'static str,
    method: &'static str,
    params: &'a Event,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcError {
    pub code: i32,
    /// Error name.
    pub message: String,
    /// Optional structured data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcResponse {
    /// Create a success response.
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: serde_json::Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl RpcError {
    fn new(code: i32, message: &str, data: Option<serde_json::Value>) -> Self {
        Self {
            code,
            message: message.to_string(),
            data,
        }
    }

    // Standard JSON-RPC errors

    /// Parse error (-32700).
    pub fn parse_error() -> Self {
        Self::new(-32700, "PARSE_ERROR", None)
    }

    /// Invalid request (-32600).
    pub fn invalid_request() -> Self {
        Self::new(-32600, "INVALID_REQUEST", None)
    }

    /// Method not found (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            -32601,
            "METHOD_NOT_FOUND",
            Some(serde_json::json!({"method": method})),
        )
    }

    /// Invalid params (-32602).
    pub fn invalid_params(detail: &str) -> Self {
        Self::new(
            -32602,
            "INVALID_PARAMS",
            Some(serde_json::json!({"detail": detail})),
        )
    }

    /// Internal error (-32603).
    pub fn internal_error(detail: &str) -> Self {
        Self::new(
            -32603,
            "INTERNAL_ERROR",
            Some(serde_json::json!({"detail": detail})),
        )
    }

    // Storage errors

    /// Content unit not found (-32020).
    pub fn not_found(id: &str) -> Self {
        Self::new(-32020, "NOT_FOUND", Some(serde_json::json!({"id": id})))
    }

    /// Stored content was corrupt and has been removed (-32021).
    pub fn corrupt(id: &str) -> Self {
        Self::new(-32021, "CORRUPT", Some(serde_json::json!({"id": id})))
    }

    /// Storage quota exceeded (-32022).
    pub fn quota_exceeded(used: u64, limit: u64) -> Self {
        Self::new(
            -32022,
            "QUOTA_EXCEEDED",
            Some(serde_json::json!({"used": used, "limit": limit})),
        )
    }

    // Download errors

    /// Unit already queued or downloaded (-32030).
    pub fn already_queued(id: &str) -> Self {
        Self::new(
            -32030,
            "ALREADY_QUEUED_OR_DOWNLOADED",
            Some(serde_json::json!({"id": id})),
        )
    }

    /// Download job not found (-32031).
    pub fn job_not_found(id: u64) -> Self {
        Self::new(-32031, "JOB_NOT_FOUND", Some(serde_json::json!({"job_id": id})))
    }

    // Wallet errors

    /// Day already closed (-32040).
    pub fn day_closed(day: u32) -> Self {
        Self::new(-32040, "DAY_CLOSED", Some(serde_json::json!({"day": day})))
    }
}

impl From<StoreError> for RpcError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => RpcError::not_found(&id),
            StoreError::Corrupt(id) => RpcError::corrupt(&id),
            StoreError::QuotaExceeded { used, limit } => RpcError::quota_exceeded(used, limit),
            other => RpcError::internal_error(&other.to_string()),
        }
    }
}

impl From<SchedulerError> for RpcError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::AlreadyQueuedOrDownloaded(id) => RpcError::already_queued(&id),
            SchedulerError::JobNotFound(id) => RpcError::job_not_found(id),
            SchedulerError::Store(e) => e.into(),
            SchedulerError::Ledger(e) => e.into(),
            other => RpcError::internal_error(&other.to_string()),
        }
    }
}

impl From<LedgerError> for RpcError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::DayClosed(day) => RpcError::day_closed(day.0),
            other => RpcError::internal_error(&other.to_string()),
        }
    }
}

impl From<anyhow::Error> for RpcError {
    fn from(e: anyhow::Error) -> Self {
        RpcError::internal_error(&e.to_string())
    }
}

/// The RPC server.
pub struct RpcServer {
    state: Arc<DaemonState>,
    socket_path: PathBuf,
}

impl RpcServer {
    /// Create a new RPC server.
    pub fn new(state: Arc<DaemonState>, socket_path: PathBuf) -> Self {
        Self { state, socket_path }
    }

    /// Run the server, accepting connections.
    pub async fn run(&self) -> anyhow::Result<()> {
        // Remove stale socket file
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("IPC server listening on {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(state, stream).await {
                            warn!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Handle a single client connection.
///
/// One request per line. After `subscribe_events` the connection also
/// carries `event` notifications until it closes.
async fn handle_connection(
    state: Arc<DaemonState>,
    stream: tokio::net::UnixStream,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut subscription: Option<(broadcast::Receiver<Event>, EventFilter)> = None;

    loop {
        let next = match subscription.as_mut() {
            Some((events, filter)) => tokio::select! {
                line = lines.next_line() => line?,
                received = events.recv() => {
                    match received {
                        Ok(event) if filter.matches(&event) => {
                            let note = RpcNotification {
                                jsonrpc: "2.0",
                                method: "event",
                                params: &event,
                            };
                            write_line(&mut writer, &note).await?;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "event subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => subscription = None,
                    }
                    continue;
                }
            },
            None => lines.next_line().await?,
        };
        let Some(line) = next else {
            break; // EOF
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) if request.jsonrpc != "2.0" => {
                RpcResponse::error(request.id, RpcError::invalid_request())
            }
            Ok(request) if request.method == "subscribe_events" => {
                match commands::opt_param::<EventFilter>(&request.params, "filter") {
                    Ok(filter) => {
                        subscription = Some((state.event_bus.subscribe(), filter.unwrap_or_default()));
                        RpcResponse::success(
                            request.id,
                            serde_json::json!({ "sequence": state.event_bus.sequence() }),
                        )
                    }
                    Err(e) => RpcResponse::error(request.id, e),
                }
            }
            Ok(request) => dispatch_request(&state, request).await,
            Err(_) => RpcResponse::error(serde_json::Value::Null, RpcError::parse_error()),
        };

        write_line(&mut writer, &response).await?;
    }

    Ok(())
}

async fn write_line<T: Serialize>(writer: &mut OwnedWriteHalf, message: &T) -> anyhow::Result<()> {
    let mut json = serde_json::to_string(message)?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Dispatch a JSON-RPC request to the appropriate command handler.
pub(crate) async fn dispatch_request(state: &Arc<DaemonState>, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();
    let method = request.method.as_str();
    let params = &request.params;

    debug!("Dispatching RPC method: {}", method);

    let result = match method {
        // Content commands
        "list_content" => commands::content::list_content(state, params).await,
        "get_content" => commands::content::get_content(state, params).await,
        "discover_content" => commands::content::discover_content(state, params).await,
        "remove_content" => commands::content::remove_content(state, params).await,
        "set_resource_caching" => commands::content::set_resource_caching(state, params).await,
        "set_auto_delete_resources" => {
            commands::content::set_auto_delete_resources(state, params).await
        }
        "get_storage_usage" => commands::content::get_storage_usage(state).await,

        // Download commands
        "enqueue_download" => commands::downloads::enqueue_download(state, params).await,
        "cancel_download" => commands::downloads::cancel_download(state, params).await,
        "get_download_jobs" => commands::downloads::get_download_jobs(state).await,

        // Data Wallet commands
        "get_usage_summary" => commands::wallet::get_usage_summary(state, params).await,
        "get_usage_history" => commands::wallet::get_usage_history(state, params).await,
        "get_usage_breakdown" => commands::wallet::get_usage_breakdown(state, params).await,
        "record_live_usage" => commands::wallet::record_live_usage(state, params).await,
        "get_wallet_report" => commands::wallet::get_wallet_report(state, params).await,

        // App state commands
        "get_app_state" => commands::app::get_app_state(state).await,
        "dispatch_action" => commands::app::dispatch_action(state, params).await,
        "set_network_status" => commands::app::set_network_status(state, params).await,

        _ => Err(RpcError::method_not_found(method)),
    };

    match result {
        Ok(value) => RpcResponse::success(id, value),
        Err(err) => RpcResponse::error(id, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsule_types::usage::Day;

    fn request(method: &str, params: serde_json::Value) -> RpcRequest {
        RpcRequest {
            jsonrpc: "2.0".to_string(),
            id: serde_json::json!(1),
            method: method.to_string(),
            params,
        }
    }

    #[test]
    fn test_rpc_error_codes() {
        assert_eq!(RpcError::method_not_found("unknown").code, -32601);
        assert_eq!(RpcError::from(StoreError::NotFound("x".into())).code, -32020);
        assert_eq!(
            RpcError::from(StoreError::QuotaExceeded { used: 1, limit: 2 }).message,
            "QUOTA_EXCEEDED"
        );
        assert_eq!(
            RpcError::from(SchedulerError::AlreadyQueuedOrDownloaded("c3".into())).code,
            -32030
        );
        assert_eq!(RpcError::from(LedgerError::DayClosed(Day(4))).code, -32040);
    }

    #[test]
    fn test_rpc_response_shapes() {
        let ok = RpcResponse::success(serde_json::json!(1), serde_json::json!({"ok": true}));
        assert!(ok.result.is_some());
        assert!(ok.error.is_none());

        let err = RpcResponse::error(serde_json::json!(1), RpcError::internal_error("test"));
        assert!(err.result.is_none());
        assert!(err.error.is_some());
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (state, _dir) = crate::tests::test_state().await;
        let response = dispatch_request(&state, request("purchase_content", serde_json::json!({}))).await;
        assert_eq!(response.error.map(|e| e.code), Some(-32601));
    }

    #[tokio::test]
    async fn test_socket_round_trip_with_events() {
        use tokio::net::UnixStream;

        let (state, dir) = crate::tests::test_state().await;
        let socket = dir.path().join("test.sock");
        let server = RpcServer::new(Arc::clone(&state), socket.clone());
        tokio::spawn(async move { server.run().await });

        let mut stream = None;
        for _ in 0..50 {
            if let Ok(s) = UnixStream::connect(&socket).await {
                stream = Some(s);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let (reader, mut writer) = stream.expect("connect").into_split();
        let mut lines = BufReader::new(reader).lines();

        writer
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"subscribe_events\",\"params\":{}}\n")
            .await
            .expect("write");
        let reply: serde_json::Value =
            serde_json::from_str(&lines.next_line().await.expect("read").expect("line")).expect("json");
        assert!(reply["result"]["sequence"].is_u64());

        writer
            .write_all(
                b"{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"discover_content\",\"params\":{\"id\":\"c1\",\"kind\":\"capsule\",\"title\":\"Capsule 1\",\"size_bytes\":10}}\n",
            )
            .await
            .expect("write");

        // The notification and the response may arrive in either order.
        let mut saw_event = false;
        let mut saw_response = false;
        for _ in 0..2 {
            let line = lines.next_line().await.expect("read").expect("line");
            let msg: serde_json::Value = serde_json::from_str(&line).expect("json");
            if msg["method"] == "event" {
                assert_eq!(msg["params"]["event_type"], "content_discovered");
                saw_event = true;
            } else {
                assert_eq!(msg["result"]["discovered"], true);
                saw_response = true;
            }
        }
        assert!(saw_event && saw_response);

        writer.write_all(b"not json\n").await.expect("write");
        let err: serde_json::Value =
            serde_json::from_str(&lines.next_line().await.expect("read").expect("line")).expect("json");
        assert_eq!(err["error"]["code"], -32700);
    }
}
