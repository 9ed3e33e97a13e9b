//! Status HTTP endpoint
//!
//! Serves the task's diagnostics snapshot for liveness probes and
//! operational inspection. Deliberately minimal: one listener, hand-rolled
//! HTTP, no framework dependency.

use crate::task::MirrorTask;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Status endpoint configuration
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct StatusConfig {
    /// Enable the endpoint
    #[serde(default)]
    pub enabled: bool,

    /// Listen port
    #[serde(default = "default_status_port")]
    pub port: u16,

    /// Diagnostics path
    #[serde(default = "default_status_path")]
    pub path: String,
}

fn default_status_port() -> u16 {
    8089
}

fn default_status_path() -> String {
    "/status".to_string()
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_status_port(),
            path: default_status_path(),
        }
    }
}

/// Start the status endpoint for a task
pub async fn serve_status(config: StatusConfig, task: Arc<MirrorTask>) -> std::io::Result<()> {
    if !config.enabled {
        debug!("status endpoint disabled");
        return Ok(());
    }

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port)
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let listener = TcpListener::bind(addr).await?;
    info!("status endpoint listening on http://{}{}", addr, config.path);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let task = task.clone();
        let path = config.path.clone();

        tokio::spawn(async move {
            let mut buf = [0u8; 1024];

            match socket.read(&mut buf).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buf[..n]);
                    let Some(request_line) = request.lines().next() else {
                        return;
                    };
                    let parts: Vec<&str> = request_line.split_whitespace().collect();
                    if parts.len() < 2 {
                        return;
                    }
                    let (method, req_path) = (parts[0], parts[1]);
                    debug!("status request: {} {} from {}", method, req_path, peer);

                    let response = if method == "GET" && req_path == path {
                        build_status_response(&task).await
                    } else if method == "GET" && req_path == "/live" {
                        build_live_response()
                    } else {
                        build_404_response()
                    };

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        warn!("failed to send status response: {}", e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("status socket error: {}", e);
                }
            }
        });
    }
}

async fn build_status_response(task: &MirrorTask) -> String {
    let diagnostics = task.diagnostics().await;
    let body = serde_json::json!({
        "task": diagnostics.task,
        "status": task.status().to_string(),
        "group_id": task.group_id(),
        "records_mirrored": task.records_mirrored(),
        "send_errors": task.send_errors(),
        "assigned_partitions": diagnostics.assigned_partitions,
        "manual_paused_partitions": diagnostics.manual_paused_partitions,
        "auto_paused_on_error": diagnostics.auto_paused_on_error,
        "auto_paused_on_in_flight_messages": diagnostics.auto_paused_on_in_flight_messages,
        "update_count": diagnostics.update_count,
    });

    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n{}",
        serde_json::to_string_pretty(&body).unwrap_or_default()
    )
}

fn build_live_response() -> String {
    let body = serde_json::json!({ "alive": true });
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n{}",
        serde_json::to_string(&body).unwrap_or_default()
    )
}

fn build_404_response() -> String {
    "HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\nNot Found"
        .to_string()
}
