use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use snippet_runner::{ExecuteResponse, ExecutionService, ServiceConfig};

/// One request line on stdin
#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    /// Echoed back so callers can match responses to requests
    #[serde(default)]
    id: Option<Value>,
    code: Option<String>,
    /// Seconds
    timeout: Option<f64>,
}

/// One response line on stdout
#[derive(Debug, Serialize)]
struct ResponseLine {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    status: u16,
    body: ExecuteResponse,
}

impl ResponseLine {
    fn error(id: Option<Value>, message: impl Into<String>) -> Self {
        Self {
            id,
            status: 400,
            body: ExecuteResponse::Failure {
                error: message.into(),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("snippet_runner=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = ServiceConfig::from_env()?;
    info!(
        "Loaded policy with {} allowed imports, scratch dir {:?}",
        config.policy.len(),
        config.scratch_dir
    );

    let service = ExecutionService::from_config(&config)
        .map_err(|e| anyhow::anyhow!(e.detail()))
        .context("Failed to initialize execution service")?;

    // Fail fast if the interpreter cannot run at all
    let version = service.sandbox().probe().await?;
    info!(
        "Interpreter {:?} ready: {} (default timeout {:?}, max {:?})",
        service.sandbox().interpreter(),
        version,
        config.default_timeout,
        config.max_timeout
    );

    let service = Arc::new(service);
    let stdout = Arc::new(Mutex::new(tokio::io::stdout()));
    let permits = Arc::new(Semaphore::new(config.max_concurrent_runs));
    let mut tasks = JoinSet::new();

    info!("Waiting for requests on stdin...");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let permit = permits.clone().acquire_owned().await?;
        let service = service.clone();
        let stdout = stdout.clone();
        tasks.spawn(async move {
            let response = handle_line(&service, &line).await;
            if let Err(e) = write_response(&stdout, &response).await {
                error!("Failed to write response: {}", e);
            }
            drop(permit);
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("Request task failed: {}", e);
        }
    }

    info!("Input closed, shutting down");
    Ok(())
}

async fn handle_line(service: &ExecutionService, line: &str) -> ResponseLine {
    let request: ExecuteRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            warn!("Failed to parse request: {}", e);
            return ResponseLine::error(None, format!("Invalid request: {}", e));
        }
    };

    let Some(code) = request.code else {
        return ResponseLine::error(request.id, "No code provided");
    };

    let timeout = match request.timeout.map(Duration::try_from_secs_f64).transpose() {
        Ok(timeout) => timeout,
        Err(e) => {
            return ResponseLine::error(request.id, format!("Invalid request: timeout {}", e));
        }
    };

    let result = service.execute(&code, timeout).await;
    ResponseLine {
        id: request.id,
        status: result.status_code(),
        body: result.to_response(),
    }
}

async fn write_response(stdout: &Mutex<Stdout>, response: &ResponseLine) -> Result<()> {
    let mut line = serde_json::to_string(response)?;
    line.push('\n');

    let mut stdout = stdout.lock().await;
    stdout.write_all(line.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}
