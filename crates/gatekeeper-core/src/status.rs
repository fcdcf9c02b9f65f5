//! Local status query channel.
//!
//! One ASCII request line per connection, one response line back:
//!
//! ```text
//! PING   -> PONG
//! STATUS -> OK:<state>|CanPause=<bool>|CanStop=<bool>|CanShutdown=<bool>
//! *      -> ERROR:<message>
//! ```
//!
//! Booleans are written `True`/`False` and parsed case-insensitively. The
//! transport is a Unix domain socket restricted to its owner.

use anyhow::{anyhow, Result};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub const STATUS_TIMEOUT: Duration = Duration::from_secs(5);
pub const MAX_REQUEST_LINE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusRequest {
    Status,
    Ping,
}

impl FromStr for StatusRequest {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("STATUS") {
            Ok(StatusRequest::Status)
        } else if s.eq_ignore_ascii_case("PING") {
            Ok(StatusRequest::Ping)
        } else if s.is_empty() {
            Err("empty request".to_string())
        } else {
            Err(format!("unknown command: {}", sanitize(s)))
        }
    }
}

impl fmt::Display for StatusRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusRequest::Status => f.write_str("STATUS"),
            StatusRequest::Ping => f.write_str("PING"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    StartPending,
    StopPending,
    Running,
    ContinuePending,
    PausePending,
    Paused,
}

impl ServiceState {
    const ALL: [ServiceState; 7] = [
        ServiceState::Stopped,
        ServiceState::StartPending,
        ServiceState::StopPending,
        ServiceState::Running,
        ServiceState::ContinuePending,
        ServiceState::PausePending,
        ServiceState::Paused,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceState::Stopped => "Stopped",
            ServiceState::StartPending => "StartPending",
            ServiceState::StopPending => "StopPending",
            ServiceState::Running => "Running",
            ServiceState::ContinuePending => "ContinuePending",
            ServiceState::PausePending => "PausePending",
            ServiceState::Paused => "Paused",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown service state: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceStatus {
    pub state: ServiceState,
    pub can_pause: bool,
    pub can_stop: bool,
    pub can_shutdown: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusResponse {
    Pong,
    Ok(ServiceStatus),
    Error(String),
}

impl StatusResponse {
    pub fn error(message: impl fmt::Display) -> Self {
        StatusResponse::Error(sanitize(&message.to_string()))
    }
}

impl fmt::Display for StatusResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusResponse::Pong => f.write_str("PONG"),
            StatusResponse::Ok(status) => write!(
                f,
                "OK:{}|CanPause={}|CanStop={}|CanShutdown={}",
                status.state,
                wire_bool(status.can_pause),
                wire_bool(status.can_stop),
                wire_bool(status.can_shutdown)
            ),
            StatusResponse::Error(message) => write!(f, "ERROR:{message}"),
        }
    }
}

impl FromStr for StatusResponse {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line == "PONG" {
            return Ok(StatusResponse::Pong);
        }
        if let Some(message) = line.strip_prefix("ERROR:") {
            return Ok(StatusResponse::Error(message.to_string()));
        }
        let body = line
            .strip_prefix("OK:")
            .ok_or_else(|| anyhow!("unrecognized status response: {line}"))?;
        let mut fields = body.split('|');
        let state = fields
            .next()
            .ok_or_else(|| anyhow!("missing state"))?
            .parse::<ServiceState>()
            .map_err(|e| anyhow!(e))?;
        let mut flag = |name: &str| -> Result<bool> {
            let field = fields
                .next()
                .ok_or_else(|| anyhow!("missing {name}"))?;
            let value = field
                .strip_prefix(name)
                .and_then(|rest| rest.strip_prefix('='))
                .ok_or_else(|| anyhow!("expected {name}=<bool>, got {field}"))?;
            parse_wire_bool(value).ok_or_else(|| anyhow!("invalid boolean for {name}: {value}"))
        };
        let status = ServiceStatus {
            state,
            can_pause: flag("CanPause")?,
            can_stop: flag("CanStop")?,
            can_shutdown: flag("CanShutdown")?,
        };
        if fields.next().is_some() {
            return Err(anyhow!("trailing fields in status response"));
        }
        Ok(StatusResponse::Ok(status))
    }
}

/// Supplies the status reported for `STATUS`.
pub trait StatusProvider: Send + Sync {
    fn status(&self) -> Result<ServiceStatus>;
}

/// Answer one request line.
pub fn respond(provider: &dyn StatusProvider, line: &str) -> StatusResponse {
    match line.parse::<StatusRequest>() {
        Ok(StatusRequest::Ping) => StatusResponse::Pong,
        Ok(StatusRequest::Status) => match provider.status() {
            Ok(status) => StatusResponse::Ok(status),
            Err(err) => StatusResponse::error(err),
        },
        Err(err) => StatusResponse::error(err),
    }
}

fn wire_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

fn parse_wire_bool(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Responses are single lines; strip anything that would break framing.
fn sanitize(message: &str) -> String {
    message
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect()
}

// ── Transport ───────────────────────────────────────────────────────────────

#[cfg(unix)]
mod transport {
    use super::*;
    use std::path::Path;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{UnixListener, UnixStream};
    use tokio::task::JoinHandle;
    use tracing::{debug, warn};

    /// Bind the status socket, replacing a stale one, owner-only.
    pub fn bind_status_socket(path: &Path) -> Result<UnixListener> {
        use std::os::unix::fs::PermissionsExt;
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(path)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        Ok(listener)
    }

    pub fn spawn_status_server(
        path: &Path,
        provider: Arc<dyn StatusProvider>,
    ) -> Result<JoinHandle<()>> {
        let listener = bind_status_socket(path)?;
        Ok(tokio::spawn(serve_status(listener, provider)))
    }

    pub async fn serve_status(listener: UnixListener, provider: Arc<dyn StatusProvider>) {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let provider = provider.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(stream, provider).await {
                            debug!("status connection error: {err}");
                        }
                    });
                }
                Err(err) => {
                    warn!("status ipc accept error: {err}");
                    break;
                }
            }
        }
    }

    async fn handle_connection(stream: UnixStream, provider: Arc<dyn StatusProvider>) -> Result<()> {
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half.take(MAX_REQUEST_LINE as u64));
        let mut line = String::new();
        let read = tokio::time::timeout(STATUS_TIMEOUT, reader.read_line(&mut line)).await;
        let response = match read {
            Err(_) => StatusResponse::error("request timed out"),
            Ok(Err(err)) => StatusResponse::error(format!("read failed: {err}")),
            Ok(Ok(_)) if !line.ends_with('\n') && line.len() >= MAX_REQUEST_LINE => {
                StatusResponse::error("request too long")
            }
            Ok(Ok(_)) => respond(provider.as_ref(), &line),
        };
        writer.write_all(format!("{response}\n").as_bytes()).await?;
        writer.shutdown().await?;
        Ok(())
    }

    /// Send one request and wait at most [`STATUS_TIMEOUT`] for the answer.
    pub async fn query_status(path: &Path, request: StatusRequest) -> Result<StatusResponse> {
        tokio::time::timeout(STATUS_TIMEOUT, async {
            let stream = UnixStream::connect(path)
                .await
                .map_err(|e| anyhow!("status connect failed: {e}"))?;
            let (read_half, mut writer) = stream.into_split();
            writer.write_all(format!("{request}\n").as_bytes()).await?;
            writer.flush().await?;
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();
            reader.read_line(&mut line).await?;
            if line.is_empty() {
                return Err(anyhow!("status channel closed without a response"));
            }
            line.parse::<StatusResponse>()
        })
        .await
        .map_err(|_| anyhow!("status query timed out"))?
    }
}

#[cfg(unix)]
pub use transport::{bind_status_socket, query_status, serve_status, spawn_status_server};

#[cfg(not(unix))]
pub async fn query_status(
    _path: &std::path::Path,
    _request: StatusRequest,
) -> Result<StatusResponse> {
    Err(anyhow!(
        "status channel is only available on unix via UDS transport"
    ))
}

#[cfg(not(unix))]
pub fn spawn_status_server(
    _path: &std::path::Path,
    _provider: Arc<dyn StatusProvider>,
) -> Result<tokio::task::JoinHandle<()>> {
    Err(anyhow!(
        "status server is only available on unix via UDS transport"
    ))
}
