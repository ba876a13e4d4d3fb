//! Control socket: server (during `dlq run`) and client (for `dlq pause` and
//! `dlq cancel`).
//! Protocol: one request line, "pause <id>" or "cancel <id>", answered by one
//! reply line, "ok <status>" or "err <CODE> <message>".

use anyhow::{bail, Result};
use dlq_core::service::QueueService;
use dlq_core::store::{JobId, JobStatus};
use std::io::ErrorKind;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlVerb {
    Pause,
    Cancel,
}

impl ControlVerb {
    fn as_str(self) -> &'static str {
        match self {
            ControlVerb::Pause => "pause",
            ControlVerb::Cancel => "cancel",
        }
    }
}

/// Parses "pause <id>" / "cancel <id>". None for anything else.
pub fn parse_request(line: &str) -> Option<(ControlVerb, JobId)> {
    let (verb, id) = line.trim().split_once(' ')?;
    let verb = match verb {
        "pause" => ControlVerb::Pause,
        "cancel" => ControlVerb::Cancel,
        _ => return None,
    };
    Some((verb, id.trim().parse().ok()?))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
    Ok(JobStatus),
    Err { code: String, message: String },
}

impl ControlReply {
    pub fn to_line(&self) -> String {
        match self {
            ControlReply::Ok(status) => format!("ok {status}\n"),
            ControlReply::Err { code, message } => format!("err {code} {message}\n"),
        }
    }

    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end();
        if let Some(status) = line.strip_prefix("ok ") {
            return status.parse().ok().map(ControlReply::Ok);
        }
        let rest = line.strip_prefix("err ")?;
        let (code, message) = rest.split_once(' ').unwrap_or((rest, ""));
        Some(ControlReply::Err {
            code: code.to_string(),
            message: message.to_string(),
        })
    }

    pub fn into_result(self) -> Result<JobStatus> {
        match self {
            ControlReply::Ok(status) => Ok(status),
            ControlReply::Err { code, message } => bail!("{message} ({code})"),
        }
    }
}

async fn handle(service: &QueueService, line: &str) -> ControlReply {
    let Some((verb, id)) = parse_request(line) else {
        return ControlReply::Err {
            code: "VALIDATION_ERROR".to_string(),
            message: format!("malformed control command '{}'", line.trim()),
        };
    };
    let result = match verb {
        ControlVerb::Pause => service.pause(id).await,
        ControlVerb::Cancel => service.cancel(id).await,
    };
    match result {
        Ok(job) => ControlReply::Ok(job.status),
        Err(e) => ControlReply::Err {
            code: e.code().to_string(),
            message: e.to_string(),
        },
    }
}

/// Binds `path` and spawns a task that serves pause/cancel requests through
/// `service`. A stale socket file from a previous run is replaced.
pub fn spawn_control_listener(
    service: QueueService,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path)?;
    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let service = service.clone();
                    tokio::spawn(async move {
                        let (read, mut write) = stream.into_split();
                        let mut reader = BufReader::new(read).lines();
                        while let Ok(Some(line)) = reader.next_line().await {
                            let reply = handle(&service, &line).await;
                            tracing::debug!(request = %line.trim(), reply = %reply.to_line().trim_end(), "control command");
                            if write.write_all(reply.to_line().as_bytes()).await.is_err() {
                                break;
                            }
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

/// Sends one command to a running `dlq run`. `Ok(None)` when nothing listens
/// at `socket_path`.
pub async fn send_command(
    socket_path: &Path,
    verb: ControlVerb,
    job_id: JobId,
) -> Result<Option<ControlReply>> {
    if !socket_path.exists() {
        return Ok(None);
    }
    let stream = match UnixStream::connect(socket_path).await {
        Ok(s) => s,
        Err(e) if matches!(e.kind(), ErrorKind::ConnectionRefused | ErrorKind::NotFound) => {
            tracing::debug!(path = %socket_path.display(), "stale control socket: {}", e);
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };
    let (read, mut write) = stream.into_split();
    write
        .write_all(format!("{} {}\n", verb.as_str(), job_id).as_bytes())
        .await?;
    let Some(line) = BufReader::new(read).lines().next_line().await? else {
        bail!("control socket closed without a reply");
    };
    match ControlReply::parse(&line) {
        Some(reply) => Ok(Some(reply)),
        None => bail!("unexpected control reply '{}'", line),
    }
}

/// [`send_command`] on the default socket path.
pub async fn request(verb: ControlVerb, job_id: JobId) -> Result<Option<ControlReply>> {
    match dlq_core::control::default_control_socket_path() {
        Ok(path) => send_command(&path, verb, job_id).await,
        Err(_) => Ok(None),
    }
}
