//! Remote shell sessions.
//!
//! The pipeline only sees the [`SessionProvider`] / [`NodeSession`] traits;
//! the production implementation drives libssh2 from blocking tasks. A
//! session failure is not an error path for the pipeline: the caller turns
//! it into a `system.ssh` finding and moves on to the next node.

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::model::{NodeSpec, RawPayload};

const LIBSSH2_ERROR_TIMEOUT: i32 = -37;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("no valid connection: {0}")]
    NoValidConnection(String),
    #[error("connection timed out: {0}")]
    Timeout(String),
    #[error("ssh internal error: {0}")]
    SshInternal(String),
    #[error("unknown ssh failure: {0}")]
    Unknown(String),
}

impl SessionError {
    pub fn class(&self) -> &'static str {
        match self {
            SessionError::Auth(_) => "auth",
            SessionError::NoValidConnection(_) => "no_valid_connection",
            SessionError::Timeout(_) => "timeout",
            SessionError::SshInternal(_) => "ssh_internal",
            SessionError::Unknown(_) => "unknown",
        }
    }

    /// Authentication failures abort the retry loop: the credentials will not
    /// get better on the next attempt.
    fn retryable(&self) -> bool {
        !matches!(self, SessionError::Auth(_))
    }
}

/// A live remote shell. `exec` never fails out of the pipeline; execution
/// problems are encoded in the returned payload.
#[async_trait]
pub trait NodeSession: Send + Sync {
    async fn exec(&self, command: &str, timeout: Duration) -> RawPayload;
}

#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn connect(&self, node: &NodeSpec) -> Result<Box<dyn NodeSession>, SessionError>;
}

/// libssh2-backed provider with a fixed-delay retry policy.
pub struct SshSessionProvider {
    connect_timeout: Duration,
    retries: u32,
    retry_delay: Duration,
}

impl SshSessionProvider {
    pub fn new(connect_timeout: Duration, retries: u32, retry_delay: Duration) -> Self {
        Self {
            connect_timeout,
            retries: retries.max(1),
            retry_delay,
        }
    }

    pub fn from_config(app: &AppConfig) -> Self {
        Self::new(
            Duration::from_secs(app.ssh_connect_timeout_seconds),
            app.ssh_retries,
            Duration::from_secs(app.ssh_retry_delay_seconds),
        )
    }
}

#[async_trait]
impl SessionProvider for SshSessionProvider {
    async fn connect(&self, node: &NodeSpec) -> Result<Box<dyn NodeSession>, SessionError> {
        let mut last_error = SessionError::Unknown("no connection attempt made".to_string());
        for attempt in 1..=self.retries {
            let target = node.clone();
            let timeout = self.connect_timeout;
            let outcome = task::spawn_blocking(move || connect_blocking(&target, timeout)).await;
            match outcome {
                Ok(Ok(session)) => {
                    debug!(host = %node.host, port = node.port, "ssh session established");
                    return Ok(Box::new(SshSession {
                        inner: Arc::new(Mutex::new(session)),
                    }));
                }
                Ok(Err(err)) => {
                    warn!(
                        host = %node.host,
                        attempt,
                        retries = self.retries,
                        error = %err,
                        "ssh connection attempt failed"
                    );
                    let fatal = !err.retryable();
                    last_error = err;
                    if fatal {
                        break;
                    }
                }
                Err(join_err) => {
                    last_error = SessionError::Unknown(join_err.to_string());
                }
            }
            if attempt < self.retries {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        Err(last_error)
    }
}

fn connect_blocking(node: &NodeSpec, timeout: Duration) -> Result<ssh2::Session, SessionError> {
    let address = (node.host.as_str(), node.port)
        .to_socket_addrs()
        .map_err(|err| SessionError::NoValidConnection(err.to_string()))?
        .next()
        .ok_or_else(|| {
            SessionError::NoValidConnection(format!("no address resolved for {}", node.host))
        })?;

    let tcp = TcpStream::connect_timeout(&address, timeout).map_err(|err| match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            SessionError::Timeout(err.to_string())
        }
        _ => SessionError::NoValidConnection(err.to_string()),
    })?;

    let mut session =
        ssh2::Session::new().map_err(|err| SessionError::SshInternal(err.to_string()))?;
    session.set_timeout(timeout.as_millis() as u32);
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|err| classify_ssh_error(&err, false))?;
    session
        .userauth_password(&node.username, &node.password)
        .map_err(|err| classify_ssh_error(&err, true))?;
    if !session.authenticated() {
        return Err(SessionError::Auth(
            "server rejected the provided credentials".to_string(),
        ));
    }
    Ok(session)
}

fn classify_ssh_error(err: &ssh2::Error, auth_phase: bool) -> SessionError {
    if is_ssh_timeout(err) {
        SessionError::Timeout(err.to_string())
    } else if auth_phase {
        SessionError::Auth(err.to_string())
    } else {
        SessionError::SshInternal(err.to_string())
    }
}

fn is_ssh_timeout(err: &ssh2::Error) -> bool {
    match err.code() {
        ssh2::ErrorCode::Session(code) => code == LIBSSH2_ERROR_TIMEOUT,
        _ => false,
    }
}

struct SshSession {
    // libssh2 sessions are not thread-safe; the mutex also hands Sync to the
    // trait object.
    inner: Arc<Mutex<ssh2::Session>>,
}

#[async_trait]
impl NodeSession for SshSession {
    async fn exec(&self, command: &str, timeout: Duration) -> RawPayload {
        let inner = Arc::clone(&self.inner);
        let command = command.to_string();
        match task::spawn_blocking(move || exec_blocking(&inner, &command, timeout)).await {
            Ok(payload) => payload,
            Err(err) => RawPayload::err(format!("command task failed: {err}")),
        }
    }
}

fn exec_blocking(session: &Mutex<ssh2::Session>, command: &str, timeout: Duration) -> RawPayload {
    let session = session.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    session.set_timeout(timeout.as_millis() as u32);
    match run_channel(&session, command) {
        Ok((0, output, error)) => RawPayload {
            success: true,
            output,
            error,
        },
        Ok((code, output, error)) => RawPayload::err(format!(
            "ExitCode:{code}, Stderr:'{}', Stdout:'{}'",
            error.trim(),
            output.trim()
        )),
        Err(err) if err.is_timeout() => RawPayload::err("timeout"),
        Err(err) => RawPayload::err(format!("command execution failed: {err}")),
    }
}

#[derive(Debug, thiserror::Error)]
enum ExecError {
    #[error("{0}")]
    Ssh(#[from] ssh2::Error),
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl ExecError {
    fn is_timeout(&self) -> bool {
        match self {
            ExecError::Ssh(err) => is_ssh_timeout(err),
            ExecError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ),
        }
    }
}

fn run_channel(session: &ssh2::Session, command: &str) -> Result<(i32, String, String), ExecError> {
    let mut channel = session.channel_session()?;
    channel.exec(command)?;

    let mut output = String::new();
    channel.read_to_string(&mut output)?;
    let mut error = String::new();
    channel.stderr().read_to_string(&mut error)?;

    channel.wait_close()?;
    let code = channel.exit_status()?;
    Ok((code, output, error))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classes_match_the_taxonomy() {
        assert_eq!(SessionError::Auth("x".into()).class(), "auth");
        assert_eq!(
            SessionError::NoValidConnection("x".into()).class(),
            "no_valid_connection"
        );
        assert_eq!(SessionError::Timeout("x".into()).class(), "timeout");
        assert_eq!(SessionError::SshInternal("x".into()).class(), "ssh_internal");
        assert_eq!(SessionError::Unknown("x".into()).class(), "unknown");
    }

    #[test]
    fn only_auth_failures_are_fatal_to_retry() {
        assert!(!SessionError::Auth("x".into()).retryable());
        assert!(SessionError::Timeout("x".into()).retryable());
        assert!(SessionError::NoValidConnection("x".into()).retryable());
    }
}
