use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{ErrorKind, RedisError, RedisResult};
use tracing::debug;

use crate::error::{ReplayError, Result};
use crate::ops::Op;

// ─── Execution outcome ───────────────────────────────────────────

/// Result of applying one op, classified once at the executor boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Malformed query, server-reported error, not-found. Never retried.
    Permanent(String),
    /// Connection-level trouble. Retried once after a session refresh.
    Transient(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Outcome::Success => None,
            Outcome::Permanent(reason) | Outcome::Transient(reason) => Some(reason),
        }
    }
}

// ─── Collaborator traits ─────────────────────────────────────────

/// A database connection owned by exactly one worker.
#[async_trait]
pub trait Session: Send + 'static {
    /// Re-establish the connection after a transient failure.
    async fn refresh(&mut self) -> Result<()>;

    async fn close(&mut self);
}

/// Opens one session per worker at pool startup.
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    type Session: Session;

    async fn open(&self, worker_id: usize) -> Result<Self::Session>;
}

/// Applies a recorded op to a session.
#[async_trait]
pub trait OpsExecutor<S: Session>: Send + Sync + 'static {
    async fn execute(&self, session: &mut S, op: &Op) -> Outcome;
}

// ─── Redis session ───────────────────────────────────────────────

/// Builds [`RedisSession`]s against one server URL.
#[derive(Clone)]
pub struct RedisSessionFactory {
    client: redis::Client,
    url: String,
    socket_timeout: Duration,
}

impl RedisSessionFactory {
    /// Fails on a malformed URL; no connection is made yet.
    pub fn new(url: &str, socket_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            url: url.to_owned(),
            socket_timeout,
        })
    }
}

#[async_trait]
impl SessionFactory for RedisSessionFactory {
    type Session = RedisSession;

    async fn open(&self, worker_id: usize) -> Result<RedisSession> {
        let conn = connect(&self.client, &self.url, self.socket_timeout).await?;
        debug!("Worker #{worker_id} connected to {}", self.url);
        Ok(RedisSession {
            client: self.client.clone(),
            url: self.url.clone(),
            socket_timeout: self.socket_timeout,
            conn: Some(conn),
        })
    }
}

/// A dedicated Redis connection with a per-command socket timeout.
pub struct RedisSession {
    client: redis::Client,
    url: String,
    socket_timeout: Duration,
    conn: Option<ConnectionManager>,
}

#[async_trait]
impl Session for RedisSession {
    async fn refresh(&mut self) -> Result<()> {
        self.conn = None;
        self.conn = Some(connect(&self.client, &self.url, self.socket_timeout).await?);
        Ok(())
    }

    async fn close(&mut self) {
        self.conn = None;
    }
}

async fn connect(
    client: &redis::Client,
    url: &str,
    socket_timeout: Duration,
) -> Result<ConnectionManager> {
    match tokio::time::timeout(socket_timeout, ConnectionManager::new(client.clone())).await {
        Ok(conn) => Ok(conn?),
        Err(_) => Err(ReplayError::ConnectTimeout {
            url: url.to_owned(),
            timeout_ms: socket_timeout.as_millis() as u64,
        }),
    }
}

// ─── Redis executor ──────────────────────────────────────────────

/// Sends each op's `cmd` verbatim as a Redis command.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisExecutor;

#[async_trait]
impl OpsExecutor<RedisSession> for RedisExecutor {
    async fn execute(&self, session: &mut RedisSession, op: &Op) -> Outcome {
        let Some((name, args)) = op.cmd.split_first() else {
            return Outcome::Permanent(format!("{} op has an empty command", op.op_type));
        };
        let Some(conn) = session.conn.as_mut() else {
            return Outcome::Transient("session is not connected".into());
        };

        let mut cmd = redis::cmd(name);
        for arg in args {
            cmd.arg(arg);
        }

        // ── Redis timed section ─────────────────────────────────────
        let reply: RedisResult<redis::Value> =
            match tokio::time::timeout(session.socket_timeout, cmd.query_async(conn)).await {
                Ok(reply) => reply,
                Err(_) => {
                    return Outcome::Transient(format!(
                        "{name} timed out after {}ms",
                        session.socket_timeout.as_millis()
                    ))
                }
            };
        // ────────────────────────────────────────────────────────────

        match reply {
            Ok(redis::Value::Nil) if op.op_type.expects_reply() => {
                Outcome::Permanent(format!("not found: {}", op.cmd.join(" ")))
            }
            Ok(_) => Outcome::Success,
            Err(e) => classify(&e),
        }
    }
}

/// Server-side rejections are permanent; anything else is assumed to be
/// a socket problem worth one retry.
pub fn classify(err: &RedisError) -> Outcome {
    match err.kind() {
        ErrorKind::ResponseError
        | ErrorKind::TypeError
        | ErrorKind::ExecAbortError
        | ErrorKind::NoScriptError
        | ErrorKind::ExtensionError => Outcome::Permanent(err.to_string()),
        _ => Outcome::Transient(err.to_string()),
    }
}
