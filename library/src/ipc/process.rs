//! Runner process spawning and teardown

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use retrohost_shared::{RunnerCall, RunnerReply};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::{Child, Command};

use super::{
    ENDPOINT_FLAG, HANDSHAKE_MAGIC, MAX_TOKEN_LEN, RUNNER_FLAG, RUNNER_TYPE, RpcError, TOKEN_FLAG,
    connection::RunnerConnection,
};
use crate::config::RunnerConfig;

/// Payload of the liveness probe issued right after connecting
const PROBE: &[u8] = b"retrohost-probe";

/// How to launch a runner
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Executable started with the runner flags; normally the current binary
    pub program: PathBuf,
    pub connect_timeout: Duration,
    pub call_timeout: Option<Duration>,
    pub stop_grace: Duration,
}

impl SpawnOptions {
    pub fn new(program: impl Into<PathBuf>, config: &RunnerConfig) -> Self {
        Self {
            program: program.into(),
            connect_timeout: config.connect_timeout(),
            call_timeout: config.call_timeout(),
            stop_grace: config.stop_grace(),
        }
    }
}

/// One runner child process and its connection.
///
/// Dropping without [`stop`](Self::stop) kills the child.
pub struct RunnerProcess {
    connection: Arc<RunnerConnection>,
    child: Option<Child>,
    pid: Option<u32>,
    stop_grace: Duration,
}

impl RunnerProcess {
    /// Start a runner and wait until it has connected and answered a probe.
    ///
    /// Fails if the child exits first, presents the wrong token, or does not
    /// connect within `connect_timeout`.
    pub async fn spawn(options: &SpawnOptions) -> Result<Self, RpcError> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(RpcError::Spawn)?;
        let endpoint = listener.local_addr().map_err(RpcError::Spawn)?;
        let token = session_token();

        let mut child = Command::new(&options.program)
            .arg(RUNNER_FLAG)
            .arg(RUNNER_TYPE)
            .arg(ENDPOINT_FLAG)
            .arg(endpoint.to_string())
            .arg(TOKEN_FLAG)
            .arg(&token)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(RpcError::Spawn)?;
        let pid = child.id();
        tracing::debug!(pid, %endpoint, program = %options.program.display(), "Runner spawned");
        forward_output(&mut child);

        let accepted = tokio::time::timeout(
            options.connect_timeout,
            accept(&listener, &mut child, &token),
        )
        .await;
        let (stream, peer) = match accepted {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => {
                terminate(&mut child).await;
                return Err(e);
            }
            Err(_) => {
                terminate(&mut child).await;
                return Err(RpcError::Timeout {
                    what: "runner connect",
                    after: options.connect_timeout,
                });
            }
        };
        drop(listener);
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("TCP_NODELAY unavailable: {}", e);
        }

        let (read, write) = stream.into_split();
        let connection = Arc::new(RunnerConnection::new(read, write, options.call_timeout));
        let mut process = Self {
            connection,
            child: Some(child),
            pid,
            stop_grace: options.stop_grace,
        };

        if let Err(e) = process.probe(options.connect_timeout).await {
            process.kill().await;
            return Err(e);
        }
        tracing::info!(pid, %peer, "Runner connected");
        Ok(process)
    }

    async fn probe(&self, limit: Duration) -> Result<(), RpcError> {
        let echo = self.connection.call(RunnerCall::Echo(PROBE.to_vec()));
        let reply = tokio::time::timeout(limit, echo)
            .await
            .map_err(|_| RpcError::Timeout {
                what: "runner probe",
                after: limit,
            })??;
        match reply {
            RunnerReply::Echo(bytes) if bytes == PROBE => Ok(()),
            other => Err(RpcError::Handshake(format!(
                "unexpected `{}` probe reply",
                other.name()
            ))),
        }
    }

    pub fn connection(&self) -> &Arc<RunnerConnection> {
        &self.connection
    }

    /// OS process id, while the child is owned
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and(self.pid)
    }

    pub async fn call(&self, call: RunnerCall) -> Result<RunnerReply, RpcError> {
        self.connection.call(call).await
    }

    /// Ask the runner to release its core, close the transport and wait for
    /// the process to exit, killing it after the grace period.
    ///
    /// Safe to call repeatedly; later calls return immediately.
    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        if !self.connection.is_closed() {
            let stop = self.connection.call(RunnerCall::Stop);
            match tokio::time::timeout(self.stop_grace, stop).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::debug!("Runner did not acknowledge stop: {}", e),
                Err(_) => tracing::warn!(
                    "Runner did not acknowledge stop within {:?}",
                    self.stop_grace
                ),
            }
        }
        self.connection.close().await;

        match tokio::time::timeout(self.stop_grace, child.wait()).await {
            Ok(Ok(status)) => tracing::info!(pid = self.pid, %status, "Runner exited"),
            Ok(Err(e)) => tracing::warn!(pid = self.pid, "Failed to wait for runner: {}", e),
            Err(_) => {
                tracing::warn!(pid = self.pid, "Runner still alive after grace period, killing");
                terminate(&mut child).await;
            }
        }
    }

    /// Terminate immediately without asking the runner
    pub async fn kill(&mut self) {
        self.connection.close().await;
        if let Some(mut child) = self.child.take() {
            terminate(&mut child).await;
        }
    }
}

async fn terminate(child: &mut Child) {
    // kill() also reaps the process
    if let Err(e) = child.kill().await {
        tracing::warn!("Failed to kill runner: {}", e);
    }
}

async fn accept(
    listener: &TcpListener,
    child: &mut Child,
    token: &str,
) -> Result<(TcpStream, SocketAddr), RpcError> {
    let (mut stream, peer) = tokio::select! {
        accepted = listener.accept() => accepted.map_err(RpcError::Spawn)?,
        status = child.wait() => {
            let status = match status {
                Ok(status) => status.to_string(),
                Err(e) => e.to_string(),
            };
            return Err(RpcError::EarlyExit(status));
        }
    };
    read_handshake(&mut stream, token).await?;
    Ok((stream, peer))
}

async fn read_handshake<R>(stream: &mut R, token: &str) -> Result<(), RpcError>
where
    R: AsyncRead + Unpin,
{
    let failed = |e: std::io::Error| RpcError::Handshake(e.to_string());

    let mut magic = [0u8; 4];
    stream.read_exact(&mut magic).await.map_err(failed)?;
    if &magic != HANDSHAKE_MAGIC {
        return Err(RpcError::Handshake("bad magic".into()));
    }
    let len = stream.read_u32_le().await.map_err(failed)?;
    if len > MAX_TOKEN_LEN {
        return Err(RpcError::Handshake(format!("token of {len} bytes")));
    }
    let mut presented = vec![0u8; len as usize];
    stream.read_exact(&mut presented).await.map_err(failed)?;
    if presented != token.as_bytes() {
        return Err(RpcError::Handshake("token mismatch".into()));
    }
    Ok(())
}

/// Random hex token identifying one spawn
fn session_token() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn forward_output(child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, "stdout"));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, "stderr"));
    }
}

async fn forward_lines<R>(stream: R, name: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(target: "retrohost::runner", stream = name, "{line}");
    }
}
