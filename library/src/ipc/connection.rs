//! Parent side of the runner transport

use std::future::Future;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use hashbrown::HashMap;
use retrohost_shared::{
    EventPayload, Frame, FrameBuffer, ResponseStatus, RunnerCall, RunnerReply, WireError,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use super::RpcError;

const READ_CHUNK: usize = 64 * 1024;

type Completion = oneshot::Sender<(ResponseStatus, Vec<u8>)>;
type EventHandler = Box<dyn Fn(&[u8]) + Send + Sync>;
type LogHandler = Box<dyn Fn(&str, &str) + Send + Sync>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Default)]
struct Pending {
    calls: HashMap<i32, Completion>,
    closed: bool,
}

/// State shared with the receive task
struct Shared {
    pending: Mutex<Pending>,
    events: RwLock<HashMap<&'static str, EventHandler>>,
    log: RwLock<Option<LogHandler>>,
    closed: watch::Sender<bool>,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, id: i32) -> Result<oneshot::Receiver<(ResponseStatus, Vec<u8>)>, RpcError> {
        let mut pending = self.pending();
        if pending.closed {
            return Err(RpcError::TransportClosed);
        }
        let (tx, rx) = oneshot::channel();
        pending.calls.insert(id, tx);
        Ok(rx)
    }

    fn forget(&self, id: i32) {
        self.pending().calls.remove(&id);
    }

    /// Fail every outstanding call and refuse new ones
    fn close(&self) {
        let dropped = {
            let mut pending = self.pending();
            pending.closed = true;
            std::mem::take(&mut pending.calls)
        };
        if !dropped.is_empty() {
            tracing::debug!(count = dropped.len(), "Failing pending runner calls");
        }
        drop(dropped);
        self.closed.send_replace(true);
    }

    fn dispatch(&self, frame: Frame) -> Result<(), RpcError> {
        match frame {
            Frame::Response { id, status, result } => {
                let completion = self.pending().calls.remove(&id);
                match completion {
                    // The caller may have timed out and gone away
                    Some(tx) => {
                        let _ = tx.send((status, result));
                    }
                    None => tracing::warn!(id, "Response for unknown call id"),
                }
            }
            Frame::Event { name, data } => {
                let events = self.events.read().unwrap_or_else(PoisonError::into_inner);
                match events.get(name.as_str()) {
                    Some(handler) => handler(&data),
                    None => tracing::trace!(event = %name, "No handler for runner event"),
                }
            }
            Frame::Log { level, message } => {
                emit_runner_log(&level, &message);
                let handler = self.log.read().unwrap_or_else(PoisonError::into_inner);
                if let Some(handler) = handler.as_ref() {
                    handler(&level, &message);
                }
            }
            Frame::Call { .. } => return Err(RpcError::UnexpectedFrame("Call")),
        }
        Ok(())
    }
}

fn emit_runner_log(level: &str, message: &str) {
    match level.to_ascii_uppercase().as_str() {
        "ERROR" => tracing::error!(target: "retrohost::runner", "{message}"),
        "WARN" => tracing::warn!(target: "retrohost::runner", "{message}"),
        "DEBUG" => tracing::debug!(target: "retrohost::runner", "{message}"),
        "TRACE" => tracing::trace!(target: "retrohost::runner", "{message}"),
        _ => tracing::info!(target: "retrohost::runner", "{message}"),
    }
}

/// Typed calls over a byte stream to a runner.
///
/// Frames are written whole under one lock, so concurrent callers never
/// interleave. A background task reads inbound frames, completes pending
/// calls and invokes event handlers. When the stream ends, every
/// outstanding call fails with [`RpcError::TransportClosed`].
pub struct RunnerConnection {
    writer: tokio::sync::Mutex<BoxedWriter>,
    shared: Arc<Shared>,
    next_id: AtomicI32,
    call_timeout: Option<Duration>,
    reader: JoinHandle<()>,
}

impl RunnerConnection {
    /// Wrap a transport. Must be called from within a tokio runtime.
    pub fn new<R, W>(reader: R, writer: W, call_timeout: Option<Duration>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (closed, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            pending: Mutex::new(Pending::default()),
            events: RwLock::new(HashMap::new()),
            log: RwLock::new(None),
            closed,
        });
        let reader = tokio::spawn(receive_loop(reader, shared.clone()));
        Self {
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            shared,
            next_id: AtomicI32::new(1),
            call_timeout,
            reader,
        }
    }

    /// Invoke `handler` for every `E` event. Replaces an earlier handler.
    pub fn on<E, F>(&self, handler: F)
    where
        E: EventPayload,
        F: Fn(E) + Send + Sync + 'static,
    {
        let decode = move |data: &[u8]| match E::decode_event(data) {
            Ok(event) => handler(event),
            Err(e) => tracing::warn!(event = E::NAME, "Dropping undecodable event: {}", e),
        };
        self.shared
            .events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(E::NAME, Box::new(decode));
    }

    /// Invoke `handler(level, message)` for every runner log line
    pub fn on_log<F>(&self, handler: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        let mut slot = self
            .shared
            .log
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Box::new(handler));
    }

    pub async fn call(&self, call: RunnerCall) -> Result<RunnerReply, RpcError> {
        let method = call.method();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        // Registered before writing so an immediate response finds its slot
        let completion = self.shared.register(id)?;

        if let Err(e) = self.send(&call.to_frame(id)).await {
            self.shared.forget(id);
            return Err(e);
        }
        tracing::trace!(id, method, "Runner call sent");

        let outcome = match self.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, completion).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.shared.forget(id);
                    return Err(RpcError::Timeout {
                        what: method,
                        after: limit,
                    });
                }
            },
            None => completion.await,
        };

        let (status, result) = outcome.map_err(|_| RpcError::TransportClosed)?;
        match status {
            ResponseStatus::Success => Ok(RunnerReply::decode(&result)?),
            ResponseStatus::Error => Err(RpcError::Remote(
                String::from_utf8_lossy(&result).into_owned(),
            )),
        }
    }

    /// Write one frame atomically
    pub async fn send(&self, frame: &Frame) -> Result<(), RpcError> {
        let bytes = frame.encode();
        let mut writer = self.writer.lock().await;
        writer.write_all(&bytes).await.map_err(WireError::from)?;
        writer.flush().await.map_err(WireError::from)?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.pending().closed
    }

    /// Resolves once the transport has closed, for whatever reason
    pub fn on_close(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut closed = self.shared.closed.subscribe();
        async move {
            let _ = closed.wait_for(|closed| *closed).await;
        }
    }

    /// Shut down both directions and fail anything still pending
    pub async fn close(&self) {
        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.shutdown().await {
                tracing::debug!("Runner transport shutdown: {}", e);
            }
        }
        self.reader.abort();
        self.shared.close();
    }
}

impl Drop for RunnerConnection {
    fn drop(&mut self) {
        self.reader.abort();
        self.shared.close();
    }
}

async fn receive_loop<R>(mut reader: R, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    let mut buffer = FrameBuffer::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => {
                if buffer.is_empty() {
                    tracing::debug!("Runner transport closed");
                } else {
                    tracing::warn!("Runner transport closed mid-frame");
                }
                break;
            }
            Ok(n) => buffer.extend(&chunk[..n]),
            Err(e) => {
                tracing::warn!("Runner transport read failed: {}", e);
                break;
            }
        }
        if let Err(e) = drain(&mut buffer, &shared) {
            tracing::error!("Closing runner session: {}", e);
            break;
        }
    }
    shared.close();
}

fn drain(buffer: &mut FrameBuffer, shared: &Shared) -> Result<(), RpcError> {
    while let Some(frame) = buffer.next_frame()? {
        shared.dispatch(frame)?;
    }
    Ok(())
}
