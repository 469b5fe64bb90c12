//! Runner side of the transport
//!
//! The runner connects back to the parent, proves it was the process that
//! was spawned, and then serves calls until the stream closes. Every Call
//! gets exactly one Response, even when the handler panics.

use std::fmt::{self, Write as _};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use retrohost_core::{CoreRunner, HostSink, RunLoopConfig};
use retrohost_shared::{
    AudioData, EventPayload, Frame, FrameData, FrameReader, RunnerCall, RunnerReply, WireError,
};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use super::{ENDPOINT_FLAG, RUNNER_FLAG, RUNNER_TYPE, TOKEN_FLAG, handshake_bytes};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Whether the process was launched as a runner
pub fn is_runner_invocation(args: &[String]) -> bool {
    args.get(1).is_some_and(|arg| arg == RUNNER_FLAG)
}

/// Runner launch arguments: `--runner <type> --endpoint <addr> --token <hex>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildArgs {
    pub runner_type: String,
    pub endpoint: SocketAddr,
    pub token: String,
}

impl ChildArgs {
    /// Parse the full argument list, program name included
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut runner_type = None;
        let mut endpoint = None;
        let mut token = None;

        let mut iter = args.iter().skip(1);
        while let Some(flag) = iter.next() {
            let Some(value) = iter.next() else {
                bail!("missing value for {flag}");
            };
            match flag.as_str() {
                RUNNER_FLAG => runner_type = Some(value.clone()),
                ENDPOINT_FLAG => {
                    endpoint = Some(
                        value
                            .parse::<SocketAddr>()
                            .with_context(|| format!("invalid endpoint `{value}`"))?,
                    )
                }
                TOKEN_FLAG => token = Some(value.clone()),
                other => bail!("unknown runner argument `{other}`"),
            }
        }

        let runner_type = runner_type.context("missing --runner")?;
        if runner_type != RUNNER_TYPE {
            bail!("unknown runner type `{runner_type}`");
        }
        Ok(Self {
            runner_type,
            endpoint: endpoint.context("missing --endpoint")?,
            token: token.context("missing --token")?,
        })
    }
}

/// Connect to the parent and serve calls until it hangs up
pub fn run_child(args: ChildArgs) -> Result<()> {
    let stream = TcpStream::connect_timeout(&args.endpoint, CONNECT_TIMEOUT)
        .with_context(|| format!("Failed to connect to {}", args.endpoint))?;
    stream.set_nodelay(true)?;
    let mut write_half = stream.try_clone()?;
    write_half
        .write_all(&handshake_bytes(&args.token))
        .context("Failed to send handshake")?;

    let writer = Arc::new(FrameWriter::new(write_half));
    init_logging(writer.clone());
    tracing::info!(endpoint = %args.endpoint, "Runner connected");

    let sink = Arc::new(EventSink {
        writer: writer.clone(),
    });
    let mut runner = CoreRunner::new(sink, RunLoopConfig::default());
    let result = serve(&mut FrameReader::new(stream), &writer, &mut runner);

    if let Err(e) = runner.stop() {
        tracing::warn!("Failed to release core: {}", e);
    }
    result.context("Runner transport failed")?;
    tracing::info!("Runner exiting");
    Ok(())
}

// ============================================================================
// Frame output
// ============================================================================

/// Writes whole frames under one lock
pub(crate) struct FrameWriter<W> {
    inner: Mutex<W>,
    broken: AtomicBool,
}

impl<W: Write> FrameWriter<W> {
    pub(crate) fn new(inner: W) -> Self {
        Self {
            inner: Mutex::new(inner),
            broken: AtomicBool::new(false),
        }
    }

    /// Nothing inside the lock may emit tracing events: the log layer sends
    /// through this writer.
    pub(crate) fn send(&self, frame: &Frame) -> io::Result<()> {
        if self.broken.load(Ordering::Relaxed) {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let bytes = frame.encode();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let result = inner.write_all(&bytes).and_then(|()| inner.flush());
        if result.is_err() {
            self.broken.store(true, Ordering::Relaxed);
        }
        result
    }

    #[cfg(test)]
    pub(crate) fn into_inner(self) -> W {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Forwards converted media to the parent as Event frames
struct EventSink<W> {
    writer: Arc<FrameWriter<W>>,
}

impl<W: Write + Send> HostSink for EventSink<W> {
    // A failed send means the parent is gone; the serve loop sees the
    // closed stream and shuts the core down.
    fn frame(&self, frame: FrameData) {
        let _ = self.writer.send(&frame.to_frame());
    }

    fn audio(&self, audio: AudioData) {
        let _ = self.writer.send(&audio.to_frame());
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Turns every tracing event into one Log frame
struct RpcLogLayer<W> {
    writer: Arc<FrameWriter<W>>,
}

impl<S, W> Layer<S> for RpcLogLayer<W>
where
    S: Subscriber,
    W: Write + Send + 'static,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let frame = Frame::Log {
            level: event.metadata().level().to_string(),
            message: visitor.finish(),
        };
        let _ = self.writer.send(&frame);
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_owned()
        } else {
            self.message + &self.fields
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

fn init_logging<W: Write + Send + 'static>(writer: Arc<FrameWriter<W>>) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(false);
    // The runner may be embedded in a process that already logs
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(RpcLogLayer { writer })
        .try_init();
}

// ============================================================================
// Serve loop
// ============================================================================

/// Answer calls until the parent closes the stream
pub(crate) fn serve<R, W>(
    reader: &mut FrameReader<R>,
    writer: &FrameWriter<W>,
    runner: &mut CoreRunner,
) -> Result<(), WireError>
where
    R: Read,
    W: Write,
{
    while let Some(frame) = reader.read_frame()? {
        let (id, method, args) = match frame {
            Frame::Call { id, method, args } => (id, method, args),
            other => {
                tracing::error!(kind = other.kind(), "Unexpected frame from parent, closing");
                break;
            }
        };
        let response = respond(runner, id, &method, &args);
        writer.send(&response)?;
    }
    tracing::debug!("Parent closed the transport");
    Ok(())
}

fn respond(runner: &mut CoreRunner, id: i32, method: &str, args: &[u8]) -> Frame {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<RunnerReply, String> {
        let call = RunnerCall::decode(method, args).map_err(|e| e.to_string())?;
        runner.handle(call).map_err(|e| e.to_string())
    }));
    match outcome {
        Ok(Ok(reply)) => Frame::success(id, reply.encode()),
        Ok(Err(message)) => {
            tracing::warn!(id, method, "Runner call failed: {}", message);
            Frame::error(id, message)
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(id, method, "Runner call panicked: {}", message);
            Frame::error(id, format!("runner panicked: {message}"))
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
