//! Transport tests over in-memory streams

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use retrohost_core::{CoreRunner, HostSink, RunLoopConfig};
use retrohost_shared::rpc::LoadCoreArgs;
use retrohost_shared::{
    AudioData, EventPayload, Frame, FrameBuffer, FrameData, FrameReader, ResponseStatus, RunnerCall,
    RunnerReply,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use super::child::{ChildArgs, FrameWriter, is_runner_invocation, serve};
use super::{RpcError, RunnerConnection};

/// A connection plus the far end of its stream
fn connect(call_timeout: Option<Duration>) -> (RunnerConnection, DuplexStream) {
    let (near, far) = tokio::io::duplex(1 << 20);
    let (read, write) = tokio::io::split(near);
    (RunnerConnection::new(read, write, call_timeout), far)
}

/// Read the next complete frame from the stub runner's side
async fn next_frame(stream: &mut DuplexStream, buffer: &mut FrameBuffer) -> Option<Frame> {
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(frame) = buffer.next_frame().unwrap() {
            return Some(frame);
        }
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            return None;
        }
        buffer.extend(&chunk[..n]);
    }
}

/// Answer every call the way a runner would, echoing Echo payloads
async fn stub_runner(mut stream: DuplexStream) {
    let mut buffer = FrameBuffer::new();
    while let Some(frame) = next_frame(&mut stream, &mut buffer).await {
        let Frame::Call { id, method, args } = frame else {
            continue;
        };
        let response = match RunnerCall::decode(&method, &args) {
            Ok(RunnerCall::Echo(bytes)) => Frame::success(id, RunnerReply::Echo(bytes).encode()),
            Ok(_) => Frame::success(id, RunnerReply::Done.encode()),
            Err(e) => Frame::error(id, e.to_string()),
        };
        if stream.write_all(&response.encode()).await.is_err() {
            break;
        }
    }
}

struct NullSink;

impl HostSink for NullSink {
    fn frame(&self, _frame: FrameData) {}
    fn audio(&self, _audio: AudioData) {}
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

// ============================================================================
// RunnerConnection
// ============================================================================

#[tokio::test]
async fn test_echo_round_trip() {
    let (connection, far) = connect(None);
    tokio::spawn(stub_runner(far));

    let payload = vec![0, 1, 2, 254, 255];
    let reply = connection
        .call(RunnerCall::Echo(payload.clone()))
        .await
        .unwrap();
    assert_eq!(reply, RunnerReply::Echo(payload));
}

#[tokio::test]
async fn test_concurrent_calls_get_their_own_replies() {
    let (connection, far) = connect(None);
    tokio::spawn(stub_runner(far));
    let connection = Arc::new(connection);

    let calls: Vec<_> = (0..64u8)
        .map(|i| {
            let connection = connection.clone();
            tokio::spawn(async move {
                let reply = connection.call(RunnerCall::Echo(vec![i; 3])).await.unwrap();
                assert_eq!(reply, RunnerReply::Echo(vec![i; 3]));
            })
        })
        .collect();
    for call in calls {
        call.await.unwrap();
    }
}

#[tokio::test]
async fn test_remote_error_carries_message() {
    let (connection, mut far) = connect(None);
    tokio::spawn(async move {
        let mut buffer = FrameBuffer::new();
        while let Some(Frame::Call { id, .. }) = next_frame(&mut far, &mut buffer).await {
            let reply = Frame::error(id, "core library not found: /cores/x.so");
            far.write_all(&reply.encode()).await.unwrap();
        }
    });

    match connection.call(RunnerCall::Run).await {
        Err(RpcError::Remote(message)) => assert!(message.contains("not found")),
        other => panic!("expected remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_transport_loss_fails_pending_call() {
    let (connection, mut far) = connect(None);
    let connection = Arc::new(connection);

    let pending = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.call(RunnerCall::SaveState).await })
    };

    // The call is on the wire, so it is waiting on a response
    let mut buffer = FrameBuffer::new();
    let frame = next_frame(&mut far, &mut buffer).await.unwrap();
    assert!(matches!(frame, Frame::Call { ref method, .. } if method == "SaveState"));
    drop(far);

    let result = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .expect("pending call hung after transport loss")
        .unwrap();
    assert!(matches!(result, Err(RpcError::TransportClosed)));
    assert!(connection.is_closed());
    assert!(matches!(
        connection.call(RunnerCall::Run).await,
        Err(RpcError::TransportClosed)
    ));
}

#[tokio::test]
async fn test_close_resolves_on_close() {
    let (connection, far) = connect(None);
    tokio::spawn(stub_runner(far));
    let closed = connection.on_close();
    connection.close().await;
    tokio::time::timeout(Duration::from_secs(5), closed)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_call_timeout_forgets_call() {
    let (connection, _far) = connect(Some(Duration::from_millis(20)));
    match connection.call(RunnerCall::Reset).await {
        Err(RpcError::Timeout { what, .. }) => assert_eq!(what, "Reset"),
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(!connection.is_closed());
}

#[tokio::test]
async fn test_events_and_logs_reach_handlers() {
    let (connection, mut far) = connect(None);
    let frames = Arc::new(AtomicUsize::new(0));
    let logs = Arc::new(std::sync::Mutex::new(Vec::new()));
    {
        let frames = frames.clone();
        connection.on(move |frame: FrameData| {
            assert_eq!((frame.width, frame.height), (2, 1));
            frames.fetch_add(1, Ordering::SeqCst);
        });
        let logs = logs.clone();
        connection.on_log(move |level, message| {
            logs.lock().unwrap().push(format!("{level} {message}"));
        });
    }

    let frame = FrameData {
        width: 2,
        height: 1,
        pixels: vec![255; 8],
    };
    let mut bytes = frame.to_frame().encode();
    bytes.extend(
        Frame::Log {
            level: "WARN".into(),
            message: "low battery".into(),
        }
        .encode(),
    );
    // Unknown events are ignored, not fatal
    bytes.extend(
        Frame::Event {
            name: "OnRumble".into(),
            data: vec![1],
        }
        .encode(),
    );
    bytes.extend(frame.to_frame().encode());
    far.write_all(&bytes).await.unwrap();
    drop(far);

    tokio::time::timeout(Duration::from_secs(5), connection.on_close())
        .await
        .unwrap();
    assert_eq!(frames.load(Ordering::SeqCst), 2);
    assert_eq!(*logs.lock().unwrap(), vec!["WARN low battery".to_string()]);
}

#[tokio::test]
async fn test_call_frame_from_runner_closes_session() {
    let (connection, mut far) = connect(None);
    let bogus = RunnerCall::Run.to_frame(1).encode();
    far.write_all(&bogus).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), connection.on_close())
        .await
        .unwrap();
    assert!(connection.is_closed());
}

// ============================================================================
// Runner side
// ============================================================================

#[test]
fn test_child_args() {
    let argv = args(&[
        "retrohost",
        "--runner",
        "retro",
        "--endpoint",
        "127.0.0.1:4100",
        "--token",
        "abcd",
    ]);
    assert!(is_runner_invocation(&argv));
    let parsed = ChildArgs::parse(&argv).unwrap();
    assert_eq!(parsed.runner_type, "retro");
    assert_eq!(parsed.endpoint.port(), 4100);
    assert_eq!(parsed.token, "abcd");

    assert!(!is_runner_invocation(&args(&["retrohost", "play"])));
}

#[test]
fn test_child_args_rejects_bad_input() {
    let unknown_type = args(&[
        "retrohost",
        "--runner",
        "n64",
        "--endpoint",
        "127.0.0.1:1",
        "--token",
        "t",
    ]);
    assert!(ChildArgs::parse(&unknown_type).is_err());

    let missing_token = args(&["retrohost", "--runner", "retro", "--endpoint", "127.0.0.1:1"]);
    assert!(ChildArgs::parse(&missing_token).is_err());

    let bad_endpoint = args(&[
        "retrohost",
        "--runner",
        "retro",
        "--endpoint",
        "nowhere",
        "--token",
        "t",
    ]);
    assert!(ChildArgs::parse(&bad_endpoint).is_err());
}

#[test]
fn test_serve_answers_every_call() {
    let calls = [
        RunnerCall::Echo(vec![5, 6]).to_frame(1),
        Frame::Call {
            id: 2,
            method: "Teleport".into(),
            args: Vec::new(),
        },
        RunnerCall::LoadCore(LoadCoreArgs {
            path: "/nonexistent/missing_libretro.so".into(),
            system_dir: "/tmp".into(),
            save_dir: "/tmp".into(),
            overrides: Vec::new(),
        })
        .to_frame(3),
        RunnerCall::Run.to_frame(4),
    ];
    let input: Vec<u8> = calls.iter().flat_map(Frame::encode).collect();

    let writer = FrameWriter::new(Vec::new());
    let mut runner = CoreRunner::new(Arc::new(NullSink), RunLoopConfig::default());
    serve(&mut FrameReader::new(input.as_slice()), &writer, &mut runner).unwrap();

    let mut output = FrameBuffer::new();
    output.extend(&writer.into_inner());
    let mut responses = Vec::new();
    while let Some(frame) = output.next_frame().unwrap() {
        if let Frame::Response { id, status, result } = frame {
            responses.push((id, status, result));
        }
    }

    assert_eq!(responses.len(), 4);
    let ids: Vec<i32> = responses.iter().map(|(id, ..)| *id).collect();
    assert_eq!(ids, [1, 2, 3, 4]);
    assert_eq!(responses[0].1, ResponseStatus::Success);
    assert!(responses[1..].iter().all(|(_, status, _)| *status == ResponseStatus::Error));
    assert_eq!(
        RunnerReply::decode(&responses[0].2).unwrap(),
        RunnerReply::Echo(vec![5, 6])
    );
    let message = |i: usize| String::from_utf8(responses[i].2.clone()).unwrap();
    assert!(message(1).contains("Teleport"));
    assert!(message(2).contains("not found"));
    assert_eq!(message(3), "no core loaded");
}
