//! Body of the run loop thread

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::Instant;

use super::{LoopCommand, RunLoopConfig};
use crate::host::CoreHost;

/// Drive `host` until stopped, then release it.
///
/// Each iteration runs queued commands, advances one frame and sleeps out
/// the rest of the tick. The sleep waits on the command channel, so a stop
/// request ends it early.
pub(super) fn run(
    mut host: CoreHost,
    commands: Receiver<LoopCommand>,
    stop: Arc<AtomicBool>,
    config: RunLoopConfig,
    frames: Arc<AtomicU64>,
) {
    tracing::info!(tick = ?config.tick, "Run loop started");

    'ticks: while !stop.load(Ordering::Acquire) {
        let tick_start = Instant::now();

        loop {
            match commands.try_recv() {
                Ok(LoopCommand::Job(job)) => job(&mut host),
                Ok(LoopCommand::Stop) | Err(TryRecvError::Disconnected) => break 'ticks,
                Err(TryRecvError::Empty) => break,
            }
        }
        if stop.load(Ordering::Acquire) {
            break;
        }

        if let Err(e) = host.run_frame() {
            tracing::error!(error = %e, "Frame advance failed");
            break;
        }
        frames.fetch_add(1, Ordering::AcqRel);

        let tick_time = tick_start.elapsed();
        if tick_time > config.cpu_budget {
            tracing::warn!(
                "Tick took {:?}, exceeds budget of {:?}",
                tick_time,
                config.cpu_budget
            );
        }

        let deadline = tick_start + config.tick;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match commands.recv_timeout(remaining) {
                Ok(LoopCommand::Job(job)) => job(&mut host),
                Ok(LoopCommand::Stop) | Err(RecvTimeoutError::Disconnected) => break 'ticks,
                Err(RecvTimeoutError::Timeout) => break,
            }
        }
    }

    drop(host);
    tracing::info!(frames = frames.load(Ordering::Acquire), "Run loop exited");
}
