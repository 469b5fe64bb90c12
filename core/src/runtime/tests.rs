//! Run loop tests

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crate::host::{CoreHost, HostError, is_core_active};
use crate::input::ButtonStates;
use crate::test_utils::*;

use super::{RunLoop, RunLoopConfig, RunLoopError, RunState};

/// One tick per second, so a test can stop after exactly one
fn slow_config() -> RunLoopConfig {
    RunLoopConfig {
        tick: Duration::from_secs(1),
        cpu_budget: Duration::from_secs(1),
    }
}

fn run_loop(sink: Arc<RecordingSink>, config: RunLoopConfig, load: bool) -> RunLoop {
    let mut host = CoreHost::new(
        stub_core(),
        test_config(),
        Arc::new(ButtonStates::new()),
        sink,
    );
    host.initialize().unwrap();
    let mut run_loop = RunLoop::new(host, config);
    if load {
        assert!(run_loop.load_game("/games/stub.bin", None).unwrap());
    }
    run_loop
}

fn wait_for_frames(run_loop: &RunLoop, n: u64) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while run_loop.frames() < n {
        assert!(Instant::now() < deadline, "run loop never reached {n} frames");
        std::thread::sleep(Duration::from_millis(1));
    }
}

// ============================================================================
// RunLoopConfig Tests
// ============================================================================

#[test]
fn test_config_default() {
    let config = RunLoopConfig::default();
    assert_eq!(config.tick, Duration::from_millis(16));
    assert_eq!(config.cpu_budget, Duration::from_millis(16));
}

// ============================================================================
// State Machine Tests
// ============================================================================

#[test]
fn test_start_requires_content() {
    let _lock = plugin_lock();
    let mut run_loop = run_loop(Arc::default(), slow_config(), false);
    assert!(matches!(
        run_loop.start(),
        Err(RunLoopError::Host(HostError::NoContent))
    ));
    assert_eq!(run_loop.state(), RunState::Idle);
}

#[test]
fn test_one_tick_then_stop() {
    let _lock = plugin_lock();
    let sink = Arc::new(RecordingSink::default());
    let mut run_loop = run_loop(sink.clone(), slow_config(), true);

    run_loop.start().unwrap();
    assert_eq!(run_loop.state(), RunState::Running);
    wait_for_frames(&run_loop, 1);
    run_loop.stop().unwrap();

    // Stop returned, so the loop has exited and released the plugin
    assert_eq!(run_loop.state(), RunState::Stopped);
    assert_eq!(DEINITS.load(Ordering::SeqCst), 1);
    assert_eq!(UNLOADS.load(Ordering::SeqCst), 1);
    assert!(!is_core_active());

    let frames = sink.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!((frames[0].width, frames[0].height), (STUB_WIDTH, STUB_HEIGHT));
    let audio = sink.audio();
    assert_eq!(audio.len(), 1);
    assert_eq!(audio[0].frames(), STUB_AUDIO_FRAMES);
}

#[test]
fn test_stop_is_idempotent() {
    let _lock = plugin_lock();
    let mut run_loop = run_loop(Arc::default(), RunLoopConfig::default(), true);
    run_loop.start().unwrap();
    run_loop.stop().unwrap();
    run_loop.stop().unwrap();
    assert_eq!(run_loop.state(), RunState::Stopped);
    assert_eq!(DEINITS.load(Ordering::SeqCst), 1);
}

#[test]
fn test_stop_from_idle_releases_plugin() {
    let _lock = plugin_lock();
    let mut run_loop = run_loop(Arc::default(), RunLoopConfig::default(), false);
    run_loop.stop().unwrap();
    assert_eq!(run_loop.state(), RunState::Stopped);
    assert_eq!(DEINITS.load(Ordering::SeqCst), 1);
    assert!(run_loop.host().is_none());
    assert!(matches!(
        run_loop.start(),
        Err(RunLoopError::InvalidState {
            state: RunState::Stopped,
            ..
        })
    ));
}

#[test]
fn test_load_game_only_while_idle() {
    let _lock = plugin_lock();
    let mut run_loop = run_loop(Arc::default(), slow_config(), true);
    run_loop.start().unwrap();
    assert!(matches!(
        run_loop.load_game("/games/other.bin", None),
        Err(RunLoopError::InvalidState {
            state: RunState::Running,
            ..
        })
    ));
    run_loop.stop().unwrap();
}

#[test]
fn test_ticks_at_fixed_period() {
    let _lock = plugin_lock();
    let mut run_loop = run_loop(Arc::default(), RunLoopConfig::default(), true);
    let started = Instant::now();
    run_loop.start().unwrap();
    wait_for_frames(&run_loop, 5);
    let elapsed = started.elapsed();
    run_loop.stop().unwrap();

    // Four full periods separate the first and fifth tick
    assert!(elapsed >= Duration::from_millis(64), "ticked too fast: {elapsed:?}");
}

// ============================================================================
// Commands Between Ticks
// ============================================================================

#[test]
fn test_state_commands_while_running() {
    let _lock = plugin_lock();
    let mut run_loop = run_loop(Arc::default(), slow_config(), true);
    run_loop.start().unwrap();
    wait_for_frames(&run_loop, 1);

    let state = run_loop.save_state().unwrap();
    assert_eq!(state, 1u32.to_le_bytes());
    run_loop.reset().unwrap();
    assert_eq!(RESETS.load(Ordering::SeqCst), 1);
    assert!(matches!(
        run_loop.load_state(vec![0; 3]),
        Err(RunLoopError::Host(HostError::StateRefused("load")))
    ));

    run_loop.stop().unwrap();
}

#[test]
fn test_state_commands_while_idle() {
    let _lock = plugin_lock();
    let mut run_loop = run_loop(Arc::default(), slow_config(), true);
    run_loop.load_state(7u32.to_le_bytes().to_vec()).unwrap();
    assert_eq!(RUNS.load(Ordering::SeqCst), 7);
}

#[test]
fn test_drop_stops_running_loop() {
    let _lock = plugin_lock();
    let mut run_loop = run_loop(Arc::default(), RunLoopConfig::default(), true);
    run_loop.start().unwrap();
    drop(run_loop);
    assert_eq!(DEINITS.load(Ordering::SeqCst), 1);
    assert!(!is_core_active());
}
