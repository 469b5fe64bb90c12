//! Retrohost command line
//!
//! Runs headless core sessions and inspects stored options. When started
//! with `--runner`, the process instead becomes a runner and serves one
//! core session for its parent.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use retrohost_library::ipc::{ChildArgs, is_runner_invocation, run_child};
use retrohost_library::service::core_name;
use retrohost_library::{CoreService, OptionStore, ServiceEvent, config};
use tokio::sync::broadcast::error::RecvError;

/// Host libretro-style emulation cores
#[derive(Parser)]
#[command(name = "retrohost")]
#[command(about = "Host libretro-style emulation cores in an isolated runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a game headless for a number of frames
    Play {
        /// Core name (resolved in the cores directory) or path to a core
        #[arg(long)]
        core: String,
        /// Game file
        #[arg(long)]
        game: PathBuf,
        /// Frames to run before stopping
        #[arg(long, default_value_t = 60)]
        frames: u64,
    },
    /// Print the stored option overrides of a core
    Options {
        #[arg(long)]
        core: String,
    },
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if is_runner_invocation(&args) {
        let child = ChildArgs::parse(&args).context("Invalid runner arguments")?;
        return run_child(child);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse_from(args);
    let config = config::load();

    match cli.command {
        Commands::Play { core, game, frames } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to start async runtime")?;
            runtime.block_on(play(&config, &core, game, frames))
        }
        Commands::Options { core } => print_options(&config, &core),
    }
}

async fn play(config: &config::Config, core: &str, game: PathBuf, frames: u64) -> Result<()> {
    let mut service =
        CoreService::new(config).context("Failed to locate the retrohost executable")?;
    let mut events = service.subscribe();

    let system = service
        .load_core(core)
        .await
        .with_context(|| format!("Failed to load core `{core}`"))?;
    println!("Core: {} {}", system.library_name, system.library_version);

    let av = service
        .load_game(&game)
        .await
        .with_context(|| format!("Failed to load game {}", game.display()))?;
    println!(
        "Game: {}x{} @ {:.2} fps, {} Hz audio",
        av.width, av.height, av.fps, av.sample_rate
    );

    service.run().await.context("Failed to start the core")?;

    let mut video = 0u64;
    let mut audio_frames = 0usize;
    let mut ended = false;
    while video < frames {
        match events.recv().await {
            Ok(ServiceEvent::Frame(_)) => video += 1,
            Ok(ServiceEvent::Audio(audio)) => audio_frames += audio.frames(),
            Ok(ServiceEvent::SessionEnded) => {
                ended = true;
                break;
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event subscriber fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }

    service.stop().await;
    println!("Ran {video} frames, {audio_frames} audio frames");
    if ended {
        anyhow::bail!("Runner exited before {frames} frames");
    }
    Ok(())
}

fn print_options(config: &config::Config, core: &str) -> Result<()> {
    let paths = config.resolve_paths();
    let store = OptionStore::new(paths.options_dir);
    let name = core_name(std::path::Path::new(core));
    let overrides = store
        .load(&name)
        .with_context(|| format!("Failed to read options for `{name}`"))?;

    if overrides.is_empty() {
        println!("No stored options for {name}");
    }
    for (key, value) in overrides {
        println!("{key} = {value}");
    }
    Ok(())
}
