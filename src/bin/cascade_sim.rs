//! Replay a timed transcription script through the cascade with simulated
//! services, printing every runtime event as a JSON line.

use anyhow::Context;
use clap::Parser;
use fae_cascade::sim::{FailureMode, ScriptedGenerator, ScriptedSynthesizer, SimulatedPlayback};
use fae_cascade::{ActivityEvent, CascadeConfig, InterruptReason, PipelineCoordinator};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Drive the turn-detection cascade from a scripted conversation.
#[derive(Parser)]
#[command(name = "fae-cascade-sim", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON script of timed speech and interrupts. Runs a built-in demo if omitted.
    #[arg(short, long)]
    script: Option<PathBuf>,

    /// Simulated generation latency.
    #[arg(long, default_value_t = 900)]
    generation_ms: u64,

    /// Simulated synthesis latency.
    #[arg(long, default_value_t = 400)]
    synthesis_ms: u64,

    /// Fail the first N generation calls.
    #[arg(long, default_value_t = 0)]
    fail_generation: u32,

    /// Fail the first N synthesis calls.
    #[arg(long, default_value_t = 0)]
    fail_synthesis: u32,

    /// Make failures hang until the service timeout instead of erroring.
    #[arg(long)]
    hang: bool,
}

/// A conversation script.
#[derive(Debug, Deserialize)]
struct Script {
    /// Keep running this long after start so trailing work can finish.
    #[serde(default = "default_run_ms")]
    run_ms: u64,
    steps: Vec<Step>,
}

fn default_run_ms() -> u64 {
    6_000
}

fn default_confidence() -> f32 {
    0.9
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Step {
    /// A transcription update.
    Speech {
        at_ms: u64,
        text: String,
        #[serde(default)]
        is_final: bool,
        #[serde(default = "default_confidence")]
        confidence: f32,
    },
    /// An explicit interrupt command.
    Interrupt {
        at_ms: u64,
        #[serde(default)]
        reason: Option<InterruptReason>,
    },
}

impl Step {
    fn at_ms(&self) -> u64 {
        match self {
            Self::Speech { at_ms, .. } | Self::Interrupt { at_ms, .. } => *at_ms,
        }
    }
}

/// Greeting, a pause long enough to answer, then a barge-in.
fn demo_script() -> Script {
    let speech = |at_ms, text: &str, is_final| Step::Speech {
        at_ms,
        text: text.to_owned(),
        is_final,
        confidence: 0.9,
    };
    Script {
        run_ms: default_run_ms(),
        steps: vec![
            speech(0, "Hello", false),
            speech(200, "Hello there", true),
            speech(2_300, "wait", false),
            speech(2_500, "wait what time is it", true),
        ],
    }
}

fn load_script(path: Option<&PathBuf>) -> anyhow::Result<Script> {
    let Some(path) = path else {
        return Ok(demo_script());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read script {}", path.display()))?;
    let mut script: Script = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse script {}", path.display()))?;
    script.steps.sort_by_key(Step::at_ms);
    Ok(script)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fae_cascade=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = if let Some(ref path) = cli.config {
        CascadeConfig::from_file(path)?
    } else {
        CascadeConfig::default()
    };
    let script = load_script(cli.script.as_ref())?;

    let mode = if cli.hang {
        FailureMode::Hang
    } else {
        FailureMode::Error
    };
    let generator = ScriptedGenerator::new(Duration::from_millis(cli.generation_ms))
        .with_failures(cli.fail_generation, mode);
    let synthesizer = ScriptedSynthesizer::new(Duration::from_millis(cli.synthesis_ms))
        .with_failures(cli.fail_synthesis, mode);

    let (events_tx, mut events_rx) = broadcast::channel(256);
    let coordinator = PipelineCoordinator::new(
        config,
        Arc::new(generator),
        Arc::new(synthesizer),
        Arc::new(SimulatedPlayback::new()),
    )
    .with_runtime_events(events_tx);
    let handle = coordinator.handle();
    let cancel = coordinator.cancel_token();

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            cancel_clone.cancel();
        }
    });

    let start = Instant::now();
    let printer = tokio::spawn(async move {
        loop {
            match events_rx.recv().await {
                Ok(event) => {
                    let mut line = serde_json::to_value(&event)?;
                    let t_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                    line["t_ms"] = serde_json::json!(t_ms);
                    println!("{line}");
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("event printer lagged, {n} events skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        Ok::<_, serde_json::Error>(())
    });

    let actor = tokio::spawn(coordinator.run());

    info!(steps = script.steps.len(), "replaying script");
    for step in script.steps {
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep_until(start + Duration::from_millis(step.at_ms())) => {}
        }
        match step {
            Step::Speech {
                text,
                is_final,
                confidence,
                ..
            } => {
                let evt = if is_final {
                    ActivityEvent::final_text(text, confidence)
                } else {
                    ActivityEvent::partial(text, confidence)
                };
                handle.send_activity(evt).await?;
            }
            Step::Interrupt { reason, .. } => {
                handle.interrupt(reason.unwrap_or(InterruptReason::Manual))?;
            }
        }
    }

    tokio::select! {
        () = cancel.cancelled() => {}
        () = tokio::time::sleep_until(start + Duration::from_millis(script.run_ms)) => {}
    }
    let snapshot = handle.snapshot().await?;
    info!(state = ?snapshot.state, epoch = snapshot.epoch, "script finished");

    handle.shutdown();
    drop(handle);
    actor.await??;
    printer.await??;
    Ok(())
}
