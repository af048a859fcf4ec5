use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use engine::WorkerSpawner;
use session::{spawn_session, AnalyzeOptions, SessionConfig, SessionEvent};
use tokio::sync::broadcast::error::RecvError;

const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Analyze a chess position with a UCI engine and print the top ranked
/// lines from White's perspective.
#[derive(Parser, Debug)]
#[command(name = "explorer", version)]
struct Args {
    /// Position to analyze, as a FEN string.
    #[arg(default_value = START_FEN)]
    fen: String,

    /// Search depth limit.
    #[arg(short, long, default_value_t = 18)]
    depth: u8,

    /// Number of ranked lines to request (1-5).
    #[arg(short, long, default_value_t = 3)]
    lines: u8,

    /// Path to the engine executable; auto-discovered when omitted.
    #[arg(long)]
    engine: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let spawner = Arc::new(WorkerSpawner::new(args.engine));
    let handle = spawn_session(spawner, SessionConfig::default());

    let (_, mut events) = handle.subscribe().await?;
    handle.init().await?;
    tracing::info!("Engine session ready");

    handle
        .analyze(
            args.fen,
            AnalyzeOptions {
                depth: Some(args.depth),
                line_count: Some(args.lines),
            },
        )
        .await?;

    let evaluation = loop {
        match events.recv().await {
            Ok(SessionEvent::EvaluationUpdated(snapshot)) => {
                if snapshot.analyzing {
                    if let Some(best) = snapshot.best {
                        tracing::debug!(depth = snapshot.depth, eval = %best, "Search progress");
                    }
                } else if !snapshot.lines.is_empty() {
                    break snapshot;
                }
            }
            Ok(SessionEvent::TerminalError { reason }) => {
                anyhow::bail!("engine failed: {reason}");
            }
            Ok(SessionEvent::StateChanged(_)) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event stream lagged");
            }
            Err(RecvError::Closed) => anyhow::bail!("session closed unexpectedly"),
        }
    };

    println!("depth {}", evaluation.depth);
    for line in &evaluation.lines {
        println!(
            "{}. {:>6}  bar {:>3.0}%  depth {:>2}  {}",
            line.multipv,
            line.score.display(),
            analysis::bar_percent(line.score),
            line.depth,
            line.pv.join(" "),
        );
    }

    handle.terminate().await;
    Ok(())
}
