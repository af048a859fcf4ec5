use crate::uci::{parse_uci_message, UciMessage};
use crate::{EngineCommand, EngineError, EngineEvent, EngineTransport, SpawnEngine};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;

/// A UCI engine running as a child process. Pure transport: it moves
/// commands in and parsed events out, in order. Protocol sequencing
/// (handshake, ready round trips, search lifecycle) is the session's
/// job, not the worker's.
pub struct UciWorker {
    process: Child,
    stdin_tx: mpsc::Sender<String>,
    event_rx: mpsc::Receiver<EngineEvent>,
}

impl UciWorker {
    /// Spawn the engine process and wire up its stdio. No UCI commands
    /// are sent here; the worker only becomes useful once the owner
    /// drives the handshake.
    #[tracing::instrument(level = "info")]
    pub async fn spawn(path: Option<&Path>) -> Result<Self, EngineError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => find_engine_path().ok_or(EngineError::EngineNotFound)?,
        };
        tracing::info!("Spawning engine worker: {:?}", path);

        let mut process = tokio::process::Command::new(&path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(EngineError::Spawn)?;

        let mut stdin = process.stdin.take().ok_or(EngineError::Pipe("stdin"))?;
        let stdout = process.stdout.take().ok_or(EngineError::Pipe("stdout"))?;

        let (event_tx, event_rx) = mpsc::channel::<EngineEvent>(64);
        let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(32);

        // Reader task: one parsed event per stdout line, wire order
        // preserved. A closed pipe becomes a final Closed event so the
        // owner can tell silence from death.
        let reader_events = event_tx.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        tracing::warn!("Engine stdout EOF");
                        let _ = reader_events
                            .send(EngineEvent::Closed {
                                reason: "engine stdout closed".to_string(),
                            })
                            .await;
                        break;
                    }
                    Ok(_) => {
                        let trimmed = line.trim();
                        tracing::trace!("UCI << {}", trimmed);

                        let event = match parse_uci_message(trimmed) {
                            Ok(UciMessage::UciOk) => EngineEvent::HandshakeComplete,
                            Ok(UciMessage::ReadyOk) => EngineEvent::ReadyAcknowledged,
                            Ok(UciMessage::Info(info)) => EngineEvent::Info(info),
                            Ok(UciMessage::BestMove { mv, ponder }) => {
                                EngineEvent::BestMove { mv, ponder }
                            }
                            Ok(UciMessage::Id { name, value }) => {
                                tracing::debug!("Engine id {}: {}", name, value);
                                continue;
                            }
                            Err(e) => {
                                // Engines are allowed to chatter; never escalate.
                                tracing::trace!("Ignoring engine output: {}", e);
                                continue;
                            }
                        };

                        if reader_events.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!("Error reading engine stdout: {}", e);
                        let _ = reader_events
                            .send(EngineEvent::Closed {
                                reason: format!("engine stdout read failed: {}", e),
                            })
                            .await;
                        break;
                    }
                }
            }
            tracing::debug!("Engine reader task exiting");
        });

        // Writer task: serializes all outbound lines through one place.
        let writer_events = event_tx;
        tokio::spawn(async move {
            while let Some(cmd) = stdin_rx.recv().await {
                tracing::trace!("UCI >> {}", cmd.trim());
                if let Err(e) = stdin.write_all(cmd.as_bytes()).await {
                    tracing::error!("Failed to write to engine stdin: {}", e);
                    let _ = writer_events
                        .send(EngineEvent::Closed {
                            reason: format!("engine stdin write failed: {}", e),
                        })
                        .await;
                    break;
                }
                if let Err(e) = stdin.flush().await {
                    tracing::error!("Failed to flush engine stdin: {}", e);
                    break;
                }
            }
            tracing::debug!("Engine writer task exiting");
        });

        Ok(Self {
            process,
            stdin_tx,
            event_rx,
        })
    }
}

#[async_trait::async_trait]
impl EngineTransport for UciWorker {
    async fn send(&mut self, cmd: EngineCommand) -> Result<(), EngineError> {
        let mut line = cmd.to_wire();
        line.push('\n');
        self.stdin_tx
            .send(line)
            .await
            .map_err(|_| EngineError::WorkerClosed)
    }

    async fn recv(&mut self) -> Option<EngineEvent> {
        self.event_rx.recv().await
    }

    async fn shutdown(&mut self) {
        let _ = self.stdin_tx.send("quit\n".to_string()).await;
        let _ = tokio::time::timeout(std::time::Duration::from_secs(1), self.process.wait()).await;
        let _ = self.process.kill().await;
    }
}

/// Spawner for process-backed workers; the production implementation of
/// the factory the session uses for recovery respawns.
#[derive(Debug, Clone, Default)]
pub struct WorkerSpawner {
    pub engine_path: Option<PathBuf>,
}

impl WorkerSpawner {
    pub fn new(engine_path: Option<PathBuf>) -> Self {
        Self { engine_path }
    }
}

#[async_trait::async_trait]
impl SpawnEngine for WorkerSpawner {
    async fn spawn(&self) -> Result<Box<dyn EngineTransport>, EngineError> {
        let worker = UciWorker::spawn(self.engine_path.as_deref()).await?;
        Ok(Box::new(worker))
    }
}

/// Find a UCI engine executable in common install locations.
pub fn find_engine_path() -> Option<PathBuf> {
    let candidates = [
        "/usr/local/bin/stockfish",
        "/usr/bin/stockfish",
        "/opt/homebrew/bin/stockfish",
        "/usr/games/stockfish",
        "stockfish", // in PATH
    ];

    candidates
        .into_iter()
        .find(|candidate| {
            Path::new(candidate).exists()
                || std::process::Command::new(candidate)
                    .arg("--help")
                    .output()
                    .is_ok()
        })
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_encoding() {
        assert_eq!(EngineCommand::Uci.to_wire(), "uci");
        assert_eq!(EngineCommand::IsReady.to_wire(), "isready");
        assert_eq!(EngineCommand::NewGame.to_wire(), "ucinewgame");
        assert_eq!(EngineCommand::Stop.to_wire(), "stop");
        assert_eq!(EngineCommand::Quit.to_wire(), "quit");
        assert_eq!(
            EngineCommand::SetPosition {
                fen: "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1".to_string()
            }
            .to_wire(),
            "position fen rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"
        );
        assert_eq!(
            EngineCommand::SetOption {
                name: "MultiPV".to_string(),
                value: Some("3".to_string())
            }
            .to_wire(),
            "setoption name MultiPV value 3"
        );
        assert_eq!(
            EngineCommand::Go(crate::GoParams { depth: Some(18) }).to_wire(),
            "go depth 18"
        );
        assert_eq!(
            EngineCommand::Go(crate::GoParams { depth: None }).to_wire(),
            "go infinite"
        );
    }
}
