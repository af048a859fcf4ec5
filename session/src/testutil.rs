//! In-memory engine worker for state-machine tests: the test side
//! plays the engine, scripting its responses line by line.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use engine::{
    parse_uci_message, EngineCommand, EngineError, EngineEvent, EngineTransport, SpawnEngine,
    UciMessage,
};
use tokio::sync::mpsc;

pub(crate) struct ScriptedTransport {
    cmd_tx: mpsc::UnboundedSender<EngineCommand>,
    event_rx: mpsc::UnboundedReceiver<EngineEvent>,
}

#[async_trait::async_trait]
impl EngineTransport for ScriptedTransport {
    async fn send(&mut self, cmd: EngineCommand) -> Result<(), EngineError> {
        self.cmd_tx.send(cmd).map_err(|_| EngineError::WorkerClosed)
    }

    async fn recv(&mut self) -> Option<EngineEvent> {
        self.event_rx.recv().await
    }

    async fn shutdown(&mut self) {}
}

/// Test-side controller for one spawned transport.
pub(crate) struct ScriptedEngine {
    commands: mpsc::UnboundedReceiver<EngineCommand>,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl ScriptedEngine {
    pub async fn next_command(&mut self) -> EngineCommand {
        self.commands
            .recv()
            .await
            .expect("session dropped the transport")
    }

    pub fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    /// Feed one literal engine output line.
    pub fn emit_line(&self, line: &str) {
        let event = match parse_uci_message(line).expect("test line must parse") {
            UciMessage::UciOk => EngineEvent::HandshakeComplete,
            UciMessage::ReadyOk => EngineEvent::ReadyAcknowledged,
            UciMessage::Info(info) => EngineEvent::Info(info),
            UciMessage::BestMove { mv, ponder } => EngineEvent::BestMove { mv, ponder },
            UciMessage::Id { .. } => return,
        };
        self.emit(event);
    }

    /// Play the engine's side of the init sequence: answer `uci` with
    /// `uciok`, swallow options, answer `isready` with `readyok`.
    pub async fn complete_handshake(&mut self) {
        loop {
            match self.next_command().await {
                EngineCommand::Uci => self.emit_line("uciok"),
                EngineCommand::IsReady => {
                    self.emit_line("readyok");
                    break;
                }
                _ => {}
            }
        }
    }

    /// Drain commands through the next `go`, returning everything seen.
    pub async fn drain_until_go(&mut self) -> Vec<EngineCommand> {
        let mut seen = Vec::new();
        loop {
            let cmd = self.next_command().await;
            let is_go = matches!(cmd, EngineCommand::Go(_));
            seen.push(cmd);
            if is_go {
                return seen;
            }
        }
    }

    /// The FEN of the last `position` command in a drained batch.
    pub fn position_of(commands: &[EngineCommand]) -> Option<&str> {
        commands.iter().rev().find_map(|cmd| match cmd {
            EngineCommand::SetPosition { fen } => Some(fen.as_str()),
            _ => None,
        })
    }
}

/// Spawner handing out scripted transports. Every spawn delivers its
/// test-side controller through the connections channel, so recovery
/// respawns are observable.
pub(crate) struct MockSpawner {
    connections: mpsc::UnboundedSender<ScriptedEngine>,
    fail_remaining: AtomicU32,
}

impl MockSpawner {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ScriptedEngine>) {
        let (connections, conn_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                connections,
                fail_remaining: AtomicU32::new(0),
            }),
            conn_rx,
        )
    }

    /// Make the next `n` spawn attempts fail.
    pub fn fail_spawns(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl SpawnEngine for MockSpawner {
    async fn spawn(&self) -> Result<Box<dyn EngineTransport>, EngineError> {
        if self.fail_remaining.load(Ordering::SeqCst) > 0 {
            self.fail_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(EngineError::EngineNotFound);
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let _ = self.connections.send(ScriptedEngine {
            commands: cmd_rx,
            events: event_tx,
        });
        Ok(Box::new(ScriptedTransport { cmd_tx, event_rx }))
    }
}
