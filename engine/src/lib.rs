pub mod uci;
pub mod worker;

pub use uci::{format_uci_move, parse_lines, parse_uci_message, parse_uci_move, UciError, UciMessage};
pub use worker::{find_engine_path, UciWorker, WorkerSpawner};

use cozy_chess::Move;

/// Commands sent to the engine worker. Each encodes to exactly one UCI
/// wire line; the tokens are a third-party contract and must match the
/// standard protocol verbatim.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    Uci,
    IsReady,
    NewGame,
    SetPosition { fen: String },
    SetOption { name: String, value: Option<String> },
    Go(GoParams),
    Stop,
    Quit,
}

impl EngineCommand {
    /// Render as a single wire line, without the trailing newline.
    pub fn to_wire(&self) -> String {
        match self {
            Self::Uci => "uci".to_string(),
            Self::IsReady => "isready".to_string(),
            Self::NewGame => "ucinewgame".to_string(),
            Self::SetPosition { fen } => format!("position fen {}", fen),
            Self::SetOption {
                name,
                value: Some(value),
            } => format!("setoption name {} value {}", name, value),
            Self::SetOption { name, value: None } => format!("setoption name {}", name),
            Self::Go(params) => match params.depth {
                Some(depth) => format!("go depth {}", depth),
                None => "go infinite".to_string(),
            },
            Self::Stop => "stop".to_string(),
            Self::Quit => "quit".to_string(),
        }
    }
}

/// Parameters for the "go" command. Without a depth limit the search
/// runs until a "stop" command.
#[derive(Debug, Clone, Copy, Default)]
pub struct GoParams {
    pub depth: Option<u8>,
}

/// Events received from the engine worker.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// `uciok` — the handshake is complete.
    HandshakeComplete,
    /// `readyok` — the synchronous-ready round trip is acknowledged.
    ReadyAcknowledged,
    Info(SearchInfo),
    BestMove { mv: Move, ponder: Option<Move> },
    /// The worker's pipes are gone; no further events will arrive.
    Closed { reason: String },
}

/// One parsed `info` record from the engine.
#[derive(Debug, Clone, Default)]
pub struct SearchInfo {
    pub depth: Option<u32>,
    pub seldepth: Option<u32>,
    /// Multi-line rank index; engines omit it in single-line mode.
    pub multipv: Option<u8>,
    pub score: Option<Score>,
    pub nodes: Option<u64>,
    pub nps: Option<u64>,
    pub time_ms: Option<u64>,
    pub pv: Vec<Move>,
}

impl SearchInfo {
    /// True when the record carries both a score and a principal
    /// variation. Engines emit many informational lines without either
    /// (currmove progress, hashfull, strings); only full search records
    /// feed the evaluation model.
    pub fn is_search_record(&self) -> bool {
        self.score.is_some() && !self.pv.is_empty()
    }
}

/// Score as it appears on the wire: relative to the side to move in the
/// position under search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    Centipawns(i32),
    /// Mate in N moves; negative when the side to move gets mated.
    Mate(i32),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine executable not found")]
    EngineNotFound,
    #[error("failed to spawn engine process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine process has no {0} pipe")]
    Pipe(&'static str),
    #[error("engine worker closed")]
    WorkerClosed,
}

/// Async boundary to a running engine worker. All traffic with the
/// worker goes through this object; there is no shared memory.
#[async_trait::async_trait]
pub trait EngineTransport: Send {
    async fn send(&mut self, cmd: EngineCommand) -> Result<(), EngineError>;

    /// Next event, in wire order. `None` once the worker is gone and the
    /// event queue is drained.
    async fn recv(&mut self) -> Option<EngineEvent>;

    async fn shutdown(&mut self);
}

/// Factory for engine workers. The session keeps one of these so that it
/// can respawn the worker during fault recovery.
#[async_trait::async_trait]
pub trait SpawnEngine: Send + Sync {
    async fn spawn(&self) -> Result<Box<dyn EngineTransport>, EngineError>;
}
