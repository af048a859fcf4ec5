use tokio::sync::{broadcast, oneshot};

use crate::events::SessionEvent;
use crate::snapshot::SessionSnapshot;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("failed to start engine worker: {0}")]
    WorkerStart(String),
    #[error("engine initialization timed out")]
    InitTimeout,
    #[error("engine stopped responding")]
    EngineStalled,
    #[error("engine transport failed: {0}")]
    Transport(String),
    #[error("session terminated")]
    Terminated,
    #[error("internal error: {0}")]
    Internal(String),
}

/// Per-request overrides; unset fields fall back to the session config.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyzeOptions {
    pub depth: Option<u8>,
    pub line_count: Option<u8>,
}

/// Commands sent to the session actor. Queries embed a oneshot for the
/// reply; analysis requests are fire-and-forget, their results arrive
/// on the broadcast event stream.
pub enum SessionCommand {
    Init {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Analyze {
        position: String,
        options: AnalyzeOptions,
    },
    Stop,
    SetLineCount {
        count: u8,
    },
    SetDepth {
        depth: u8,
    },
    GetSnapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Subscribe {
        reply: oneshot::Sender<(SessionSnapshot, broadcast::Receiver<SessionEvent>)>,
    },
    Terminate,
}
