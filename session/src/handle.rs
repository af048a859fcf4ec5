use tokio::sync::{broadcast, mpsc, oneshot};

use crate::commands::{AnalyzeOptions, SessionCommand, SessionError};
use crate::events::SessionEvent;
use crate::snapshot::SessionSnapshot;

/// Cheap, cloneable handle to a session actor.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub(crate) fn new(cmd_tx: mpsc::Sender<SessionCommand>) -> Self {
        Self { cmd_tx }
    }

    /// Start the engine worker and complete the protocol handshake.
    /// Resolves once the session is ready (or has failed to get there).
    /// Also used to retry after a terminal failure.
    pub async fn init(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Init { reply: tx }).await?;
        rx.await.map_err(|_| SessionError::Terminated)?
    }

    /// Request analysis of a position. Fire-and-forget: rapid calls
    /// coalesce, and results arrive on the subscribed event stream.
    pub async fn analyze(
        &self,
        position: impl Into<String>,
        options: AnalyzeOptions,
    ) -> Result<(), SessionError> {
        self.send(SessionCommand::Analyze {
            position: position.into(),
            options,
        })
        .await
    }

    /// Stop the running search. The last computed lines remain visible
    /// until a new request dispatches.
    pub async fn stop(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Stop).await
    }

    /// Default number of ranked lines for future requests, 1..=5.
    pub async fn set_line_count(&self, count: u8) -> Result<(), SessionError> {
        self.send(SessionCommand::SetLineCount { count }).await
    }

    /// Default depth limit for future requests.
    pub async fn set_depth(&self, depth: u8) -> Result<(), SessionError> {
        self.send(SessionCommand::SetDepth { depth }).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::GetSnapshot { reply: tx }).await?;
        rx.await.map_err(|_| SessionError::Terminated)
    }

    /// Current snapshot plus a receiver for all subsequent events.
    pub async fn subscribe(
        &self,
    ) -> Result<(SessionSnapshot, broadcast::Receiver<SessionEvent>), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Subscribe { reply: tx }).await?;
        rx.await.map_err(|_| SessionError::Terminated)
    }

    /// Tear the session down. Terminal: a new session must be spawned
    /// for further analysis.
    pub async fn terminate(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Terminate).await;
    }

    async fn send(&self, cmd: SessionCommand) -> Result<(), SessionError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| SessionError::Terminated)
    }
}
