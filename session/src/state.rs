use std::sync::Arc;
use std::time::Duration;

use analysis::{AnalysisAggregator, MAX_LINES};
use cozy_chess::Color;
use engine::{EngineEvent, EngineTransport, SpawnEngine};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::commands::{AnalyzeOptions, SessionError};
use crate::snapshot::SessionSnapshot;
use crate::SessionConfig;

/// Lifecycle phase of the engine session. Exactly one per session,
/// owned by the actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Uninitialized,
    Initializing,
    Ready,
    Analyzing,
    Stopping,
    Failed,
}

/// One admitted analysis request. `id` is issued from a monotonic
/// counter; engine output is attributed to the live request's id, never
/// matched by position equality.
#[derive(Debug, Clone)]
pub(crate) struct AnalysisRequest {
    pub id: u64,
    pub position: String,
    pub depth: Option<u8>,
    pub line_count: u8,
    pub side_to_move: Color,
}

/// Which bounded wait fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Deadline {
    Debounce,
    Init,
    Stop,
    Recovery,
}

/// Internal mutable state, owned entirely by the session actor. No
/// locks: everything is mutated from the actor's single task.
pub(crate) struct SessionState {
    pub session_id: String,
    pub config: SessionConfig,
    pub spawner: Arc<dyn SpawnEngine>,
    pub transport: Option<Box<dyn EngineTransport>>,
    pub phase: SessionPhase,

    /// Highest request id issued so far.
    pub next_request_id: u64,
    /// Admitted but not yet dispatched; replaced outright by newer calls.
    pub pending: Option<AnalysisRequest>,
    /// The request currently driving engine commands.
    pub live: Option<AnalysisRequest>,
    /// Request to re-dispatch after a successful recovery.
    pub resubmit: Option<AnalysisRequest>,

    pub aggregator: AnalysisAggregator,
    pub init_replies: Vec<oneshot::Sender<Result<(), SessionError>>>,

    /// `uciok` seen for the current worker; `readyok` completes init.
    pub handshake_done: bool,
    /// MultiPV value the current worker was last configured with.
    pub engine_line_count: Option<u8>,

    /// `None` while pending means the quiescence window has elapsed and
    /// the request is due for dispatch.
    pub debounce_deadline: Option<Instant>,
    pub init_deadline: Option<Instant>,
    pub stop_deadline: Option<Instant>,
    pub recovery_deadline: Option<Instant>,

    /// Refreshed on every transition and engine event; the health tick
    /// compares against it to detect a silently hung worker.
    pub last_activity: Instant,

    pub recovery_attempts: u32,
    pub next_backoff: Duration,
    /// Bestmove credits owed by searches we force-timed-out; a late ack
    /// must not finalize a newer search.
    pub stale_bestmoves: u32,

    pub line_count: u8,
    pub depth_limit: Option<u8>,
    pub last_error: Option<String>,
}

impl SessionState {
    pub fn new(session_id: String, config: SessionConfig, spawner: Arc<dyn SpawnEngine>) -> Self {
        let line_count = config.line_count.clamp(1, MAX_LINES as u8);
        let depth_limit = config.default_depth;
        let next_backoff = config.recovery_backoff;
        Self {
            session_id,
            config,
            spawner,
            transport: None,
            phase: SessionPhase::Uninitialized,
            next_request_id: 0,
            pending: None,
            live: None,
            resubmit: None,
            aggregator: AnalysisAggregator::new(),
            init_replies: Vec::new(),
            handshake_done: false,
            engine_line_count: None,
            debounce_deadline: None,
            init_deadline: None,
            stop_deadline: None,
            recovery_deadline: None,
            last_activity: Instant::now(),
            recovery_attempts: 0,
            next_backoff,
            stale_bestmoves: 0,
            line_count,
            depth_limit,
            last_error: None,
        }
    }

    /// Build a full snapshot of the current state.
    pub fn snapshot(&self) -> SessionSnapshot {
        let evaluation = self.aggregator.snapshot();
        SessionSnapshot {
            session_id: self.session_id.clone(),
            phase: self.phase,
            position: self.live.as_ref().map(|r| r.position.clone()),
            analyzing: evaluation.analyzing,
            evaluation,
            line_count: self.line_count,
            depth_limit: self.depth_limit,
            last_error: self.last_error.clone(),
        }
    }

    pub fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            tracing::debug!(from = ?self.phase, to = ?phase, "Session phase transition");
            self.phase = phase;
            self.last_activity = Instant::now();
        }
    }

    /// Next event from the worker, in wire order. Pends forever without
    /// a transport; a closed event channel is surfaced as a transport
    /// fault rather than silence.
    pub async fn next_engine_event(&mut self) -> EngineEvent {
        match self.transport.as_mut() {
            Some(transport) => match transport.recv().await {
                Some(event) => event,
                None => EngineEvent::Closed {
                    reason: "engine event channel closed".to_string(),
                },
            },
            None => std::future::pending().await,
        }
    }

    /// Admit an analyze call: issue the next request id and replace any
    /// previously pending request outright. Bursts within the debounce
    /// window therefore collapse into the newest request.
    pub fn admit_request(&mut self, position: String, options: AnalyzeOptions) {
        self.next_request_id += 1;
        let request = AnalysisRequest {
            id: self.next_request_id,
            side_to_move: position_side_to_move(&position),
            depth: options.depth.or(self.depth_limit),
            line_count: options
                .line_count
                .unwrap_or(self.line_count)
                .clamp(1, MAX_LINES as u8),
            position,
        };
        tracing::debug!(request_id = request.id, "Admitted analysis request");
        self.pending = Some(request);
        self.debounce_deadline = Some(Instant::now() + self.config.debounce);
    }

    /// Earliest armed deadline, if any.
    pub fn next_deadline(&self) -> Option<(Instant, Deadline)> {
        [
            (self.debounce_deadline, Deadline::Debounce),
            (self.init_deadline, Deadline::Init),
            (self.stop_deadline, Deadline::Stop),
            (self.recovery_deadline, Deadline::Recovery),
        ]
        .into_iter()
        .filter_map(|(at, kind)| at.map(|at| (at, kind)))
        .min_by_key(|(at, _)| *at)
    }

    /// Detach the current worker and let it shut down in the background.
    pub fn release_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            tokio::spawn(async move {
                transport.shutdown().await;
            });
        }
    }

    /// Resolve all pending init futures with one outcome.
    pub fn resolve_init(&mut self, result: Result<(), SessionError>) {
        for reply in self.init_replies.drain(..) {
            let _ = reply.send(result.clone());
        }
    }
}

/// Side to move encoded in the second field of a FEN-like position
/// string. The position is otherwise opaque to the session; malformed
/// strings default to the reference side and fail engine-side.
pub(crate) fn position_side_to_move(position: &str) -> Color {
    match position.split_whitespace().nth(1) {
        Some("b") => Color::Black,
        _ => Color::White,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_to_move_extraction() {
        assert_eq!(
            position_side_to_move("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"),
            Color::White
        );
        assert_eq!(
            position_side_to_move("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1"),
            Color::Black
        );
        assert_eq!(position_side_to_move("garbage"), Color::White);
    }

    #[test]
    fn test_admit_replaces_pending_and_bumps_id() {
        let (spawner, _conns) = crate::testutil::MockSpawner::new();
        let mut state =
            SessionState::new("test".to_string(), SessionConfig::default(), spawner);

        state.admit_request("fen one w".to_string(), AnalyzeOptions::default());
        state.admit_request("fen two w".to_string(), AnalyzeOptions::default());

        let pending = state.pending.as_ref().unwrap();
        assert_eq!(pending.id, 2);
        assert_eq!(pending.position, "fen two w");
        assert_eq!(state.next_request_id, 2);
    }

    #[test]
    fn test_admit_clamps_line_count() {
        let (spawner, _conns) = crate::testutil::MockSpawner::new();
        let mut state =
            SessionState::new("test".to_string(), SessionConfig::default(), spawner);

        state.admit_request(
            "fen w".to_string(),
            AnalyzeOptions {
                depth: None,
                line_count: Some(9),
            },
        );
        assert_eq!(state.pending.as_ref().unwrap().line_count, 5);
    }

    #[test]
    fn test_next_deadline_picks_earliest() {
        let (spawner, _conns) = crate::testutil::MockSpawner::new();
        let mut state =
            SessionState::new("test".to_string(), SessionConfig::default(), spawner);
        let now = Instant::now();

        state.init_deadline = Some(now + Duration::from_secs(15));
        state.debounce_deadline = Some(now + Duration::from_millis(50));
        let (_, kind) = state.next_deadline().unwrap();
        assert_eq!(kind, Deadline::Debounce);

        state.debounce_deadline = None;
        let (_, kind) = state.next_deadline().unwrap();
        assert_eq!(kind, Deadline::Init);
    }
}
