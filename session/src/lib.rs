//! Engine-analysis session management.
//!
//! One session owns one UCI engine worker and drives it through
//! initialization, position analysis, cancellation, and fault recovery.
//! All mutable state lives in an actor task; callers talk to it through
//! a cloneable [`SessionHandle`] and observe results on a broadcast
//! event stream.

pub mod actor;
pub mod commands;
pub mod events;
pub mod handle;
pub mod snapshot;
pub mod state;

#[cfg(test)]
pub(crate) mod testutil;

use std::sync::Arc;
use std::time::Duration;

use engine::SpawnEngine;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

pub use commands::{AnalyzeOptions, SessionError};
pub use events::SessionEvent;
pub use handle::SessionHandle;
pub use snapshot::SessionSnapshot;
pub use state::SessionPhase;

use state::SessionState;

/// Engine options and timing knobs for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Ranked lines (MultiPV) requested by default, 1..=5.
    pub line_count: u8,
    /// Default search depth; `None` searches until stopped.
    pub default_depth: Option<u8>,
    /// Engine threads option, clamped to 1..=16 when set.
    pub threads: Option<u32>,
    /// Engine hash option in MiB, clamped to 1..=2048 when set.
    pub hash_mb: Option<u32>,
    /// Quiescence window that coalesces bursts of analyze calls.
    pub debounce: Duration,
    /// Bound on the handshake/ready round trip.
    pub init_timeout: Duration,
    /// Bound on waiting for `bestmove` after `stop`.
    pub stop_timeout: Duration,
    /// Silence threshold while a search is running.
    pub liveness_timeout: Duration,
    /// First recovery delay; doubles per attempt up to the cap.
    pub recovery_backoff: Duration,
    pub recovery_backoff_cap: Duration,
    pub max_recovery_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            line_count: 3,
            default_depth: None,
            threads: None,
            hash_mb: None,
            debounce: Duration::from_millis(50),
            init_timeout: Duration::from_secs(15),
            stop_timeout: Duration::from_secs(3),
            liveness_timeout: Duration::from_secs(12),
            recovery_backoff: Duration::from_secs(1),
            recovery_backoff_cap: Duration::from_secs(10),
            max_recovery_attempts: 3,
        }
    }
}

/// Spawn a session actor on the current runtime. The worker process is
/// not started until the first [`SessionHandle::init`] call.
pub fn spawn_session(spawner: Arc<dyn SpawnEngine>, config: SessionConfig) -> SessionHandle {
    let session_id = Uuid::new_v4().to_string();
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (event_tx, _) = broadcast::channel(100);

    let state = SessionState::new(session_id, config, spawner);
    tokio::spawn(actor::run_session_actor(state, cmd_rx, event_tx));

    SessionHandle::new(cmd_tx)
}
