use analysis::EvalSnapshot;

use crate::snapshot::SessionSnapshot;

/// Events broadcast from the session actor to all subscribers.
#[derive(Debug, Clone)]
#[allow(clippy::large_enum_variant)]
pub enum SessionEvent {
    /// Phase or configuration change.
    StateChanged(SessionSnapshot),
    /// Fresh ranked-line snapshot (frequent, lightweight).
    EvaluationUpdated(EvalSnapshot),
    /// Recovery attempts exhausted; the session stays failed until an
    /// explicit re-init.
    TerminalError { reason: String },
}
