//! Ranked-line aggregation for one analysis request.
//!
//! The engine streams `info` records per multipv rank, each superseding
//! the previous record for that rank. The aggregator keeps the newest
//! record per rank for the live request only and republishes an ordered
//! snapshot on every accepted update.

use serde::Serialize;
use smallvec::SmallVec;

use crate::eval::Score;

/// Upper bound on requested ranks. The collection still grows past this
/// if an engine over-delivers; this only sizes the inline storage.
pub const MAX_LINES: usize = 5;

/// One ranked engine line. Replaced wholesale whenever a newer record
/// for its rank arrives; fields from different records never mix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchLine {
    /// 1-based rank; rank 1 is the engine's best choice.
    pub multipv: u8,
    /// Normalized (reference-perspective) score.
    pub score: Score,
    pub depth: u32,
    pub seldepth: Option<u32>,
    /// Principal variation as coordinate-move strings.
    pub pv: Vec<String>,
    pub nodes: Option<u64>,
    pub nps: Option<u64>,
    pub time_ms: Option<u64>,
}

/// Ordered, immutable view over the current ranked lines.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvalSnapshot {
    /// Deepest search depth among the present ranks.
    pub depth: u32,
    /// Present ranks in ascending order.
    pub lines: Vec<SearchLine>,
    /// Rank-1 score — the primary evaluation for single-value displays.
    pub best: Option<Score>,
    /// False once the search finished or was explicitly stopped.
    pub analyzing: bool,
}

#[derive(Debug, Default)]
pub struct AnalysisAggregator {
    request_id: u64,
    slots: SmallVec<[Option<SearchLine>; MAX_LINES]>,
    analyzing: bool,
}

impl AnalysisAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Start collecting for a new request. Called exactly when the
    /// request is dispatched to the engine, never on stop alone, so
    /// the previous lines stay visible until a successor takes over.
    pub fn reset(&mut self, request_id: u64) {
        self.request_id = request_id;
        self.slots.clear();
        self.analyzing = true;
    }

    /// Record a line attributed to `request_id`. Records for anything
    /// but the live request are stale and dropped. Returns whether the
    /// line was accepted.
    pub fn record_line(&mut self, request_id: u64, mut line: SearchLine) -> bool {
        if request_id != self.request_id {
            return false;
        }

        // Engines omit multipv in single-line mode; that is rank 1.
        line.multipv = line.multipv.max(1);
        let index = usize::from(line.multipv) - 1;
        if index >= self.slots.len() {
            self.slots.resize(index + 1, None);
        }
        self.slots[index] = Some(line);
        true
    }

    /// The search ended (bestmove, stop, or fault). Lines are kept for
    /// display until the next reset.
    pub fn finalize(&mut self) {
        self.analyzing = false;
    }

    pub fn is_analyzing(&self) -> bool {
        self.analyzing
    }

    pub fn snapshot(&self) -> EvalSnapshot {
        let lines: Vec<SearchLine> = self.slots.iter().flatten().cloned().collect();
        EvalSnapshot {
            depth: lines.iter().map(|l| l.depth).max().unwrap_or(0),
            best: lines.iter().find(|l| l.multipv == 1).map(|l| l.score),
            lines,
            analyzing: self.analyzing,
        }
    }
}
