//! Score normalization and display.
//!
//! Engines report scores relative to the side to move in the position
//! under search; the UI wants everything from White's point of view.
//! The flip happens exactly once, at the session's protocol boundary,
//! through [`normalize`] — nothing downstream re-negates.

use cozy_chess::Color;
use serde::{Deserialize, Serialize};

/// Engine evaluation score.
///
/// Centipawns: positive favors the reference perspective.
/// Mate: positive N mates in N moves, negative N gets mated in N moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Score {
    Centipawns(i32),
    Mate(i32),
}

impl Score {
    /// Flip perspective.
    pub fn negate(self) -> Self {
        match self {
            Self::Centipawns(cp) => Self::Centipawns(-cp),
            Self::Mate(m) => Self::Mate(-m),
        }
    }

    /// Human-readable form: centipawns as sign-prefixed pawns with one
    /// decimal ("+1.5", "-0.3"), mates as "M3" / "-M3".
    pub fn display(&self) -> String {
        match self {
            Self::Centipawns(cp) => format!("{:+.1}", *cp as f64 / 100.0),
            Self::Mate(m) => {
                if *m >= 0 {
                    format!("M{}", m)
                } else {
                    format!("-M{}", m.abs())
                }
            }
        }
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// Restate a side-to-move-relative score from White's perspective.
pub fn normalize(score: Score, side_to_move: Color) -> Score {
    match side_to_move {
        Color::White => score,
        Color::Black => score.negate(),
    }
}

/// Sigmoid steepness, calibrated so ±400 cp maps to roughly an 80% win
/// probability, matching common chess platform norms.
const SIGMOID_K: f64 = -0.003_682_08;

/// Centipawn magnitudes are capped here before the sigmoid; mate scores
/// map above the cap so they always dominate centipawn evaluations.
const CP_CEILING: i32 = 1000;

/// Winning chance in [-1, 1] for the score's perspective: 0 is equal,
/// +1 is a certain win, -1 a certain loss.
///
/// Mate-in-N maps to an equivalent centipawn magnitude of
/// `(21 - min(10, N)) * 100`, then through the same sigmoid as
/// centipawn scores: shorter mates saturate closer to ±1, and there is
/// no discontinuity at the mate boundary.
pub fn winning_chance(score: Score) -> f64 {
    let cp = match score {
        Score::Centipawns(cp) => cp.clamp(-CP_CEILING, CP_CEILING) as f64,
        Score::Mate(m) => {
            let magnitude = f64::from((21 - m.abs().min(10)) * 100);
            if m >= 0 {
                magnitude
            } else {
                -magnitude
            }
        }
    };
    2.0 / (1.0 + (SIGMOID_K * cp).exp()) - 1.0
}

/// Evaluation-bar position in [0, 100]: 50 is equal, 100 is the
/// reference side winning completely.
pub fn bar_percent(score: Score) -> f64 {
    ((winning_chance(score) + 1.0) * 50.0).round()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_is_identity_for_white() {
        assert_eq!(
            normalize(Score::Centipawns(34), Color::White),
            Score::Centipawns(34)
        );
        assert_eq!(normalize(Score::Mate(3), Color::White), Score::Mate(3));
    }

    #[test]
    fn test_normalize_negates_for_black() {
        assert_eq!(
            normalize(Score::Centipawns(34), Color::Black),
            Score::Centipawns(-34)
        );
        assert_eq!(normalize(Score::Mate(3), Color::Black), Score::Mate(-3));
        assert_eq!(normalize(Score::Mate(-5), Color::Black), Score::Mate(5));
    }

    #[test]
    fn test_display_centipawns() {
        assert_eq!(Score::Centipawns(150).display(), "+1.5");
        assert_eq!(Score::Centipawns(-34).display(), "-0.3");
        assert_eq!(Score::Centipawns(0).display(), "+0.0");
    }

    #[test]
    fn test_display_mate() {
        assert_eq!(Score::Mate(3).display(), "M3");
        assert_eq!(Score::Mate(-7).display(), "-M7");
    }

    #[test]
    fn test_winning_chance_anchors() {
        assert_eq!(winning_chance(Score::Centipawns(0)), 0.0);
        // ±400 cp ≈ ±80% win probability
        let c = winning_chance(Score::Centipawns(400));
        assert!((0.60..0.66).contains(&c), "got {}", c);
        // Probability form: (c + 1) / 2
        let p = (c + 1.0) / 2.0;
        assert!((0.79..0.83).contains(&p), "got {}", p);
    }

    #[test]
    fn test_winning_chance_mate_saturates_by_distance() {
        let m1 = winning_chance(Score::Mate(1));
        let m9 = winning_chance(Score::Mate(9));
        let cap = winning_chance(Score::Centipawns(100_000));
        assert!(m1 > m9, "shorter mates saturate harder");
        assert!(m9 > cap, "any mate beats the centipawn ceiling");
        assert!(m1 < 1.0);
    }

    #[test]
    fn test_bar_percent_anchors() {
        assert_eq!(bar_percent(Score::Centipawns(0)), 50.0);
        assert_eq!(bar_percent(Score::Mate(1)), 100.0);
        assert_eq!(bar_percent(Score::Mate(-1)), 0.0);
        // A short mate lands essentially at the top of the bar.
        assert!(bar_percent(Score::Mate(3)) > 99.0);
    }

    proptest! {
        #[test]
        fn prop_double_negation_is_identity(cp in -20_000i32..20_000) {
            let s = Score::Centipawns(cp);
            prop_assert_eq!(
                normalize(normalize(s, Color::Black), Color::Black),
                s
            );
        }

        #[test]
        fn prop_double_negation_is_identity_for_mate(m in -40i32..40) {
            let s = Score::Mate(m);
            prop_assert_eq!(
                normalize(normalize(s, Color::Black), Color::Black),
                s
            );
        }

        #[test]
        fn prop_winning_chance_is_odd(cp in -20_000i32..20_000) {
            let pos = winning_chance(Score::Centipawns(cp));
            let neg = winning_chance(Score::Centipawns(-cp));
            prop_assert!((pos + neg).abs() < 1e-12);
        }

        #[test]
        fn prop_winning_chance_monotonic(a in -2_000i32..2_000, b in -2_000i32..2_000) {
            let (lo, hi) = (a.min(b), a.max(b));
            prop_assert!(
                winning_chance(Score::Centipawns(lo))
                    <= winning_chance(Score::Centipawns(hi))
            );
        }

        #[test]
        fn prop_winning_chance_bounded(cp in i32::MIN..i32::MAX) {
            let c = winning_chance(Score::Centipawns(cp));
            prop_assert!((-1.0..=1.0).contains(&c));
        }
    }
}
