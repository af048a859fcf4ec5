use crate::{Score, SearchInfo};
use cozy_chess::{File, Move, Piece, Rank, Square};

/// Incoming message from a UCI engine.
#[derive(Debug, Clone)]
pub enum UciMessage {
    Id { name: String, value: String },
    UciOk,
    ReadyOk,
    BestMove { mv: Move, ponder: Option<Move> },
    Info(SearchInfo),
}

/// Split a possibly multi-line buffer into lines and parse each one
/// independently. The worker transport may hand over coalesced output;
/// unparseable lines are dropped here since the protocol permits
/// engines to emit free-form diagnostics.
pub fn parse_lines(buffer: &str) -> Vec<UciMessage> {
    buffer
        .lines()
        .filter_map(|line| parse_uci_message(line).ok())
        .collect()
}

/// Parse a single UCI message line.
pub fn parse_uci_message(line: &str) -> Result<UciMessage, crate::UciError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();

    match tokens.first() {
        Some(&"uciok") => Ok(UciMessage::UciOk),
        Some(&"readyok") => Ok(UciMessage::ReadyOk),

        Some(&"id") => {
            if tokens.len() < 3 {
                return Err(crate::UciError::MalformedMessage(line.to_string()));
            }
            Ok(UciMessage::Id {
                name: tokens[1].to_string(),
                value: tokens[2..].join(" "),
            })
        }

        Some(&"bestmove") => {
            if tokens.len() < 2 {
                return Err(crate::UciError::MalformedMessage(line.to_string()));
            }
            let mv = parse_uci_move(tokens[1])?;
            let ponder = if tokens.len() >= 4 && tokens[2] == "ponder" {
                Some(parse_uci_move(tokens[3])?)
            } else {
                None
            };
            Ok(UciMessage::BestMove { mv, ponder })
        }

        Some(&"info") => Ok(UciMessage::Info(parse_info_line(&tokens[1..]))),

        _ => Err(crate::UciError::UnknownMessage(line.to_string())),
    }
}

/// Parse the tail of an "info" line. Unknown keywords are skipped; the
/// principal variation ends at the first token that is not a coordinate
/// move, keeping everything before it.
fn parse_info_line(tokens: &[&str]) -> SearchInfo {
    let mut info = SearchInfo::default();
    let mut i = 0;

    while i < tokens.len() {
        match tokens[i] {
            "depth" => {
                i += 1;
                info.depth = tokens.get(i).and_then(|s| s.parse().ok());
            }
            "seldepth" => {
                i += 1;
                info.seldepth = tokens.get(i).and_then(|s| s.parse().ok());
            }
            "multipv" => {
                i += 1;
                info.multipv = tokens.get(i).and_then(|s| s.parse().ok());
            }
            "time" => {
                i += 1;
                info.time_ms = tokens.get(i).and_then(|s| s.parse().ok());
            }
            "nodes" => {
                i += 1;
                info.nodes = tokens.get(i).and_then(|s| s.parse().ok());
            }
            "nps" => {
                i += 1;
                info.nps = tokens.get(i).and_then(|s| s.parse().ok());
            }
            "score" => {
                i += 1;
                if let (Some(&kind), Some(value)) = (tokens.get(i), tokens.get(i + 1)) {
                    info.score = match kind {
                        "cp" => value.parse().ok().map(Score::Centipawns),
                        "mate" => value.parse().ok().map(Score::Mate),
                        _ => None,
                    };
                    if info.score.is_some() {
                        i += 1;
                    }
                }
            }
            "pv" => {
                i += 1;
                while i < tokens.len() {
                    match parse_uci_move(tokens[i]) {
                        Ok(mv) => info.pv.push(mv),
                        Err(_) => break,
                    }
                    i += 1;
                }
                continue;
            }
            _ => {}
        }
        i += 1;
    }

    info
}

/// Parse a coordinate move (e2e4, e7e8q).
pub fn parse_uci_move(s: &str) -> Result<Move, crate::UciError> {
    if !s.is_ascii() || s.len() < 4 || s.len() > 5 {
        return Err(crate::UciError::InvalidMove(s.to_string()));
    }

    let from = parse_square(&s[0..2])?;
    let to = parse_square(&s[2..4])?;

    let promotion = match s.as_bytes().get(4) {
        None => None,
        Some(b'q') => Some(Piece::Queen),
        Some(b'r') => Some(Piece::Rook),
        Some(b'b') => Some(Piece::Bishop),
        Some(b'n') => Some(Piece::Knight),
        Some(_) => return Err(crate::UciError::InvalidPromotion(s.to_string())),
    };

    Ok(Move {
        from,
        to,
        promotion,
    })
}

fn parse_square(s: &str) -> Result<Square, crate::UciError> {
    let bytes = s.as_bytes();
    if bytes.len() != 2 {
        return Err(crate::UciError::InvalidSquare(s.to_string()));
    }

    let file = match bytes[0] {
        b'a' => File::A,
        b'b' => File::B,
        b'c' => File::C,
        b'd' => File::D,
        b'e' => File::E,
        b'f' => File::F,
        b'g' => File::G,
        b'h' => File::H,
        _ => return Err(crate::UciError::InvalidSquare(s.to_string())),
    };

    let rank = match bytes[1] {
        b'1' => Rank::First,
        b'2' => Rank::Second,
        b'3' => Rank::Third,
        b'4' => Rank::Fourth,
        b'5' => Rank::Fifth,
        b'6' => Rank::Sixth,
        b'7' => Rank::Seventh,
        b'8' => Rank::Eighth,
        _ => return Err(crate::UciError::InvalidSquare(s.to_string())),
    };

    Ok(Square::new(file, rank))
}

/// Format a move in coordinate notation (cozy-chess Move → "e2e4").
pub fn format_uci_move(mv: &Move) -> String {
    let mut s = format!("{}{}", format_square(mv.from), format_square(mv.to));
    if let Some(promo) = mv.promotion {
        s.push(match promo {
            Piece::Queen => 'q',
            Piece::Rook => 'r',
            Piece::Bishop => 'b',
            Piece::Knight => 'n',
            _ => unreachable!(),
        });
    }
    s
}

fn format_square(sq: Square) -> String {
    let file = match sq.file() {
        File::A => 'a',
        File::B => 'b',
        File::C => 'c',
        File::D => 'd',
        File::E => 'e',
        File::F => 'f',
        File::G => 'g',
        File::H => 'h',
    };
    let rank = match sq.rank() {
        Rank::First => '1',
        Rank::Second => '2',
        Rank::Third => '3',
        Rank::Fourth => '4',
        Rank::Fifth => '5',
        Rank::Sixth => '6',
        Rank::Seventh => '7',
        Rank::Eighth => '8',
    };
    format!("{}{}", file, rank)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_handshake_tokens() {
        assert!(matches!(parse_uci_message("uciok"), Ok(UciMessage::UciOk)));
        assert!(matches!(
            parse_uci_message("readyok"),
            Ok(UciMessage::ReadyOk)
        ));
    }

    #[test]
    fn test_parse_bestmove() {
        let msg = parse_uci_message("bestmove e2e4 ponder e7e5").unwrap();
        match msg {
            UciMessage::BestMove { mv, ponder } => {
                assert_eq!(format_uci_move(&mv), "e2e4");
                assert_eq!(format_uci_move(&ponder.unwrap()), "e7e5");
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_parse_bestmove_without_ponder() {
        let msg = parse_uci_message("bestmove e7e8q").unwrap();
        match msg {
            UciMessage::BestMove { mv, ponder } => {
                assert_eq!(format_uci_move(&mv), "e7e8q");
                assert!(ponder.is_none());
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_parse_full_info_record() {
        let msg = parse_uci_message(
            "info depth 12 seldepth 18 multipv 1 score cp 34 nodes 500000 nps 900000 time 550 pv e2e4 e7e5 g1f3",
        )
        .unwrap();
        match msg {
            UciMessage::Info(info) => {
                assert_eq!(info.depth, Some(12));
                assert_eq!(info.seldepth, Some(18));
                assert_eq!(info.multipv, Some(1));
                assert_eq!(info.score, Some(Score::Centipawns(34)));
                assert_eq!(info.nodes, Some(500_000));
                assert_eq!(info.nps, Some(900_000));
                assert_eq!(info.time_ms, Some(550));
                let pv: Vec<String> = info.pv.iter().map(format_uci_move).collect();
                assert_eq!(pv, ["e2e4", "e7e5", "g1f3"]);
                assert!(info.is_search_record());
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_parse_mate_score() {
        let msg = parse_uci_message("info depth 20 multipv 1 score mate 3 pv d1h5").unwrap();
        match msg {
            UciMessage::Info(info) => {
                assert_eq!(info.score, Some(Score::Mate(3)));
                assert_eq!(info.multipv, Some(1));
                assert_eq!(info.pv.len(), 1);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_multipv_defaults_to_absent() {
        let msg = parse_uci_message("info depth 8 score cp -12 pv e7e5").unwrap();
        match msg {
            UciMessage::Info(info) => assert_eq!(info.multipv, None),
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_pv_stops_at_first_bad_token() {
        // Engines may append free-form tokens after the pv list; the
        // valid prefix is kept.
        let msg =
            parse_uci_message("info depth 5 score cp 10 pv e2e4 e7e5 stringy extra").unwrap();
        match msg {
            UciMessage::Info(info) => {
                let pv: Vec<String> = info.pv.iter().map(format_uci_move).collect();
                assert_eq!(pv, ["e2e4", "e7e5"]);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_info_without_score_or_pv_is_not_a_search_record() {
        let msg = parse_uci_message("info depth 30 currmove e2e4 currmovenumber 1").unwrap();
        match msg {
            UciMessage::Info(info) => assert!(!info.is_search_record()),
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_score_with_bound_marker() {
        let msg = parse_uci_message("info depth 10 score cp 55 lowerbound pv d2d4").unwrap();
        match msg {
            UciMessage::Info(info) => assert_eq!(info.score, Some(Score::Centipawns(55))),
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_unknown_line_is_an_error_not_a_panic() {
        assert!(parse_uci_message("option name Hash type spin default 16").is_err());
        assert!(parse_uci_message("").is_err());
    }

    #[test]
    fn test_parse_lines_splits_coalesced_buffers() {
        let buffer = "info depth 1 score cp 5 pv e2e4\nbestmove e2e4\ngarbage line\n";
        let messages = parse_lines(buffer);
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0], UciMessage::Info(_)));
        assert!(matches!(messages[1], UciMessage::BestMove { .. }));
    }

    #[test]
    fn test_parse_promotion_move() {
        let mv = parse_uci_move("a7a8n").unwrap();
        assert_eq!(mv.promotion, Some(Piece::Knight));
        assert!(parse_uci_move("a7a8x").is_err());
        assert!(parse_uci_move("i2i4").is_err());
        assert!(parse_uci_move("e2").is_err());
    }
}
