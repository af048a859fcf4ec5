pub mod parser;

pub use parser::{format_uci_move, parse_lines, parse_uci_message, parse_uci_move, UciMessage};

#[derive(Debug, thiserror::Error)]
pub enum UciError {
    #[error("malformed UCI message: {0}")]
    MalformedMessage(String),
    #[error("unknown UCI message: {0}")]
    UnknownMessage(String),
    #[error("invalid move: {0}")]
    InvalidMove(String),
    #[error("invalid square: {0}")]
    InvalidSquare(String),
    #[error("invalid promotion: {0}")]
    InvalidPromotion(String),
}
