use thiserror::Error;

/// ローカル局面の構築・指し手検証で発生するエラー。
#[derive(Debug, Error)]
pub enum PositionError {
    #[error("invalid FEN '{0}'")]
    InvalidFen(String),
    #[error("unparseable move token '{0}'")]
    BadToken(String),
    #[error("illegal move '{0}'")]
    IllegalMove(String),
    #[error("move '{0}' played in a finished game")]
    GameOver(String),
}
