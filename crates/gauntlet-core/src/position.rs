use shakmaty::fen::Fen;
use shakmaty::san::SanPlus;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Position};

use crate::error::PositionError;
use crate::record::{GameEndCause, GameEndResult, GameOutcome, StartPosition};

/// 指し手検証用のローカル局面。ルール処理は shakmaty に委譲する。
///
/// 各 PlayerSeat がゲーム進行の影として1つ持ち、エンジンが報告してくる
/// トークン (bestmove / ponder / pv / currmove) の合法性をここで確認する。
#[derive(Clone, Debug)]
pub struct ShadowPosition {
    pos: Chess,
}

/// 適用済みの1手。正規化した UCI と短い表記を併せて返す。
#[derive(Clone, Debug)]
pub struct AppliedMove {
    pub uci: String,
    pub san: String,
    pub halfmove_clock: u32,
}

impl ShadowPosition {
    pub fn startpos() -> Self {
        Self {
            pos: Chess::default(),
        }
    }

    /// 開始局面と先行手列から局面を組み立てる。
    pub fn new(start: &StartPosition, pre_moves: &[String]) -> Result<Self, PositionError> {
        let mut shadow = match start {
            StartPosition::Standard => Self::startpos(),
            StartPosition::Fen(fen) => {
                let parsed: Fen = fen
                    .parse()
                    .map_err(|_| PositionError::InvalidFen(fen.clone()))?;
                let pos = parsed
                    .into_position(CastlingMode::Standard)
                    .map_err(|_| PositionError::InvalidFen(fen.clone()))?;
                Self { pos }
            }
        };
        for token in pre_moves {
            shadow.apply_token(token)?;
        }
        Ok(shadow)
    }

    /// トークンを解析・合法手検査して適用する。
    pub fn apply_token(&mut self, token: &str) -> Result<AppliedMove, PositionError> {
        if self.is_over() {
            return Err(PositionError::GameOver(token.to_string()));
        }
        let uci = UciMove::from_ascii(token.as_bytes())
            .map_err(|_| PositionError::BadToken(token.to_string()))?;
        let m = uci
            .to_move(&self.pos)
            .map_err(|_| PositionError::IllegalMove(token.to_string()))?;
        let normalized = m.to_uci(CastlingMode::Standard).to_string();
        let san = SanPlus::from_move_and_play_unchecked(&mut self.pos, m).to_string();
        Ok(AppliedMove {
            uci: normalized,
            san,
            halfmove_clock: self.halfmove_clock(),
        })
    }

    /// 適用せずに合法性だけ確認する。
    pub fn probe_token(&self, token: &str) -> Result<String, PositionError> {
        let uci = UciMove::from_ascii(token.as_bytes())
            .map_err(|_| PositionError::BadToken(token.to_string()))?;
        let m = uci
            .to_move(&self.pos)
            .map_err(|_| PositionError::IllegalMove(token.to_string()))?;
        Ok(m.to_uci(CastlingMode::Standard).to_string())
    }

    pub fn white_to_move(&self) -> bool {
        self.pos.turn() == Color::White
    }

    pub fn halfmove_clock(&self) -> u32 {
        self.pos.halfmoves()
    }

    pub fn is_over(&self) -> bool {
        self.local_result().is_over()
    }

    /// ルールのみで決まる終局判定。
    pub fn local_result(&self) -> GameEndResult {
        if self.pos.is_checkmate() {
            let outcome = if self.pos.turn() == Color::White {
                GameOutcome::BlackWins
            } else {
                GameOutcome::WhiteWins
            };
            return GameEndResult::new(outcome, GameEndCause::Checkmate);
        }
        if self.pos.is_stalemate() {
            return GameEndResult::new(GameOutcome::Draw, GameEndCause::Stalemate);
        }
        if self.pos.is_insufficient_material() {
            return GameEndResult::new(GameOutcome::Draw, GameEndCause::DrawRule);
        }
        if self.pos.halfmoves() >= 100 {
            return GameEndResult::new(GameOutcome::Draw, GameEndCause::DrawRule);
        }
        GameEndResult::ongoing()
    }

    pub fn fen(&self) -> String {
        Fen::from_position(&self.pos, EnPassantMode::Legal).to_string()
    }
}
