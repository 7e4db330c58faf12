use serde::{Deserialize, Serialize};

use crate::error::PositionError;
use crate::position::ShadowPosition;
use crate::search_info::SearchInfo;
use crate::time_control::{GoLimits, TimeControl};

/// 1手あたりに保持する探索スナップショットの上限。
pub const SNAPSHOT_CAP: usize = 64;

/// 開始局面。標準初期配置か FEN 指定。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartPosition {
    #[default]
    Standard,
    Fen(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameOutcome {
    #[default]
    Ongoing,
    WhiteWins,
    BlackWins,
    Draw,
}

impl GameOutcome {
    pub fn label(self) -> &'static str {
        match self {
            GameOutcome::Ongoing => "ongoing",
            GameOutcome::WhiteWins => "white_win",
            GameOutcome::BlackWins => "black_win",
            GameOutcome::Draw => "draw",
        }
    }

    /// 指定側の負け。
    pub fn loss_for(white: bool) -> Self {
        if white {
            GameOutcome::BlackWins
        } else {
            GameOutcome::WhiteWins
        }
    }

    pub fn is_loss_for(self, white: bool) -> bool {
        self == Self::loss_for(white)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameEndCause {
    #[default]
    Unterminated,
    Checkmate,
    Stalemate,
    DrawRule,
    IllegalMove,
    Timeout,
    Disconnect,
    Resignation,
    Stopped,
}

impl GameEndCause {
    pub fn label(self) -> &'static str {
        match self {
            GameEndCause::Unterminated => "unterminated",
            GameEndCause::Checkmate => "checkmate",
            GameEndCause::Stalemate => "stalemate",
            GameEndCause::DrawRule => "draw_rule",
            GameEndCause::IllegalMove => "illegal_move",
            GameEndCause::Timeout => "timeout",
            GameEndCause::Disconnect => "disconnect",
            GameEndCause::Resignation => "resign",
            GameEndCause::Stopped => "stopped",
        }
    }
}

/// 終局理由と勝敗の組。開始時は「継続中」。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEndResult {
    pub outcome: GameOutcome,
    pub cause: GameEndCause,
}

impl GameEndResult {
    pub fn new(outcome: GameOutcome, cause: GameEndCause) -> Self {
        Self { outcome, cause }
    }

    pub fn ongoing() -> Self {
        Self::default()
    }

    pub fn is_over(&self) -> bool {
        self.cause != GameEndCause::Unterminated
    }
}

/// 1手 (1 ply) の記録。GameRecord へ追加された後は不変。
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MoveRecord {
    /// エンジンが返した生のトークン。違反手のときは空のまま。
    pub token: String,
    pub uci: String,
    pub san: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ponder_token: Option<String>,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_cp: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_mate: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seldepth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multipv: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u64>,
    pub pv: String,
    /// 探索途中のスナップショット履歴。PV 無しの行は最後の要素へ
    /// 上書きマージし、PV を初めて含んだ行から恒久エントリになる。
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub snapshots: Vec<SearchInfo>,
    pub halfmove_clock: u32,
    pub engine_id: u64,
    /// 0始まりの half-move 番号。
    pub ply: u32,
}

impl MoveRecord {
    /// 探索開始時点の空レコード。
    pub fn begin(engine_id: u64, ply: u32) -> Self {
        Self {
            engine_id,
            ply,
            ..Self::default()
        }
    }

    /// info スナップショットを取り込む。
    ///
    /// スカラー値は常に最新で上書きし、履歴は「PV が届くまで最後の
    /// エントリにマージする」規則で圧縮する。info 1行ごとに 1 レコードを
    /// 作らないための措置で、PV の履歴だけは保存される。
    pub fn absorb_info(&mut self, info: &SearchInfo) {
        if let Some(d) = info.depth {
            self.depth = Some(d);
        }
        if let Some(d) = info.seldepth {
            self.seldepth = Some(d);
        }
        if let Some(m) = info.multipv {
            self.multipv = Some(m);
        }
        if let Some(n) = info.nodes {
            self.nodes = Some(n);
        }
        if let Some(cp) = info.score_cp {
            self.score_cp = Some(cp);
            self.score_mate = None;
        }
        if let Some(mate) = info.score_mate {
            self.score_mate = Some(mate);
            self.score_cp = None;
        }
        if info.has_pv() {
            self.pv = info.pv_text();
        }

        // PV がまだ無い直前のスナップショットへは上書きマージ。
        // 上限に達した後も最後の要素を入れ替えるだけで伸ばさない
        let full = self.snapshots.len() >= SNAPSHOT_CAP;
        match self.snapshots.last_mut() {
            Some(last) if !last.has_pv() || full => *last = info.clone(),
            _ => self.snapshots.push(info.clone()),
        }
    }
}

/// 対局の正本。GameContext が排他的に所有し、ロック越しにのみ読まれる。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameRecord {
    pub start: StartPosition,
    /// 開始局面から先行して並べる手 (UCI トークン)。
    pub pre_moves: Vec<String>,
    pub moves: Vec<MoveRecord>,
    pub white_tc: TimeControl,
    pub black_tc: TimeControl,
    pub white_name: String,
    pub black_name: String,
    pub round: u32,
    pub game_in_round: u32,
    pub result: GameEndResult,
}

impl Default for GameRecord {
    fn default() -> Self {
        Self {
            start: StartPosition::Standard,
            pre_moves: Vec::new(),
            moves: Vec::new(),
            white_tc: TimeControl::default(),
            black_tc: TimeControl::default(),
            white_name: String::new(),
            black_name: String::new(),
            round: 0,
            game_in_round: 0,
            result: GameEndResult::ongoing(),
        }
    }
}

impl GameRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_start(start: StartPosition, pre_moves: Vec<String>) -> Self {
        Self {
            start,
            pre_moves,
            ..Self::default()
        }
    }

    /// 対局を保ったまま棋譜だけを初期化する。
    pub fn reset_moves(&mut self) {
        self.moves.clear();
        self.result = GameEndResult::ongoing();
    }

    pub fn append(&mut self, mv: MoveRecord) {
        self.moves.push(mv);
    }

    /// ナビゲーション用の巻き戻し。対局中は呼ばれない。
    pub fn truncate(&mut self, len: usize) {
        self.moves.truncate(len);
        if !self.moves.is_empty() || self.result.is_over() {
            self.result = GameEndResult::ongoing();
        }
    }

    /// 次に指される half-move 番号。
    pub fn next_ply(&self) -> u32 {
        (self.pre_moves.len() + self.moves.len()) as u32
    }

    /// 現局面を開始局面+手列から再構成する。
    pub fn shadow(&self) -> Result<ShadowPosition, PositionError> {
        let mut shadow = ShadowPosition::new(&self.start, &self.pre_moves)?;
        for mv in &self.moves {
            if mv.uci.is_empty() {
                break;
            }
            shadow.apply_token(&mv.uci)?;
        }
        Ok(shadow)
    }

    pub fn white_to_move(&self) -> bool {
        self.shadow().map(|s| s.white_to_move()).unwrap_or(true)
    }

    /// 開始局面で白番だったか。手の帰属 (どの手が白の手か) を決める。
    fn white_started(&self) -> bool {
        ShadowPosition::new(&self.start, &self.pre_moves)
            .map(|s| s.white_to_move())
            .unwrap_or(true)
    }

    /// 指定側がこれまでに消費した思考時間の合計 (ms)。
    pub fn elapsed_ms(&self, white: bool) -> u64 {
        let white_first = self.white_started();
        self.moves
            .iter()
            .enumerate()
            .filter(|(i, _)| (i % 2 == 0) == (white == white_first))
            .map(|(_, mv)| mv.elapsed_ms)
            .sum()
    }

    /// 指定側の消化手数。
    pub fn moves_by(&self, white: bool) -> u32 {
        let white_first = self.white_started();
        self.moves
            .iter()
            .enumerate()
            .filter(|(i, _)| (i % 2 == 0) == (white == white_first))
            .count() as u32
    }

    pub fn time_control_for(&self, white: bool) -> &TimeControl {
        if white { &self.white_tc } else { &self.black_tc }
    }

    /// 手番側の GoLimits を導出する。
    pub fn go_limits(&self) -> GoLimits {
        GoLimits::from_controls(
            &self.white_tc,
            &self.black_tc,
            self.elapsed_ms(true),
            self.elapsed_ms(false),
            self.moves_by(true),
            self.moves_by(false),
            self.white_to_move(),
        )
    }

    /// ルールのみで決まる終局結果。局面再構成に失敗した場合は継続扱い。
    pub fn rule_result(&self) -> GameEndResult {
        self.shadow()
            .map(|s| s.local_result())
            .unwrap_or_else(|_| GameEndResult::ongoing())
    }
}
