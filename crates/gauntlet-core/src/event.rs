use std::time::Instant;

use crate::search_info::SearchInfo;

/// エンジン I/O 側から通知されるイベント種別。
///
/// `SendingComputeMove` / `ComputeMoveSent` は状態遷移を伴わないマーカー。
/// 新しい go 送信と、直前の ponder 探索から遅れて届く info 行との競合を
/// 区別するために、実イベントと同じキューを必ず通す。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineEventKind {
    Disconnected,
    SendingComputeMove,
    ComputeMoveSent,
    BestMove,
    PonderMove,
    Info,
    NoData,
}

/// エンジンから届いた1イベント。
///
/// EngineLink が生成し、ComputeTask のイベントループがちょうど一度消費する。
#[derive(Clone, Debug)]
pub struct EngineEvent {
    pub kind: EngineEventKind,
    /// 単調増加の壁時計タイムスタンプ。
    pub at: Instant,
    pub engine_id: u64,
    pub move_token: Option<String>,
    pub ponder_token: Option<String>,
    pub info: Option<SearchInfo>,
    /// プロトコル違反の説明文。通常は空。
    pub errors: Vec<String>,
}

impl EngineEvent {
    pub fn new(kind: EngineEventKind, engine_id: u64) -> Self {
        Self {
            kind,
            at: Instant::now(),
            engine_id,
            move_token: None,
            ponder_token: None,
            info: None,
            errors: Vec::new(),
        }
    }

    pub fn best_move(engine_id: u64, token: String, ponder: Option<String>) -> Self {
        Self {
            move_token: Some(token),
            ponder_token: ponder,
            ..Self::new(EngineEventKind::BestMove, engine_id)
        }
    }

    pub fn ponder_move(engine_id: u64, token: String) -> Self {
        Self {
            move_token: Some(token),
            ..Self::new(EngineEventKind::PonderMove, engine_id)
        }
    }

    pub fn info(engine_id: u64, info: SearchInfo) -> Self {
        Self {
            info: Some(info),
            ..Self::new(EngineEventKind::Info, engine_id)
        }
    }

    pub fn disconnected(engine_id: u64, detail: String) -> Self {
        Self {
            errors: vec![detail],
            ..Self::new(EngineEventKind::Disconnected, engine_id)
        }
    }
}
