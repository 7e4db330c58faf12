use std::sync::Mutex;

use anyhow::{Result, bail};
use gauntlet_core::{
    GameEndResult, GameRecord, MoveRecord, PositionError, StartPosition, TimeControl,
};
use gauntlet_engine::EngineFactory;

use crate::seat::PlayerSeat;

/// getEngineRecords が返す席ごとの要約。
#[derive(Clone, Debug)]
pub struct EngineRecord {
    pub name: String,
    pub id: u64,
    pub memory_bytes: u64,
    pub white: bool,
}

/// 対局の正本 (GameRecord) と席を束ねる共有文脈。
///
/// レコードは内部ロックの下にあり、外からは `with_game_record` の
/// コールバック経由でしか読めない。呼び出し側が参照を持ち越せない
/// ことで、探索スレッドとの競合を構造的に防ぐ。
pub struct GameContext {
    record: Mutex<GameRecord>,
    seats: Vec<PlayerSeat>,
    /// 論理的な先後入れ替え。席の並びは変えない。
    switched: bool,
    sink_armed: bool,
}

impl Default for GameContext {
    fn default() -> Self {
        Self::new()
    }
}

impl GameContext {
    pub fn new() -> Self {
        Self {
            record: Mutex::new(GameRecord::new()),
            seats: Vec::new(),
            switched: false,
            sink_armed: false,
        }
    }

    pub fn seat_count(&self) -> usize {
        self.seats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }

    pub fn seats_mut(&mut self) -> &mut [PlayerSeat] {
        &mut self.seats
    }

    /// 席を差し替える。既存の席の探索は先に打ち切られている前提。
    pub fn set_seats(&mut self, seats: Vec<PlayerSeat>) {
        self.seats = seats;
        self.switched = false;
        self.sink_armed = false;
        self.assign_colors();
        self.refresh_names();
    }

    fn white_index(&self) -> usize {
        if self.seats.len() < 2 {
            0
        } else if self.switched {
            1
        } else {
            0
        }
    }

    fn assign_colors(&mut self) {
        if self.seats.len() < 2 {
            let white = self.with_game_record(|r| r.white_to_move());
            if let Some(seat) = self.seats.first_mut() {
                seat.set_white(white);
            }
            return;
        }
        let wi = self.white_index();
        for (i, seat) in self.seats.iter_mut().enumerate() {
            seat.set_white(i == wi);
        }
    }

    fn refresh_names(&mut self) {
        if self.seats.is_empty() {
            return;
        }
        let wi = self.white_index();
        let bi = if self.seats.len() < 2 { wi } else { 1 - wi };
        let white_name = self.seats[wi].engine_name();
        let black_name = self.seats[bi].engine_name();
        let mut record = self.lock_record();
        record.white_name = white_name;
        record.black_name = black_name;
    }

    pub fn white(&self) -> Option<&PlayerSeat> {
        self.seats.get(self.white_index())
    }

    pub fn black(&self) -> Option<&PlayerSeat> {
        let i = if self.seats.len() < 2 {
            0
        } else {
            1 - self.white_index()
        };
        self.seats.get(i)
    }

    /// 先後を論理的に入れ替える。進行中の探索は打ち切られる。
    pub fn swap_sides(&mut self) {
        self.cancel_all(false);
        self.switched = !self.switched;
        self.assign_colors();
        self.refresh_names();
    }

    pub fn seat_for_engine_mut(&mut self, engine_id: u64) -> Option<&mut PlayerSeat> {
        self.seats.iter_mut().find(|s| s.engine_id() == engine_id)
    }

    /// 手番側の席の添字。
    pub fn seat_to_move_index(&self) -> usize {
        if self.seats.len() < 2 {
            return 0;
        }
        let white_to_move = self.with_game_record(|r| r.white_to_move());
        if white_to_move {
            self.white_index()
        } else {
            1 - self.white_index()
        }
    }

    fn lock_record(&self) -> std::sync::MutexGuard<'_, GameRecord> {
        self.record.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// レコードへの唯一の読み口。ロックはコールバックの間だけ保持される。
    pub fn with_game_record<R>(&self, f: impl FnOnce(&GameRecord) -> R) -> R {
        f(&self.lock_record())
    }

    pub fn set_time_controls(&self, white_tc: TimeControl, black_tc: TimeControl) {
        let mut record = self.lock_record();
        record.white_tc = white_tc;
        record.black_tc = black_tc;
    }

    pub fn set_round(&self, round: u32, game_in_round: u32) {
        let mut record = self.lock_record();
        record.round = round;
        record.game_in_round = game_in_round;
    }

    /// 開始局面を差し替える。進行中の探索を打ち切ってから、
    /// 新しい局面を全席へ伝える。
    pub fn set_position(
        &mut self,
        start: StartPosition,
        pre_moves: Vec<String>,
    ) -> Result<(), PositionError> {
        self.cancel_all(false);
        let snapshot = {
            let mut record = self.lock_record();
            record.start = start;
            record.pre_moves = pre_moves;
            record.reset_moves();
            record.clone()
        };
        for seat in &mut self.seats {
            seat.set_position(&snapshot)?;
        }
        self.assign_colors();
        self.refresh_names();
        Ok(())
    }

    /// レコードを丸ごと差し替える。エンジン名だけは現在の席のものが優先。
    pub fn set_record(&mut self, record: GameRecord) -> Result<(), PositionError> {
        self.cancel_all(false);
        {
            let mut guard = self.lock_record();
            *guard = record;
        }
        let snapshot = self.lock_record().clone();
        for seat in &mut self.seats {
            seat.set_position(&snapshot)?;
        }
        self.assign_colors();
        self.refresh_names();
        Ok(())
    }

    /// 棋譜を空に戻して次の対局を始める。局面設定は保たれる。
    pub fn reset_for_new_game(&mut self) -> Result<(), PositionError> {
        self.cancel_all(false);
        let snapshot = {
            let mut record = self.lock_record();
            record.reset_moves();
            record.clone()
        };
        for seat in &mut self.seats {
            seat.set_position(&snapshot)?;
        }
        Ok(())
    }

    pub fn commit_move(&self, mv: MoveRecord) {
        self.lock_record().append(mv);
    }

    /// 確定した1手を全席のローカル局面へ反映する。
    /// ponder 中の席はここで Hit/Miss が決まる。
    pub fn apply_move(&mut self, uci: &str) -> Result<(), PositionError> {
        for seat in &mut self.seats {
            seat.do_move(uci)?;
        }
        Ok(())
    }

    /// 終局判定。席が検知した結果 (反則・時間切れ) を先に見て、
    /// どれも無ければルール上の結果に任せる。最初の非継続が勝つ。
    pub fn check_game_result(&mut self) -> GameEndResult {
        {
            let record = self.lock_record();
            if record.result.is_over() {
                return record.result;
            }
        }
        for seat in &self.seats {
            let local = seat.local_result();
            if local.is_over() {
                self.lock_record().result = local;
                return local;
            }
        }
        let by_rule = self.with_game_record(|r| r.rule_result());
        if by_rule.is_over() {
            self.lock_record().result = by_rule;
        }
        by_rule
    }

    pub fn sink_armed(&self) -> bool {
        self.sink_armed
    }

    pub fn set_sink_armed(&mut self, armed: bool) {
        self.sink_armed = armed;
    }

    /// 全席の生存確認。どこかの席が再起動されたら true を返すので、
    /// 呼び出し側はイベントの送り先を張り直すこと。
    pub fn check_for_timeouts_and_restart(&mut self, factory: &EngineFactory) -> Result<bool> {
        if !self.sink_armed {
            bail!("event sink is not configured");
        }
        let mut restarted = false;
        for seat in &mut self.seats {
            if seat.check_engine_timeout(factory)? {
                restarted = true;
            }
        }
        if restarted {
            self.sink_armed = false;
        }
        Ok(restarted)
    }

    pub fn cancel_all(&mut self, analyze: bool) {
        for seat in &mut self.seats {
            seat.cancel_compute(analyze);
        }
    }

    pub fn engine_records(&self) -> Vec<EngineRecord> {
        self.seats
            .iter()
            .map(|seat| EngineRecord {
                name: seat.engine_name(),
                id: seat.engine_id(),
                memory_bytes: seat.memory_usage(),
                white: seat.is_white(),
            })
            .collect()
    }
}
