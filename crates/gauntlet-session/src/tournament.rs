use std::sync::{Arc, Mutex, MutexGuard};

use gauntlet_core::{
    GameEndCause, GameRecord, ReportLevel, Reporter, StartPosition, TimeControl, Topic,
};

/// 1対局分の割り当て。
#[derive(Clone, Debug)]
pub struct GameTask {
    pub white_tc: TimeControl,
    pub black_tc: TimeControl,
    pub start: StartPosition,
    /// 持ち時間ペアの添字。
    pub round: u32,
    pub game_in_round: u32,
    pub ordinal: u32,
}

/// 対局タスクの供給元。ワーカープールから並行に呼ばれる。
pub trait TaskProvider: Send + Sync {
    /// 次の対局を払い出す。もう無ければ None。
    fn next_task(&self) -> Option<GameTask>;

    /// 終局した棋譜を受け取る。1局につき一度だけ呼ばれる。
    fn set_game_record(&self, record: GameRecord);
}

/// 時間消費率の許容帯。手数 0 で 0-20%、320 手以上で 80-100% に
/// 達する5点の折れ線で、間は線形補間する。
const USAGE_BAND: [(u32, f64, f64); 5] = [
    (0, 0.0, 0.2),
    (80, 0.2, 0.4),
    (160, 0.4, 0.6),
    (240, 0.6, 0.8),
    (320, 0.8, 1.0),
];

fn usage_band(moves: u32) -> (f64, f64) {
    let last = USAGE_BAND[USAGE_BAND.len() - 1];
    if moves >= last.0 {
        return (last.1, last.2);
    }
    for pair in USAGE_BAND.windows(2) {
        let (m0, lo0, hi0) = pair[0];
        let (m1, lo1, hi1) = pair[1];
        if moves < m1 {
            let t = f64::from(moves - m0) / f64::from(m1 - m0);
            return (lo0 + (lo1 - lo0) * t, hi0 + (hi1 - hi0) * t);
        }
    }
    (last.1, last.2)
}

/// increment が重い持ち時間ほど帯を広げる。基本時間をどれだけ使うかの
/// ペナルティが increment で薄まるぶん、許容範囲も緩む。
fn widened_band(tc: &TimeControl, moves: u32) -> (f64, f64) {
    let (lo, hi) = usage_band(moves);
    let budget = tc.total_budget_ms(moves);
    if budget == 0 {
        return (lo, hi);
    }
    let inc_share = (tc.increment_ms.saturating_mul(u64::from(moves))) as f64 / budget as f64;
    (lo * (1.0 - inc_share), hi + (1.0 - hi) * inc_share)
}

struct TournamentState {
    counter: u32,
    finished: Vec<GameRecord>,
}

/// 時間消費ポリシーを検証するテスト大会。
///
/// 設定された N 個の持ち時間ペアへ対局をほぼ均等に割り当て、
/// 終局のたびにその場で検証する。
pub struct TestTournament {
    pairs: Vec<(TimeControl, TimeControl)>,
    openings: Vec<StartPosition>,
    total_games: u32,
    state: Mutex<TournamentState>,
    reporter: Arc<dyn Reporter>,
}

impl TestTournament {
    pub fn new(
        pairs: Vec<(TimeControl, TimeControl)>,
        total_games: u32,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            pairs,
            openings: Vec::new(),
            total_games,
            state: Mutex::new(TournamentState {
                counter: 0,
                finished: Vec::new(),
            }),
            reporter,
        }
    }

    /// 開始局面の一覧を設定する。対局順に循環して使われる。
    pub fn with_openings(mut self, openings: Vec<StartPosition>) -> Self {
        self.openings = openings;
        self
    }

    fn lock(&self) -> MutexGuard<'_, TournamentState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn finished_games(&self) -> Vec<GameRecord> {
        self.lock().finished.clone()
    }

    pub fn games_played(&self) -> u32 {
        self.lock().finished.len() as u32
    }

    /// 純粋な時間切れ負けが無いこと、および両者の時間消費率が
    /// 許容帯に収まることを検証する。I/O はせず同期的に終わる。
    fn validate(&self, record: &GameRecord) {
        self.reporter.log_report(
            Topic::NoTimeoutLoss,
            record.result.cause != GameEndCause::Timeout,
            &format!("game ended by {}", record.result.cause.label()),
            ReportLevel::Error,
        );
        for white in [true, false] {
            self.validate_time_usage(record, white);
        }
    }

    fn validate_time_usage(&self, record: &GameRecord, white: bool) {
        let tc = record.time_control_for(white);
        if !tc.has_wall_clock() {
            return;
        }
        let moves = record.moves_by(white);
        if moves == 0 {
            return;
        }
        let budget = tc.total_budget_ms(moves);
        let used = record.elapsed_ms(white);
        let fraction = used as f64 / budget as f64;
        let (lo, hi) = widened_band(tc, moves);
        let name = if white {
            &record.white_name
        } else {
            &record.black_name
        };
        self.reporter.log_report(
            Topic::TimeUsageInRange,
            fraction >= lo && fraction <= hi,
            &format!(
                "{name}: used {:.1}% of budget over {moves} moves (allowed {:.1}%-{:.1}%)",
                fraction * 100.0,
                lo * 100.0,
                hi * 100.0
            ),
            ReportLevel::Warning,
        );
    }
}

impl TaskProvider for TestTournament {
    fn next_task(&self) -> Option<GameTask> {
        if self.pairs.is_empty() {
            return None;
        }
        let mut state = self.lock();
        if state.counter >= self.total_games {
            return None;
        }
        let ordinal = state.counter;
        state.counter += 1;
        drop(state);

        // 各ペアに ⌈total/N⌉ 局ずつ、順番に割り当てる
        let per_pair = self.total_games.div_ceil(self.pairs.len() as u32);
        let pair_index = ((ordinal / per_pair) as usize).min(self.pairs.len() - 1);
        let (white_tc, black_tc) = self.pairs[pair_index];
        let start = if self.openings.is_empty() {
            StartPosition::Standard
        } else {
            self.openings[ordinal as usize % self.openings.len()].clone()
        };
        Some(GameTask {
            white_tc,
            black_tc,
            start,
            round: pair_index as u32,
            game_in_round: ordinal % per_pair,
            ordinal,
        })
    }

    fn set_game_record(&self, record: GameRecord) {
        self.validate(&record);
        self.lock().finished.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gauntlet_core::{GameEndResult, GameOutcome, MoveRecord, RecordingReporter};

    fn tc(base: u64, inc: u64) -> TimeControl {
        TimeControl::with_base(base, inc)
    }

    fn tournament(pairs: usize, total: u32) -> (TestTournament, Arc<RecordingReporter>) {
        let reporter = Arc::new(RecordingReporter::new());
        let pairs = (0..pairs)
            .map(|i| {
                let t = tc(10_000 * (i as u64 + 1), 100);
                (t, t)
            })
            .collect();
        (
            TestTournament::new(pairs, total, reporter.clone() as Arc<dyn Reporter>),
            reporter,
        )
    }

    #[test]
    fn tasks_are_spread_evenly_and_exhausted() {
        let (t, _) = tournament(3, 10);
        let mut per_pair = [0u32; 3];
        for _ in 0..10 {
            let task = t.next_task().unwrap();
            per_pair[task.round as usize] += 1;
        }
        assert!(t.next_task().is_none());
        // ⌈10/3⌉ = 4 なので 4-4-2
        assert_eq!(per_pair, [4, 4, 2]);
    }

    #[test]
    fn ordinals_are_unique_across_calls() {
        let (t, _) = tournament(2, 6);
        let mut seen: Vec<u32> = (0..6).map(|_| t.next_task().unwrap().ordinal).collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn band_interpolates_between_anchor_points() {
        assert_eq!(usage_band(0), (0.0, 0.2));
        assert_eq!(usage_band(320), (0.8, 1.0));
        assert_eq!(usage_band(400), (0.8, 1.0));
        let (lo, hi) = usage_band(40);
        assert!((lo - 0.1).abs() < 1e-9);
        assert!((hi - 0.3).abs() < 1e-9);
    }

    #[test]
    fn increment_heavy_controls_get_a_wider_band() {
        let lean = tc(60_000, 0);
        let heavy = tc(1_000, 1_000);
        let (lean_lo, lean_hi) = widened_band(&lean, 40);
        let (heavy_lo, heavy_hi) = widened_band(&heavy, 40);
        assert!(heavy_lo < lean_lo);
        assert!(heavy_hi > lean_hi);
        assert!(heavy_hi <= 1.0 + 1e-9);
    }

    #[test]
    fn timeout_loss_fails_validation() {
        let (t, reporter) = tournament(1, 1);
        let mut record = GameRecord::new();
        record.white_tc = tc(10_000, 100);
        record.black_tc = tc(10_000, 100);
        record.result = GameEndResult::new(GameOutcome::BlackWins, GameEndCause::Timeout);
        t.set_game_record(record);
        assert!(reporter.failed(Topic::NoTimeoutLoss));
        assert_eq!(t.games_played(), 1);
    }

    #[test]
    fn reasonable_time_usage_passes_validation() {
        let (t, reporter) = tournament(1, 1);
        let mut record = GameRecord::new();
        record.white_tc = tc(100_000, 0);
        record.black_tc = tc(100_000, 0);
        // 40手で予算の ~15% を消費: 手数 40 の帯 (10%-30%) に収まる
        for i in 0..80u32 {
            let mut mv = MoveRecord::begin(1, i);
            mv.uci = "0000".to_string();
            mv.elapsed_ms = 375;
            record.moves.push(mv);
        }
        record.result = GameEndResult::new(GameOutcome::Draw, GameEndCause::DrawRule);
        t.set_game_record(record);
        assert!(!reporter.failed(Topic::NoTimeoutLoss));
        assert!(!reporter.failed(Topic::TimeUsageInRange));
    }
}
