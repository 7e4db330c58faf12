use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use gauntlet_core::{
    AppliedMove, EngineEvent, GameEndCause, GameEndResult, GameOutcome, GameRecord, GoLimits,
    MoveRecord, PositionError, ReportLevel, Reporter, ShadowPosition, Topic,
};
use gauntlet_engine::{EngineFactory, EngineLink};

/// move_time 制限の超過/未達に許す猶予 (ms)。
pub const MOVE_TIME_GRACE_MS: u64 = 100;

/// 応答遅延をエラー扱いにするまでの猶予 (ms)。予算超過そのものは
/// check_time が負けとして扱うので、ここは生存確認のためのマージン。
pub const TIMEOUT_GRACE_MS: u64 = 1_000;

/// 1席分の探索状態。
///
/// Pondering から Hit/Miss への分岐は遅延評価で、実際に相手の手が
/// `do_move` で届いた時点で予測手と比較して決まる。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComputeState {
    Idle,
    ComputingMove,
    Pondering,
    PonderHit,
    PonderMiss,
}

/// bestmove イベントの処理結果。
pub enum BestMoveOutcome {
    /// 古い応答 (キャンセル後や ponder stop の残骸)。破棄してよい。
    Ignored,
    /// 合法手として受理した。
    Played(MoveRecord),
    /// プロトコル違反。local_result に負けが記録済み。
    Violation(MoveRecord),
}

/// 片側1席。エンジン1本と検証用のローカル局面、探索状態機械を持つ。
///
/// GameRecord は所有せず、呼び出しの間だけ参照で読む。
pub struct PlayerSeat {
    link: Box<dyn EngineLink>,
    reporter: Arc<dyn Reporter>,
    shadow: ShadowPosition,
    /// 予測手を1手進めた局面。ponder 中の PV/currmove 検証に使う。
    ponder_shadow: Option<ShadowPosition>,
    state: ComputeState,
    white: bool,
    /// 正規化済みの予測手。
    ponder_move: Option<String>,
    /// 思考中に組み立てる1手分の記録。
    current: Option<MoveRecord>,
    started: Option<Instant>,
    active_limits: Option<GoLimits>,
    /// go 送信マーカー待ち。直前の探索から遅れて届いたイベントを
    /// 新しい思考フェーズに誤帰属させないための関門。
    awaiting_marker: bool,
    send_marked_at: Option<Instant>,
    local_result: GameEndResult,
}

impl PlayerSeat {
    pub fn new(link: Box<dyn EngineLink>, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            link,
            reporter,
            shadow: ShadowPosition::startpos(),
            ponder_shadow: None,
            state: ComputeState::Idle,
            white: true,
            ponder_move: None,
            current: None,
            started: None,
            active_limits: None,
            awaiting_marker: false,
            send_marked_at: None,
            local_result: GameEndResult::ongoing(),
        }
    }

    pub fn state(&self) -> ComputeState {
        self.state
    }

    pub fn is_white(&self) -> bool {
        self.white
    }

    pub fn set_white(&mut self, white: bool) {
        self.white = white;
    }

    pub fn engine_id(&self) -> u64 {
        self.link.id()
    }

    pub fn engine_name(&self) -> String {
        self.link.config().name.clone()
    }

    pub fn ponder_enabled(&self) -> bool {
        self.link.config().ponder
    }

    pub fn memory_usage(&self) -> u64 {
        self.link.engine_memory_usage()
    }

    pub fn link_mut(&mut self) -> &mut dyn EngineLink {
        self.link.as_mut()
    }

    pub fn local_result(&self) -> GameEndResult {
        self.local_result
    }

    /// 棋譜から局面を組み直し、探索状態を初期化する。
    pub fn set_position(&mut self, record: &GameRecord) -> Result<(), PositionError> {
        self.shadow = record.shadow()?;
        self.reset_search_state();
        self.local_result = GameEndResult::ongoing();
        Ok(())
    }

    fn reset_search_state(&mut self) {
        self.state = ComputeState::Idle;
        self.ponder_move = None;
        self.ponder_shadow = None;
        self.current = None;
        self.started = None;
        self.active_limits = None;
        self.awaiting_marker = false;
    }

    fn loss(&self, cause: GameEndCause) -> GameEndResult {
        GameEndResult::new(GameOutcome::loss_for(self.white), cause)
    }

    /// この席の思考を開始する。ponder の Hit/Miss はここで清算される。
    pub fn compute_move(&mut self, record: &GameRecord, limits: &GoLimits) -> Result<()> {
        match self.state {
            ComputeState::ComputingMove => Ok(()),
            ComputeState::PonderHit => {
                // 予測が当たったので探索を継続する。ponder 中に溜めた
                // 記録を引き継ぎ、時計はここから数え始める。
                if let Some(cur) = self.current.as_mut() {
                    cur.ply = record.next_ply();
                } else {
                    self.current = Some(MoveRecord::begin(self.link.id(), record.next_ply()));
                }
                self.ponder_move = None;
                self.ponder_shadow = None;
                self.state = ComputeState::ComputingMove;
                self.awaiting_marker = true;
                self.started = Some(Instant::now());
                self.active_limits = Some(*limits);
                self.link.compute_move(record, limits, true)
            }
            ComputeState::PonderMiss | ComputeState::Pondering => {
                self.resolve_ponder_miss();
                self.start_fresh(record, limits)
            }
            ComputeState::Idle => self.start_fresh(record, limits),
        }
    }

    fn start_fresh(&mut self, record: &GameRecord, limits: &GoLimits) -> Result<()> {
        self.current = Some(MoveRecord::begin(self.link.id(), record.next_ply()));
        self.state = ComputeState::ComputingMove;
        self.awaiting_marker = true;
        self.started = Some(Instant::now());
        self.active_limits = Some(*limits);
        self.link.compute_move(record, limits, false)
    }

    /// 外れた予測探索を止め、bestmove 応答を1往復待つ。
    fn resolve_ponder_miss(&mut self) {
        let answered = self.link.move_now(true, None);
        self.reporter.log_report(
            Topic::StopAnswered,
            answered,
            &format!("{}: stop after ponder miss", self.engine_name()),
            ReportLevel::Warning,
        );
        self.current = None;
        self.ponder_move = None;
        self.ponder_shadow = None;
        self.state = ComputeState::Idle;
    }

    /// 予測手で先読み探索を始める。予測手が指せない、または指すと
    /// 終局してしまう場合は何もせず Idle のまま false を返す。
    pub fn allow_ponder(
        &mut self,
        record: &GameRecord,
        limits: &GoLimits,
        predicted: &str,
    ) -> Result<bool> {
        if self.state != ComputeState::Idle {
            return Ok(false);
        }
        let mut probe = self.shadow.clone();
        let applied = match probe.apply_token(predicted) {
            Ok(applied) => applied,
            Err(e) => {
                log::debug!("{}: skip ponder, {e}", self.engine_name());
                return Ok(false);
            }
        };
        if probe.is_over() {
            return Ok(false);
        }
        self.ponder_move = Some(applied.uci);
        self.ponder_shadow = Some(probe);
        self.current = Some(MoveRecord::begin(self.link.id(), record.next_ply() + 1));
        self.state = ComputeState::Pondering;
        self.link.allow_ponder(record, limits, predicted)?;
        Ok(true)
    }

    /// 実際に指された手をこの席のローカル局面へ反映する。
    /// ponder 中なら予測手と比較して Hit/Miss を確定させる。
    pub fn do_move(&mut self, token: &str) -> Result<AppliedMove, PositionError> {
        let applied = self.shadow.apply_token(token)?;
        if self.state == ComputeState::Pondering {
            if self.ponder_move.as_deref() == Some(applied.uci.as_str()) {
                self.state = ComputeState::PonderHit;
            } else {
                self.state = ComputeState::PonderMiss;
            }
        }
        Ok(applied)
    }

    /// 進行中の探索を打ち切る。解析モードでは応答を待たない。
    pub fn cancel_compute(&mut self, analyze: bool) {
        if self.state != ComputeState::Idle {
            let _ = self.link.move_now(!analyze, None);
        }
        self.reset_search_state();
    }

    pub fn on_sending_compute_move(&mut self, event: &EngineEvent) {
        self.send_marked_at = Some(event.at);
    }

    pub fn on_compute_move_sent(&mut self) {
        self.awaiting_marker = false;
        if let Some(marked) = self.send_marked_at.take() {
            log::trace!(
                "{}: go delivered in {:?}",
                self.engine_name(),
                marked.elapsed()
            );
        }
    }

    /// bestmove 応答。検証・適用はせず clone 上で合法性だけ確かめ、
    /// 本体の局面進行は GameContext が `do_move` で一括して行う。
    pub fn on_best_move(&mut self, event: &EngineEvent) -> BestMoveOutcome {
        if self.state != ComputeState::ComputingMove || self.awaiting_marker {
            return BestMoveOutcome::Ignored;
        }
        let elapsed_ms = self
            .started
            .map(|s| event.at.saturating_duration_since(s).as_millis() as u64)
            .unwrap_or(0);
        let mut mv = self
            .current
            .take()
            .unwrap_or_else(|| MoveRecord::begin(self.link.id(), 0));
        mv.elapsed_ms = elapsed_ms;
        let limits = self.active_limits.take().unwrap_or_default();
        self.state = ComputeState::Idle;
        self.started = None;
        self.awaiting_marker = false;

        let name = self.engine_name();
        let token = event.move_token.as_deref().unwrap_or("");
        let mut probe = self.shadow.clone();
        let applied = match probe.apply_token(token) {
            Ok(applied) => applied,
            Err(e) => {
                self.reporter.log_report(
                    Topic::BestMoveValid,
                    false,
                    &format!("{name}: {e}"),
                    ReportLevel::Error,
                );
                self.local_result = self.loss(GameEndCause::IllegalMove);
                return BestMoveOutcome::Violation(mv);
            }
        };
        self.reporter.log_report(
            Topic::BestMoveValid,
            true,
            &format!("{name} played {}", applied.uci),
            ReportLevel::Info,
        );
        mv.token = token.to_string();
        mv.uci = applied.uci;
        mv.san = applied.san;
        mv.halfmove_clock = applied.halfmove_clock;

        if let Some(hint) = &event.ponder_token {
            match probe.probe_token(hint) {
                Ok(normalized) => {
                    mv.ponder_token = Some(normalized);
                }
                Err(e) => {
                    self.reporter.log_report(
                        Topic::PonderMoveValid,
                        false,
                        &format!("{name}: {e}"),
                        ReportLevel::Error,
                    );
                    self.local_result = self.loss(GameEndCause::IllegalMove);
                    return BestMoveOutcome::Violation(mv);
                }
            }
        }

        self.check_time(elapsed_ms, &limits, &mv);
        BestMoveOutcome::Played(mv)
    }

    /// 消費時間と探索量を予算と突き合わせる。壁時計超過のみ即負け、
    /// move_time/depth/nodes は報告のみで対局は続く。
    fn check_time(&mut self, elapsed_ms: u64, limits: &GoLimits, mv: &MoveRecord) {
        let name = self.engine_name();
        if limits.has_time_control {
            let budget = limits
                .remaining_for(self.white)
                .saturating_add(limits.increment_for(self.white));
            let passed = elapsed_ms <= budget;
            self.reporter.log_report(
                Topic::NoLossOnTime,
                passed,
                &format!("{name}: used {elapsed_ms}ms of {budget}ms"),
                ReportLevel::Error,
            );
            if !passed {
                self.local_result = self.loss(GameEndCause::Timeout);
            }
        }
        // underrun は制限が1種類だけのときにしか判定できない
        let single_limit = limits.limit_count() == 1;
        if let Some(mt) = limits.move_time_ms {
            self.reporter.log_report(
                Topic::MoveTimeOverrun,
                elapsed_ms <= mt.saturating_add(MOVE_TIME_GRACE_MS),
                &format!("{name}: {elapsed_ms}ms for movetime {mt}ms"),
                ReportLevel::Warning,
            );
            if single_limit {
                self.reporter.log_report(
                    Topic::MoveTimeUnderrun,
                    elapsed_ms.saturating_add(MOVE_TIME_GRACE_MS) >= mt,
                    &format!("{name}: {elapsed_ms}ms for movetime {mt}ms"),
                    ReportLevel::Warning,
                );
            }
        }
        if let (Some(cap), Some(reached)) = (limits.depth, mv.depth) {
            self.reporter.log_report(
                Topic::DepthOverrun,
                reached <= cap,
                &format!("{name}: depth {reached} for cap {cap}"),
                ReportLevel::Warning,
            );
            if single_limit {
                self.reporter.log_report(
                    Topic::DepthUnderrun,
                    reached >= cap,
                    &format!("{name}: depth {reached} for cap {cap}"),
                    ReportLevel::Warning,
                );
            }
        }
        if let (Some(cap), Some(reached)) = (limits.nodes, mv.nodes) {
            self.reporter.log_report(
                Topic::NodesOverrun,
                reached <= cap,
                &format!("{name}: {reached} nodes for cap {cap}"),
                ReportLevel::Warning,
            );
            if single_limit {
                self.reporter.log_report(
                    Topic::NodesUnderrun,
                    reached >= cap,
                    &format!("{name}: {reached} nodes for cap {cap}"),
                    ReportLevel::Warning,
                );
            }
        }
    }

    /// 独立イベントとして届いた予測手の検証。違反は負けに直結する。
    pub fn on_ponder_move(&mut self, event: &EngineEvent) {
        let Some(token) = event.move_token.as_deref() else {
            return;
        };
        match self.shadow.probe_token(token) {
            Ok(normalized) => {
                self.reporter.log_report(
                    Topic::PonderMoveValid,
                    true,
                    &format!("{}: ponder hint {normalized}", self.engine_name()),
                    ReportLevel::Info,
                );
            }
            Err(e) => {
                self.reporter.log_report(
                    Topic::PonderMoveValid,
                    false,
                    &format!("{}: {e}", self.engine_name()),
                    ReportLevel::Error,
                );
                if !self.local_result.is_over() {
                    self.local_result = self.loss(GameEndCause::IllegalMove);
                }
            }
        }
    }

    /// info 行の取り込み。PV 先頭手と currmove は局面に対して検証し、
    /// 不正なら違反として報告する (対局は続く)。
    pub fn on_info(&mut self, event: &EngineEvent) {
        let Some(info) = &event.info else {
            return;
        };
        let accept = match self.state {
            ComputeState::ComputingMove => !self.awaiting_marker,
            ComputeState::Pondering | ComputeState::PonderHit => true,
            _ => false,
        };
        if !accept {
            return;
        }
        let base = self.ponder_shadow.as_ref().unwrap_or(&self.shadow);
        if let Some(first) = info.pv.first()
            && let Err(e) = base.probe_token(first)
        {
            self.reporter.log_report(
                Topic::PvMoveValid,
                false,
                &format!("{}: {e}", self.engine_name()),
                ReportLevel::Warning,
            );
        }
        if let Some(currmove) = &info.currmove
            && let Err(e) = base.probe_token(currmove)
        {
            self.reporter.log_report(
                Topic::CurrMoveValid,
                false,
                &format!("{}: {e}", self.engine_name()),
                ReportLevel::Warning,
            );
        }
        if let Some(cur) = self.current.as_mut() {
            cur.absorb_info(info);
        }
    }

    pub fn on_disconnected(&mut self, event: &EngineEvent) {
        for detail in &event.errors {
            log::warn!("{}: {detail}", self.engine_name());
        }
        self.mark_disconnected();
    }

    pub fn mark_disconnected(&mut self) {
        if !self.local_result.is_over() {
            self.local_result = self.loss(GameEndCause::Disconnect);
        }
        self.reset_search_state();
    }

    /// 思考中エンジンの生存確認。予算+猶予を超えて無応答なら
    /// moveNow → requestReady → 再起動の順に段階を上げる。
    /// 再起動したら true (呼び出し側はイベントの送り先を張り直すこと)。
    pub fn check_engine_timeout(&mut self, factory: &EngineFactory) -> Result<bool> {
        if self.state != ComputeState::ComputingMove {
            return Ok(false);
        }
        let (Some(started), Some(limits)) = (self.started, self.active_limits) else {
            return Ok(false);
        };
        let Some(budget) = limits.hard_budget_ms(self.white) else {
            return Ok(false);
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if elapsed_ms <= budget.saturating_add(TIMEOUT_GRACE_MS) {
            return Ok(false);
        }
        let name = self.engine_name();
        log::warn!("{name}: no answer after {elapsed_ms}ms (budget {budget}ms)");
        if !self.link.failure() && self.link.move_now(true, None) {
            // 応答は来た。遅延の清算は bestmove 処理側の check_time が行う
            self.reporter.log_report(
                Topic::StopAnswered,
                true,
                &format!("{name}: answered stop after {elapsed_ms}ms"),
                ReportLevel::Warning,
            );
            return Ok(false);
        }
        self.reporter.log_report(
            Topic::StopAnswered,
            false,
            &format!("{name}: no bestmove after stop"),
            ReportLevel::Warning,
        );
        let ready = self.link.request_ready(None);
        self.reporter.log_report(
            Topic::ReadyAnswered,
            ready,
            &format!("{name}: readyok probe"),
            ReportLevel::Warning,
        );
        let cause = if ready {
            GameEndCause::Timeout
        } else {
            GameEndCause::Disconnect
        };
        if !self.local_result.is_over() {
            self.local_result = self.loss(cause);
        }
        self.reset_search_state();
        let restarted_ready = factory.restart(&mut self.link)?;
        self.reporter.log_report(
            Topic::EngineRestarted,
            restarted_ready,
            &format!("{name}: restarted after unresponsive search"),
            ReportLevel::Warning,
        );
        Ok(true)
    }

    #[cfg(test)]
    pub(crate) fn backdate_start(&mut self, by: std::time::Duration) {
        self.started = self.started.and_then(|s| s.checked_sub(by));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLink;
    use gauntlet_core::{RecordingReporter, TimeControl};
    use std::time::Duration;

    fn seat_with(link: MockLink) -> (PlayerSeat, Arc<RecordingReporter>) {
        let reporter = Arc::new(RecordingReporter::new());
        let seat = PlayerSeat::new(Box::new(link), reporter.clone() as Arc<dyn Reporter>);
        (seat, reporter)
    }

    fn timed_record(base_ms: u64, inc_ms: u64) -> GameRecord {
        let mut record = GameRecord::new();
        record.white_tc = TimeControl::with_base(base_ms, inc_ms);
        record.black_tc = TimeControl::with_base(base_ms, inc_ms);
        record
    }

    #[test]
    fn ponder_hit_continues_without_stop() {
        let link = MockLink::new(1, "white");
        let calls = link.calls.clone();
        let (mut seat, _) = seat_with(link);
        let record = timed_record(60_000, 0);
        let limits = record.go_limits();

        // 自分が e2e4 と指した後の局面から、相手の e7e5 を予測して先読み
        seat.compute_move(&record, &limits).unwrap();
        seat.on_compute_move_sent();
        let first = seat.on_best_move(&EngineEvent::best_move(1, "e2e4".to_string(), None));
        assert!(matches!(first, BestMoveOutcome::Played(_)));
        seat.do_move("e2e4").unwrap();
        assert!(seat.allow_ponder(&record, &limits, "e7e5").unwrap());
        assert_eq!(seat.state(), ComputeState::Pondering);

        seat.do_move("e7e5").unwrap();
        assert_eq!(seat.state(), ComputeState::PonderHit);

        seat.compute_move(&record, &limits).unwrap();
        let calls = calls.lock().unwrap();
        assert_eq!(calls.move_now, 0);
        assert_eq!(calls.compute, vec![false, true]);
    }

    #[test]
    fn ponder_miss_issues_exactly_one_stop_round_trip() {
        let link = MockLink::new(1, "white");
        let calls = link.calls.clone();
        let (mut seat, reporter) = seat_with(link);
        let record = timed_record(60_000, 0);
        let limits = record.go_limits();

        seat.compute_move(&record, &limits).unwrap();
        seat.on_compute_move_sent();
        let first = seat.on_best_move(&EngineEvent::best_move(1, "e2e4".to_string(), None));
        assert!(matches!(first, BestMoveOutcome::Played(_)));
        seat.do_move("e2e4").unwrap();
        assert!(seat.allow_ponder(&record, &limits, "e7e5").unwrap());
        seat.do_move("c7c5").unwrap();
        assert_eq!(seat.state(), ComputeState::PonderMiss);

        seat.compute_move(&record, &limits).unwrap();
        let calls = calls.lock().unwrap();
        assert_eq!(calls.move_now, 1);
        assert_eq!(calls.compute, vec![false, false]);
        assert!(!reporter.failed(Topic::StopAnswered));
    }

    #[test]
    fn illegal_ponder_prediction_is_skipped() {
        let link = MockLink::new(1, "white");
        let calls = link.calls.clone();
        let (mut seat, _) = seat_with(link);
        let record = GameRecord::new();
        let limits = record.go_limits();

        assert!(!seat.allow_ponder(&record, &limits, "e7e5").unwrap());
        assert_eq!(seat.state(), ComputeState::Idle);
        assert!(calls.lock().unwrap().ponder.is_empty());
    }

    #[test]
    fn unparseable_bestmove_loses_with_minimal_record() {
        let link = MockLink::new(1, "white");
        let (mut seat, reporter) = seat_with(link);
        let record = timed_record(60_000, 0);
        let limits = record.go_limits();

        seat.compute_move(&record, &limits).unwrap();
        seat.on_compute_move_sent();
        let outcome = seat.on_best_move(&EngineEvent::best_move(1, "xx99".to_string(), None));
        let BestMoveOutcome::Violation(mv) = outcome else {
            panic!("expected violation");
        };
        assert!(mv.token.is_empty());
        assert!(mv.uci.is_empty());
        assert!(reporter.failed(Topic::BestMoveValid));
        let result = seat.local_result();
        assert_eq!(result.cause, GameEndCause::IllegalMove);
        assert!(result.outcome.is_loss_for(true));
    }

    #[test]
    fn stale_bestmove_before_send_marker_is_ignored() {
        let link = MockLink::new(1, "white");
        let (mut seat, _) = seat_with(link);
        let record = timed_record(60_000, 0);
        let limits = record.go_limits();

        seat.compute_move(&record, &limits).unwrap();
        // マーカー処理前に届いた応答は前フェーズの残骸として捨てる
        let stale = EngineEvent::best_move(1, "e2e4".to_string(), None);
        assert!(matches!(seat.on_best_move(&stale), BestMoveOutcome::Ignored));
        assert_eq!(seat.state(), ComputeState::ComputingMove);

        seat.on_compute_move_sent();
        let real = EngineEvent::best_move(1, "e2e4".to_string(), None);
        assert!(matches!(seat.on_best_move(&real), BestMoveOutcome::Played(_)));
    }

    #[test]
    fn wall_clock_overrun_is_a_timeout_loss() {
        let link = MockLink::new(1, "white");
        let (mut seat, reporter) = seat_with(link);
        let record = timed_record(1_000, 500);
        let limits = record.go_limits();

        seat.compute_move(&record, &limits).unwrap();
        seat.on_compute_move_sent();
        seat.backdate_start(Duration::from_millis(1_700));
        let outcome = seat.on_best_move(&EngineEvent::best_move(1, "e2e4".to_string(), None));
        assert!(matches!(outcome, BestMoveOutcome::Played(_)));
        // 1000 + 500 の予算に対して 1700ms 使った
        assert!(reporter.failed(Topic::NoLossOnTime));
        let result = seat.local_result();
        assert_eq!(result.cause, GameEndCause::Timeout);
        assert!(result.outcome.is_loss_for(true));
    }

    #[test]
    fn move_time_grace_tolerates_small_overruns() {
        let link = MockLink::new(1, "white");
        let (mut seat, reporter) = seat_with(link);
        let mut record = GameRecord::new();
        record.white_tc = TimeControl::with_move_time(1_000);
        record.black_tc = TimeControl::with_move_time(1_000);
        let limits = record.go_limits();

        seat.compute_move(&record, &limits).unwrap();
        seat.on_compute_move_sent();
        seat.backdate_start(Duration::from_millis(1_050));
        let outcome = seat.on_best_move(&EngineEvent::best_move(1, "e2e4".to_string(), None));
        assert!(matches!(outcome, BestMoveOutcome::Played(_)));
        assert!(!reporter.failed(Topic::MoveTimeOverrun));
        assert!(!reporter.failed(Topic::MoveTimeUnderrun));
        assert!(!seat.local_result().is_over());
    }

    #[test]
    fn underrun_not_checked_with_multiple_limits() {
        let link = MockLink::new(1, "white");
        let (mut seat, reporter) = seat_with(link);
        let mut record = GameRecord::new();
        record.white_tc = TimeControl {
            move_time_ms: Some(5_000),
            depth: Some(4),
            ..TimeControl::default()
        };
        record.black_tc = record.white_tc;
        let limits = record.go_limits();
        assert_eq!(limits.limit_count(), 2);

        seat.compute_move(&record, &limits).unwrap();
        seat.on_compute_move_sent();
        // depth 制限で即答しても movetime の underrun は報告されない
        let outcome = seat.on_best_move(&EngineEvent::best_move(1, "e2e4".to_string(), None));
        assert!(matches!(outcome, BestMoveOutcome::Played(_)));
        assert_eq!(reporter.count(Topic::MoveTimeUnderrun), 0);
        assert_eq!(reporter.count(Topic::DepthUnderrun), 0);
    }

    #[test]
    fn unresponsive_search_escalates_to_a_restart() {
        let mut link = MockLink::new(7, "white");
        link.answer_move_now = false;
        let calls = link.calls.clone();
        let (mut seat, reporter) = seat_with(link);
        let record = timed_record(1_000, 0);
        let limits = record.go_limits();

        seat.compute_move(&record, &limits).unwrap();
        // 予算 1000ms + 猶予 1000ms を超えて無応答
        seat.backdate_start(Duration::from_millis(2_500));
        let factory = EngineFactory::with_creator(Box::new(|cfg, id, _| {
            Ok((
                Box::new(MockLink::new(id, &cfg.name)) as Box<dyn EngineLink>,
                true,
            ))
        }));
        assert!(seat.check_engine_timeout(&factory).unwrap());

        // stop には応答しなかったが readyok は返ったので時間切れ負け
        assert!(reporter.failed(Topic::StopAnswered));
        assert!(!reporter.failed(Topic::ReadyAnswered));
        assert!(!reporter.failed(Topic::EngineRestarted));
        let result = seat.local_result();
        assert_eq!(result.cause, GameEndCause::Timeout);
        assert!(result.outcome.is_loss_for(true));
        // 差し替え後はファクトリが払い出した新しい ID になる
        assert_eq!(seat.state(), ComputeState::Idle);
        assert_eq!(seat.engine_id(), 1);
        let calls = calls.lock().unwrap();
        assert_eq!(calls.move_now, 1);
        assert_eq!(calls.ready, 1);
    }

    #[test]
    fn unanswered_ready_probe_is_a_disconnect_loss() {
        let mut link = MockLink::new(7, "white");
        link.answer_move_now = false;
        link.broken = true;
        let (mut seat, reporter) = seat_with(link);
        let record = timed_record(1_000, 0);
        let limits = record.go_limits();

        seat.compute_move(&record, &limits).unwrap();
        seat.backdate_start(Duration::from_millis(2_500));
        let factory = EngineFactory::with_creator(Box::new(|cfg, id, _| {
            Ok((
                Box::new(MockLink::new(id, &cfg.name)) as Box<dyn EngineLink>,
                true,
            ))
        }));
        assert!(seat.check_engine_timeout(&factory).unwrap());
        assert!(reporter.failed(Topic::ReadyAnswered));
        let result = seat.local_result();
        assert_eq!(result.cause, GameEndCause::Disconnect);
        assert!(result.outcome.is_loss_for(true));
    }

    #[test]
    fn late_ponder_info_is_dropped_at_the_marker_boundary() {
        let link = MockLink::new(1, "white");
        let (mut seat, _) = seat_with(link);
        let record = timed_record(60_000, 0);
        let limits = record.go_limits();

        seat.compute_move(&record, &limits).unwrap();
        let mut info = gauntlet_core::SearchInfo::default();
        info.depth = Some(9);
        seat.on_info(&EngineEvent::info(1, info));
        seat.on_compute_move_sent();
        let outcome = seat.on_best_move(&EngineEvent::best_move(1, "e2e4".to_string(), None));
        let BestMoveOutcome::Played(mv) = outcome else {
            panic!("expected played");
        };
        assert_eq!(mv.depth, None);
    }
}
