use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use gauntlet_core::{
    EngineEvent, EngineEventKind, GameRecord, GoLimits, MoveRecord, Reporter, StartPosition,
    TimeControl,
};
use gauntlet_engine::{EngineFactory, EngineLink};

use crate::context::{EngineRecord, GameContext};
use crate::seat::{BestMoveOutcome, PlayerSeat};

/// イベントが無くても生存確認のために起きる間隔。
const LIVENESS_INTERVAL: Duration = Duration::from_secs(1);

/// 実行中のセッション種別。再入ガードの鍵になる。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TaskType {
    #[default]
    None,
    ComputeMove,
    Analyze,
    AutoPlay,
    Ponder,
}

struct TaskShared {
    context: Mutex<GameContext>,
    task_type: Mutex<TaskType>,
    finished: Mutex<bool>,
    finished_cv: Condvar,
    tx: Sender<EngineEvent>,
    rx: Receiver<EngineEvent>,
    factory: Arc<EngineFactory>,
    reporter: Arc<dyn Reporter>,
    log_moves: AtomicBool,
    shutdown: AtomicBool,
}

/// 1セッションの司令塔。GameContext を1つ所有し、エンジンイベントを
/// 単一の消費スレッドへ直列化する。盤面の書き換えは常にそのスレッド
/// (と、ロックを取った API 呼び出し) からしか起きない。
pub struct ComputeTask {
    shared: Arc<TaskShared>,
    consumer: Option<JoinHandle<()>>,
}

impl ComputeTask {
    pub fn new(reporter: Arc<dyn Reporter>) -> Self {
        Self::with_factory(reporter, Arc::new(EngineFactory::new()))
    }

    /// 識別子の払い出し元を共有したいとき (同一プロセスで複数セッション
    /// を回すプールなど) はこちらで組み立てる。
    pub fn with_factory(reporter: Arc<dyn Reporter>, factory: Arc<EngineFactory>) -> Self {
        let (tx, rx) = unbounded();
        let shared = Arc::new(TaskShared {
            context: Mutex::new(GameContext::new()),
            task_type: Mutex::new(TaskType::None),
            finished: Mutex::new(true),
            finished_cv: Condvar::new(),
            tx,
            rx,
            factory,
            reporter,
            log_moves: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        });
        let consumer_shared = shared.clone();
        let consumer = std::thread::spawn(move || Self::consume(&consumer_shared));
        Self {
            shared,
            consumer: Some(consumer),
        }
    }

    fn lock_context(shared: &TaskShared) -> MutexGuard<'_, GameContext> {
        shared.context.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn current_type(shared: &TaskShared) -> TaskType {
        *shared.task_type.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_type(shared: &TaskShared, t: TaskType) {
        *shared.task_type.lock().unwrap_or_else(|e| e.into_inner()) = t;
    }

    /// エンジンを席として取り付け、イベントの送り先を張る。
    pub fn init_engines(&self, links: Vec<Box<dyn EngineLink>>) {
        let mut ctx = Self::lock_context(&self.shared);
        ctx.cancel_all(false);
        let seats = links
            .into_iter()
            .map(|link| PlayerSeat::new(link, self.shared.reporter.clone()))
            .collect();
        ctx.set_seats(seats);
        Self::arm_sinks(&self.shared, &mut ctx);
    }

    fn arm_sinks(shared: &TaskShared, ctx: &mut GameContext) {
        for seat in ctx.seats_mut() {
            let tx = shared.tx.clone();
            seat.link_mut().set_event_sink(Box::new(move |event| {
                let _ = tx.send(event);
            }));
        }
        ctx.set_sink_armed(true);
    }

    pub fn set_position(&self, start: StartPosition, pre_moves: Vec<String>) -> Result<()> {
        let mut ctx = Self::lock_context(&self.shared);
        ctx.set_position(start, pre_moves)?;
        Ok(())
    }

    pub fn set_record(&self, record: GameRecord) -> Result<()> {
        let mut ctx = Self::lock_context(&self.shared);
        ctx.set_record(record)?;
        Ok(())
    }

    pub fn set_time_controls(&self, white_tc: TimeControl, black_tc: TimeControl) {
        Self::lock_context(&self.shared).set_time_controls(white_tc, black_tc);
    }

    /// 次の対局の準備。棋譜を空に戻し、各エンジンへ newgame を伝える。
    pub fn new_game(&self) -> Result<()> {
        let mut ctx = Self::lock_context(&self.shared);
        ctx.reset_for_new_game()?;
        for seat in ctx.seats_mut() {
            if let Err(e) = seat.link_mut().new_game() {
                log::warn!("{}: {e}", seat.engine_name());
            }
        }
        Ok(())
    }

    /// 実行開始の共通ガード。席が無い・対局が終わっている・別種の
    /// セッションが走っている、のいずれかなら受け付けない。
    fn begin(&self, t: TaskType) -> bool {
        {
            let ctx = Self::lock_context(&self.shared);
            if ctx.is_empty() {
                return false;
            }
            if ctx.with_game_record(|r| r.result.is_over()) {
                return false;
            }
        }
        let mut task_type = self.shared.task_type.lock().unwrap_or_else(|e| e.into_inner());
        let mut finished = self.shared.finished.lock().unwrap_or_else(|e| e.into_inner());
        if !*finished {
            return false;
        }
        if *task_type != TaskType::None && *task_type != t {
            return false;
        }
        *task_type = t;
        *finished = false;
        true
    }

    /// 手番側に1手だけ思考させる。完了シグナルは bestmove 処理で立つ。
    pub fn compute_move(&self) {
        if !self.begin(TaskType::ComputeMove) {
            return;
        }
        let mut ctx = Self::lock_context(&self.shared);
        Self::request_compute(&self.shared, &mut ctx);
    }

    /// 無制限解析。イベントループは解析中、定期起床せずに待つ。
    pub fn analyze(&self) {
        if !self.begin(TaskType::Analyze) {
            return;
        }
        let mut ctx = Self::lock_context(&self.shared);
        let record = ctx.with_game_record(|r| r.clone());
        let limits = GoLimits::infinite();
        let idx = ctx.seat_to_move_index();
        let seat = &mut ctx.seats_mut()[idx];
        if let Err(e) = seat.compute_move(&record, &limits) {
            log::error!("{}: {e}", seat.engine_name());
            seat.mark_disconnected();
            ctx.check_game_result();
            Self::finish(&self.shared, &mut ctx);
        }
    }

    /// 両席で自動対局する。終局まで走り、完了シグナルで終わる。
    pub fn auto_play(&self, log_moves: bool) {
        if !self.begin(TaskType::AutoPlay) {
            return;
        }
        self.shared.log_moves.store(log_moves, Ordering::Relaxed);
        let mut ctx = Self::lock_context(&self.shared);
        Self::request_compute(&self.shared, &mut ctx);
    }

    /// 外部から1手を入力する。ponder 継続モードならエンジンの応答
    /// 思考をそのまま始める。
    pub fn play_move(&self, token: &str) -> Result<()> {
        let mut ctx = Self::lock_context(&self.shared);
        let record = ctx.with_game_record(|r| r.clone());
        if record.result.is_over() {
            bail!("game is already over");
        }
        let mut shadow = record.shadow()?;
        let applied = shadow.apply_token(token)?;
        let mut mv = MoveRecord::begin(0, record.next_ply());
        mv.token = token.to_string();
        mv.uci = applied.uci;
        mv.san = applied.san;
        mv.halfmove_clock = applied.halfmove_clock;
        let uci = mv.uci.clone();
        ctx.commit_move(mv);
        ctx.apply_move(&uci)?;
        if ctx.check_game_result().is_over() {
            Self::finish(&self.shared, &mut ctx);
            return Ok(());
        }
        if Self::current_type(&self.shared) == TaskType::Ponder {
            *self.shared.finished.lock().unwrap_or_else(|e| e.into_inner()) = false;
            Self::request_compute(&self.shared, &mut ctx);
        }
        Ok(())
    }

    /// 思考中のエンジンに即時回答を促す。応答は通常のイベントで届く。
    pub fn move_now(&self) {
        let mut ctx = Self::lock_context(&self.shared);
        for seat in ctx.seats_mut() {
            if seat.state() == crate::seat::ComputeState::ComputingMove {
                seat.link_mut().move_now(false, None);
            }
        }
    }

    /// 現在のセッションを打ち切る。どの状態から呼んでも安全。
    pub fn stop(&self) {
        let analyze = Self::current_type(&self.shared) == TaskType::Analyze;
        let mut ctx = Self::lock_context(&self.shared);
        ctx.cancel_all(analyze);
        while self.shared.rx.try_recv().is_ok() {}
        Self::finish(&self.shared, &mut ctx);
        // 解析中はイベント待ちで眠っているので起こす
        let _ = self.shared.tx.send(EngineEvent::new(EngineEventKind::NoData, 0));
    }

    pub fn task_type(&self) -> TaskType {
        Self::current_type(&self.shared)
    }

    pub fn is_finished(&self) -> bool {
        *self.shared.finished.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 完了シグナルを待つ。時間内に立てば true。
    pub fn wait_finished(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut finished = self.shared.finished.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if *finished {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .shared
                .finished_cv
                .wait_timeout(finished, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            finished = guard;
        }
    }

    pub fn with_game_record<R>(&self, f: impl FnOnce(&GameRecord) -> R) -> R {
        Self::lock_context(&self.shared).with_game_record(f)
    }

    pub fn engine_records(&self) -> Vec<EngineRecord> {
        Self::lock_context(&self.shared).engine_records()
    }

    fn signal_finished(shared: &TaskShared) {
        *shared.finished.lock().unwrap_or_else(|e| e.into_inner()) = true;
        shared.finished_cv.notify_all();
    }

    fn finish(shared: &TaskShared, ctx: &mut GameContext) {
        ctx.cancel_all(false);
        Self::set_type(shared, TaskType::None);
        Self::signal_finished(shared);
    }

    /// 手番側の思考を開始する。
    fn request_compute(shared: &TaskShared, ctx: &mut GameContext) {
        let record = ctx.with_game_record(|r| r.clone());
        let limits = record.go_limits();
        let idx = ctx.seat_to_move_index();
        let seat = &mut ctx.seats_mut()[idx];
        if let Err(e) = seat.compute_move(&record, &limits) {
            log::error!("{}: {e}", seat.engine_name());
            seat.mark_disconnected();
            ctx.check_game_result();
            Self::finish(shared, ctx);
        }
    }

    fn consume(shared: &TaskShared) {
        loop {
            if shared.shutdown.load(Ordering::Relaxed) {
                break;
            }
            let event = if Self::current_type(shared) == TaskType::Analyze {
                match shared.rx.recv() {
                    Ok(event) => Some(event),
                    Err(_) => break,
                }
            } else {
                match shared.rx.recv_timeout(LIVENESS_INTERVAL) {
                    Ok(event) => Some(event),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            };
            if shared.shutdown.load(Ordering::Relaxed) {
                break;
            }
            match event {
                Some(event) => {
                    Self::process_event(shared, event);
                    // 起きている間に溜まったぶんは到着順に一気に処理する
                    while let Ok(event) = shared.rx.try_recv() {
                        Self::process_event(shared, event);
                    }
                }
                None => Self::liveness_check(shared),
            }
        }
    }

    fn liveness_check(shared: &TaskShared) {
        let mut ctx = Self::lock_context(shared);
        if !ctx.sink_armed() {
            return;
        }
        match ctx.check_for_timeouts_and_restart(&shared.factory) {
            Ok(true) => {
                Self::arm_sinks(shared, &mut ctx);
                if ctx.check_game_result().is_over() {
                    Self::finish(shared, &mut ctx);
                }
            }
            Ok(false) => {}
            Err(e) => {
                // 再起動に失敗しても、席が記録した負けはもう確定している。
                // ここで終局を確定させないと対局が宙吊りになる
                log::error!("liveness check failed: {e}");
                if ctx.check_game_result().is_over() {
                    Self::finish(shared, &mut ctx);
                }
            }
        }
    }

    fn process_event(shared: &TaskShared, event: EngineEvent) {
        let mut ctx = Self::lock_context(shared);
        match event.kind {
            EngineEventKind::NoData => {}
            EngineEventKind::SendingComputeMove => {
                if let Some(seat) = ctx.seat_for_engine_mut(event.engine_id) {
                    seat.on_sending_compute_move(&event);
                }
            }
            EngineEventKind::ComputeMoveSent => {
                if let Some(seat) = ctx.seat_for_engine_mut(event.engine_id) {
                    seat.on_compute_move_sent();
                }
            }
            EngineEventKind::Info => {
                if let Some(seat) = ctx.seat_for_engine_mut(event.engine_id) {
                    seat.on_info(&event);
                }
            }
            EngineEventKind::PonderMove => {
                if let Some(seat) = ctx.seat_for_engine_mut(event.engine_id) {
                    seat.on_ponder_move(&event);
                }
                if !*shared.finished.lock().unwrap_or_else(|e| e.into_inner())
                    && ctx.check_game_result().is_over()
                {
                    Self::finish(shared, &mut ctx);
                }
            }
            EngineEventKind::Disconnected => {
                if let Some(seat) = ctx.seat_for_engine_mut(event.engine_id) {
                    seat.on_disconnected(&event);
                }
                if !*shared.finished.lock().unwrap_or_else(|e| e.into_inner())
                    && ctx.check_game_result().is_over()
                {
                    Self::finish(shared, &mut ctx);
                }
            }
            EngineEventKind::BestMove => Self::handle_best_move(shared, &mut ctx, event),
        }
    }

    fn handle_best_move(shared: &TaskShared, ctx: &mut GameContext, event: EngineEvent) {
        let task_type = Self::current_type(shared);
        let Some(seat) = ctx.seat_for_engine_mut(event.engine_id) else {
            return;
        };
        match seat.on_best_move(&event) {
            BestMoveOutcome::Ignored => {}
            BestMoveOutcome::Violation(mv) => {
                ctx.commit_move(mv);
                ctx.check_game_result();
                Self::finish(shared, ctx);
            }
            BestMoveOutcome::Played(mv) => {
                let uci = mv.uci.clone();
                let san = mv.san.clone();
                let ply = mv.ply;
                let ponder_hint = mv.ponder_token.clone();
                let mover_id = event.engine_id;
                ctx.commit_move(mv);
                if shared.log_moves.load(Ordering::Relaxed) {
                    log::info!("ply {ply}: {san} ({uci})");
                }
                if let Err(e) = ctx.apply_move(&uci) {
                    // ローカル局面が正本とずれた。続行できないので打ち切る
                    log::error!("shadow position diverged on {uci}: {e}");
                    Self::finish(shared, ctx);
                    return;
                }
                if ctx.check_game_result().is_over() {
                    Self::finish(shared, ctx);
                    return;
                }
                match task_type {
                    TaskType::AutoPlay => {
                        Self::start_ponder(ctx, mover_id, ponder_hint);
                        Self::request_compute(shared, ctx);
                    }
                    TaskType::ComputeMove | TaskType::Ponder => {
                        // 1手完了。予測手があれば先読みに移って次の入力を待つ
                        let pondering = Self::start_ponder(ctx, mover_id, ponder_hint);
                        Self::set_type(
                            shared,
                            if pondering { TaskType::Ponder } else { TaskType::None },
                        );
                        Self::signal_finished(shared);
                    }
                    TaskType::Analyze | TaskType::None => {}
                }
            }
        }
    }

    /// 指した側に予測手で先読みさせる。開始できたら true。
    fn start_ponder(ctx: &mut GameContext, mover_id: u64, hint: Option<String>) -> bool {
        let Some(hint) = hint else {
            return false;
        };
        let record = ctx.with_game_record(|r| r.clone());
        let limits = record.go_limits();
        let Some(seat) = ctx.seat_for_engine_mut(mover_id) else {
            return false;
        };
        if !seat.ponder_enabled() {
            return false;
        }
        match seat.allow_ponder(&record, &limits, &hint) {
            Ok(started) => started,
            Err(e) => {
                log::warn!("{}: {e}", seat.engine_name());
                false
            }
        }
    }
}

impl Drop for ComputeTask {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
        let _ = self.shared.tx.send(EngineEvent::new(EngineEventKind::NoData, 0));
        if let Some(handle) = self.consumer.take() {
            let _ = handle.join();
        }
    }
}
