use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use gauntlet_core::{
    GameEndCause, GameEndResult, GameOutcome, GameRecord, ReportLevel, Reporter, Topic,
};
use gauntlet_engine::{EngineConfig, EngineFactory, EngineLink};

use crate::task::ComputeTask;
use crate::tournament::{GameTask, TaskProvider};

/// 終局待ちの上限に対局時間へ上乗せする余裕。
const GAME_DEADLINE_MARGIN: Duration = Duration::from_secs(60);

/// 設定を受け取ってエンジン1本を用意する口。テストでは差し替える。
pub type LinkSpawner =
    dyn Fn(&EngineConfig) -> Result<(Box<dyn EngineLink>, bool)> + Send + Sync;

pub struct PoolConfig {
    pub white: EngineConfig,
    pub black: EngineConfig,
    pub concurrency: usize,
    pub log_moves: bool,
    /// 奇数番の対局で先後の担当を入れ替える。
    pub alternate_colors: bool,
}

/// タスク供給元から対局を引き出して回すワーカープール。
///
/// 各ワーカーは next_task → 対局 → set_game_record を繰り返し、
/// 供給が尽きるか停止フラグが立つまで走る。
pub struct GameManagerPool {
    config: PoolConfig,
    provider: Arc<dyn TaskProvider>,
    reporter: Arc<dyn Reporter>,
    shutdown: Arc<AtomicBool>,
    /// プロセス識別子の払い出し元。セッションの再起動とも共有する。
    factory: Arc<EngineFactory>,
    spawner: Box<LinkSpawner>,
}

impl GameManagerPool {
    pub fn new(
        config: PoolConfig,
        provider: Arc<dyn TaskProvider>,
        reporter: Arc<dyn Reporter>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let factory = Arc::new(EngineFactory::new());
        let spawn_factory = factory.clone();
        let spawner = Box::new(move |cfg: &EngineConfig| {
            let started = spawn_factory.create_engine(cfg)?;
            Ok((started.link, started.ready))
        });
        let mut pool = Self::with_spawner(config, provider, reporter, shutdown, spawner);
        pool.factory = factory;
        pool
    }

    pub fn with_spawner(
        config: PoolConfig,
        provider: Arc<dyn TaskProvider>,
        reporter: Arc<dyn Reporter>,
        shutdown: Arc<AtomicBool>,
        spawner: Box<LinkSpawner>,
    ) -> Self {
        Self {
            config,
            provider,
            reporter,
            shutdown,
            factory: Arc::new(EngineFactory::new()),
            spawner,
        }
    }

    /// 供給が尽きるまで全ワーカーで回す。呼び出しはブロックする。
    pub fn run(&self) {
        let workers = self.config.concurrency.max(1);
        std::thread::scope(|scope| {
            for worker in 0..workers {
                scope.spawn(move || self.worker_loop(worker));
            }
        });
    }

    fn worker_loop(&self, worker: usize) {
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                log::info!("worker {worker}: shutdown requested");
                break;
            }
            let Some(task) = self.provider.next_task() else {
                break;
            };
            log::info!(
                "worker {worker}: game {} (round {}, game {})",
                task.ordinal,
                task.round,
                task.game_in_round
            );
            let record = self.play_game(&task);
            self.provider.set_game_record(record);
        }
    }

    fn spawn_checked(&self, cfg: &EngineConfig) -> Option<Box<dyn EngineLink>> {
        match (self.spawner)(cfg) {
            Ok((link, ready)) => {
                self.reporter.log_report(
                    Topic::EngineStarted,
                    ready,
                    &format!("{} (id {})", cfg.name, link.id()),
                    ReportLevel::Error,
                );
                if ready { Some(link) } else { None }
            }
            Err(e) => {
                self.reporter.log_report(
                    Topic::EngineStarted,
                    false,
                    &format!("{}: {e}", cfg.name),
                    ReportLevel::Error,
                );
                None
            }
        }
    }

    fn play_game(&self, task: &GameTask) -> GameRecord {
        let swap = self.config.alternate_colors && task.ordinal % 2 == 1;
        let (white_cfg, black_cfg) = if swap {
            (&self.config.black, &self.config.white)
        } else {
            (&self.config.white, &self.config.black)
        };
        let mut record = GameRecord::from_start(task.start.clone(), Vec::new());
        record.white_tc = task.white_tc;
        record.black_tc = task.black_tc;
        record.round = task.round;
        record.game_in_round = task.game_in_round;
        record.white_name = white_cfg.name.clone();
        record.black_name = black_cfg.name.clone();

        let white = self.spawn_checked(white_cfg);
        let black = self.spawn_checked(black_cfg);
        let (white, black) = match (white, black) {
            (Some(w), Some(b)) => (w, b),
            (white, _) => {
                // 起動に失敗した側の負けとして記録を返す
                let white_failed = white.is_none();
                record.result = GameEndResult::new(
                    GameOutcome::loss_for(white_failed),
                    GameEndCause::Disconnect,
                );
                return record;
            }
        };

        let session = ComputeTask::with_factory(self.reporter.clone(), self.factory.clone());
        session.init_engines(vec![white, black]);
        if let Err(e) = session.set_record(record.clone()) {
            log::error!("failed to set up game {}: {e}", task.ordinal);
            record.result = GameEndResult::new(GameOutcome::Ongoing, GameEndCause::Stopped);
            return record;
        }
        if let Err(e) = session.new_game() {
            log::warn!("game {}: {e}", task.ordinal);
        }
        session.auto_play(self.config.log_moves);
        if !session.wait_finished(Self::game_deadline(task)) {
            log::error!("game {} did not finish in time, stopping", task.ordinal);
            session.stop();
        }
        let mut finished = session.with_game_record(|r| r.clone());
        if !finished.result.is_over() {
            finished.result = GameEndResult::new(GameOutcome::Ongoing, GameEndCause::Stopped);
        }
        finished
    }

    /// 両者が持ち時間を使い切ってもまだ余裕のある待ち時間上限。
    fn game_deadline(task: &GameTask) -> Duration {
        let per_side = |tc: &gauntlet_core::TimeControl| {
            tc.total_budget_ms(320)
                .max(tc.move_time_ms.unwrap_or(0).saturating_mul(320))
        };
        let budget_ms = per_side(&task.white_tc).saturating_add(per_side(&task.black_tc));
        Duration::from_millis(budget_ms) + GAME_DEADLINE_MARGIN
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLink;
    use crate::tournament::TestTournament;
    use gauntlet_core::{RecordingReporter, TimeControl};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU64;

    fn pool_config(concurrency: usize) -> PoolConfig {
        PoolConfig {
            white: EngineConfig::new("alpha", "/bin/alpha"),
            black: EngineConfig::new("beta", "/bin/beta"),
            concurrency,
            log_moves: false,
            alternate_colors: false,
        }
    }

    /// fool's mate の台本を色ごとに返す spawner。
    fn scripted_spawner() -> Box<LinkSpawner> {
        let next_id = AtomicU64::new(1);
        Box::new(move |cfg| {
            let id = next_id.fetch_add(1, Ordering::Relaxed);
            let link = if cfg.name == "alpha" {
                MockLink::scripted(id, "alpha", &[("f2f3", None), ("g2g4", None)])
            } else {
                MockLink::scripted(id, "beta", &[("e7e5", None), ("d8h4", None)])
            };
            Ok((Box::new(link) as Box<dyn EngineLink>, true))
        })
    }

    #[test]
    fn pool_plays_all_games_and_reports_back() {
        let reporter = Arc::new(RecordingReporter::new());
        let tc = TimeControl::with_base(60_000, 0);
        let provider = Arc::new(TestTournament::new(
            vec![(tc, tc)],
            3,
            reporter.clone() as Arc<dyn Reporter>,
        ));
        let pool = GameManagerPool::with_spawner(
            pool_config(2),
            provider.clone(),
            reporter.clone() as Arc<dyn Reporter>,
            Arc::new(AtomicBool::new(false)),
            scripted_spawner(),
        );
        pool.run();
        assert_eq!(provider.games_played(), 3);
        for game in provider.finished_games() {
            assert_eq!(game.result.outcome, GameOutcome::BlackWins);
            assert_eq!(game.result.cause, GameEndCause::Checkmate);
            assert_eq!(game.moves.len(), 4);
        }
        assert!(!reporter.failed(Topic::EngineStarted));
    }

    #[test]
    fn spawn_failure_is_recorded_as_a_disconnect_loss() {
        let reporter = Arc::new(RecordingReporter::new());
        let tc = TimeControl::with_base(1_000, 0);
        let provider = Arc::new(TestTournament::new(
            vec![(tc, tc)],
            1,
            reporter.clone() as Arc<dyn Reporter>,
        ));
        let attempts = Arc::new(Mutex::new(0u32));
        let spawn_attempts = attempts.clone();
        let spawner: Box<LinkSpawner> = Box::new(move |cfg| {
            *spawn_attempts.lock().unwrap() += 1;
            if cfg.name == "alpha" {
                anyhow::bail!("binary not found");
            }
            Ok((Box::new(MockLink::new(99, "beta")) as Box<dyn EngineLink>, true))
        });
        let pool = GameManagerPool::with_spawner(
            pool_config(1),
            provider.clone(),
            reporter.clone() as Arc<dyn Reporter>,
            Arc::new(AtomicBool::new(false)),
            spawner,
        );
        pool.run();
        let games = provider.finished_games();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].result.outcome, GameOutcome::BlackWins);
        assert_eq!(games[0].result.cause, GameEndCause::Disconnect);
        assert!(reporter.failed(Topic::EngineStarted));
    }

    #[test]
    fn shutdown_flag_stops_pulling_tasks() {
        let reporter = Arc::new(RecordingReporter::new());
        let tc = TimeControl::with_base(60_000, 0);
        let provider = Arc::new(TestTournament::new(
            vec![(tc, tc)],
            100,
            reporter.clone() as Arc<dyn Reporter>,
        ));
        let shutdown = Arc::new(AtomicBool::new(true));
        let pool = GameManagerPool::with_spawner(
            pool_config(2),
            provider.clone(),
            reporter as Arc<dyn Reporter>,
            shutdown,
            scripted_spawner(),
        );
        pool.run();
        assert_eq!(provider.games_played(), 0);
    }
}
