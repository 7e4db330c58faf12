//! エンジン対エンジンのトーナメントランナー。
//!
//! 2つの UCI エンジンを指定局数だけ戦わせ、棋譜と検証結果を
//! JSONL へ書き出して W-L-D と Elo 差を要約する。

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use clap::Parser;
use gauntlet_core::{
    GameOutcome, GameRecord, RecordingReporter, Reporter, StartPosition, TimeControl,
};
use gauntlet_engine::{EngineConfig, EngineRegistry};
use gauntlet_session::{GameManagerPool, GameTask, PoolConfig, TaskProvider, TestTournament};

#[derive(Parser, Debug)]
#[command(name = "gauntlet", about = "Run an engine-vs-engine UCI tournament")]
struct Args {
    /// 1つ目のエンジンの実行ファイル
    #[arg(long)]
    engine1: PathBuf,

    /// 1つ目のエンジンの表示名
    #[arg(long, default_value = "engine1")]
    name1: String,

    /// 2つ目のエンジンの実行ファイル
    #[arg(long)]
    engine2: PathBuf,

    /// 2つ目のエンジンの表示名
    #[arg(long, default_value = "engine2")]
    name2: String,

    /// 対局数
    #[arg(long, default_value_t = 10)]
    games: u32,

    /// 同時に走らせる対局数
    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    /// 持ち時間 (ms)
    #[arg(long, default_value_t = 60_000)]
    base_ms: u64,

    /// 1手ごとの加算 (ms)
    #[arg(long, default_value_t = 1_000)]
    inc_ms: u64,

    /// 1手固定時間 (ms)。指定すると持ち時間は使わない
    #[arg(long)]
    movetime_ms: Option<u64>,

    /// 探索深さの上限
    #[arg(long)]
    depth: Option<u32>,

    /// エンジン定義 TOML。表示名が一致する項目で設定を上書きする
    #[arg(long)]
    engines_toml: Option<PathBuf>,

    /// 開始局面リスト (1行1FEN)
    #[arg(long)]
    openings: Option<PathBuf>,

    /// 開始局面を使う前にシャッフルする
    #[arg(long)]
    shuffle_openings: bool,

    /// ログ出力先ディレクトリ
    #[arg(long, default_value = "gauntlet-out")]
    out_dir: PathBuf,

    /// ponder を有効にする
    #[arg(long)]
    ponder: bool,

    /// 1手ごとにログへ出す
    #[arg(long)]
    log_moves: bool,

    /// 対局ごとに先後を入れ替えない
    #[arg(long)]
    fixed_colors: bool,
}

/// 終局した棋譜を JSONL へ追記してから内側の大会へ渡す。
struct JsonlRecorder {
    inner: Arc<TestTournament>,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlRecorder {
    fn create(inner: Arc<TestTournament>, path: &PathBuf) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        Ok(Self {
            inner,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    fn append(&self, record: &GameRecord) -> Result<()> {
        #[derive(serde::Serialize)]
        struct Line<'a> {
            at: String,
            outcome: &'static str,
            cause: &'static str,
            record: &'a GameRecord,
        }
        let line = Line {
            at: chrono::Local::now().to_rfc3339(),
            outcome: record.result.outcome.label(),
            cause: record.result.cause.label(),
            record,
        };
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        serde_json::to_writer(&mut *writer, &line)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

impl TaskProvider for JsonlRecorder {
    fn next_task(&self) -> Option<GameTask> {
        self.inner.next_task()
    }

    fn set_game_record(&self, record: GameRecord) {
        if let Err(e) = self.append(&record) {
            log::error!("failed to write game log: {e}");
        }
        self.inner.set_game_record(record);
    }
}

fn engine_config(
    registry: Option<&EngineRegistry>,
    name: &str,
    path: &PathBuf,
    ponder: bool,
) -> EngineConfig {
    if let Some(found) = registry.and_then(|r| r.get(name)) {
        return found.clone();
    }
    let mut cfg = EngineConfig::new(name, path.clone());
    cfg.ponder = ponder;
    cfg
}

fn time_control(args: &Args) -> TimeControl {
    if args.movetime_ms.is_some() || args.depth.is_some() {
        TimeControl {
            move_time_ms: args.movetime_ms,
            depth: args.depth,
            ..TimeControl::default()
        }
    } else {
        TimeControl::with_base(args.base_ms, args.inc_ms)
    }
}

fn load_openings(path: &PathBuf) -> Result<Vec<StartPosition>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let openings: Vec<StartPosition> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| StartPosition::Fen(l.to_string()))
        .collect();
    if openings.is_empty() {
        bail!("{} contains no positions", path.display());
    }
    Ok(openings)
}

/// 片側視点の勝敗集計。
#[derive(Default)]
struct Score {
    wins: u32,
    losses: u32,
    draws: u32,
}

impl Score {
    fn tally(games: &[GameRecord], name: &str) -> Self {
        let mut score = Self::default();
        for game in games {
            let as_white = game.white_name == name;
            match game.result.outcome {
                GameOutcome::Draw => score.draws += 1,
                GameOutcome::WhiteWins if as_white => score.wins += 1,
                GameOutcome::BlackWins if !as_white => score.wins += 1,
                GameOutcome::Ongoing => {}
                _ => score.losses += 1,
            }
        }
        score
    }

    fn total(&self) -> u32 {
        self.wins + self.losses + self.draws
    }

    /// 勝率から Elo 差を推定する。全勝・全敗では計算できないので None。
    fn elo_diff(&self) -> Option<f64> {
        let n = f64::from(self.total());
        if n == 0.0 {
            return None;
        }
        let points = f64::from(self.wins) + f64::from(self.draws) * 0.5;
        let rate = points / n;
        if rate <= 0.0 || rate >= 1.0 {
            return None;
        }
        Some(-400.0 * (1.0 / rate - 1.0).log10())
    }
}

fn write_run_meta(args: &Args, tc: &TimeControl) -> Result<()> {
    #[derive(serde::Serialize)]
    struct Meta<'a> {
        started_at: String,
        engine1: &'a str,
        engine2: &'a str,
        games: u32,
        concurrency: usize,
        time_control: &'a TimeControl,
    }
    let meta = Meta {
        started_at: chrono::Local::now().to_rfc3339(),
        engine1: &args.name1,
        engine2: &args.name2,
        games: args.games,
        concurrency: args.concurrency,
        time_control: tc,
    };
    let path = args.out_dir.join("meta.json");
    let file = File::create(&path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, &meta)?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.games == 0 {
        bail!("--games must be at least 1");
    }
    if args.name1 == args.name2 {
        bail!("--name1 and --name2 must differ");
    }

    let registry = match &args.engines_toml {
        Some(path) => Some(EngineRegistry::load(path)?),
        None => None,
    };
    let cfg1 = engine_config(registry.as_ref(), &args.name1, &args.engine1, args.ponder);
    let cfg2 = engine_config(registry.as_ref(), &args.name2, &args.engine2, args.ponder);
    let tc = time_control(&args);

    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("failed to create {}", args.out_dir.display()))?;
    write_run_meta(&args, &tc)?;

    let reporter = Arc::new(RecordingReporter::new());
    let mut tournament = TestTournament::new(
        vec![(tc, tc)],
        args.games,
        reporter.clone() as Arc<dyn Reporter>,
    );
    if let Some(path) = &args.openings {
        let mut openings = load_openings(path)?;
        if args.shuffle_openings {
            use rand::seq::SliceRandom;
            openings.shuffle(&mut rand::rng());
        }
        tournament = tournament.with_openings(openings);
    }
    let tournament = Arc::new(tournament);
    let games_path = args.out_dir.join("games.jsonl");
    let provider = Arc::new(JsonlRecorder::create(tournament.clone(), &games_path)?);

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_flag = shutdown.clone();
    ctrlc::set_handler(move || {
        log::info!("interrupt received, finishing current games");
        handler_flag.store(true, Ordering::Relaxed);
    })
    .context("failed to install signal handler")?;

    log::info!(
        "{} vs {}: {} games, {} worker(s)",
        args.name1,
        args.name2,
        args.games,
        args.concurrency
    );
    let pool = GameManagerPool::new(
        PoolConfig {
            white: cfg1,
            black: cfg2,
            concurrency: args.concurrency,
            log_moves: args.log_moves,
            alternate_colors: !args.fixed_colors,
        },
        provider,
        reporter.clone() as Arc<dyn Reporter>,
        shutdown,
    );
    pool.run();

    let games = tournament.finished_games();
    let score = Score::tally(&games, &args.name1);
    let elo = score
        .elo_diff()
        .map(|d| format!("{d:+.1}"))
        .unwrap_or_else(|| "n/a".to_string());
    println!(
        "{} vs {}: +{} -{} ={} in {} games (elo {elo})",
        args.name1,
        args.name2,
        score.wins,
        score.losses,
        score.draws,
        games.len()
    );
    let failures = reporter.failures();
    if failures.is_empty() {
        println!("all checks passed");
    } else {
        println!("{} failed check(s):", failures.len());
        for entry in &failures {
            println!("  [{}] {}", entry.topic, entry.detail);
        }
    }
    println!("game log written to {}", games_path.display());
    Ok(())
}
