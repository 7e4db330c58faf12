use std::collections::HashSet;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use gauntlet_core::{EngineEvent, EngineEventKind, GameRecord, GoLimits, SearchInfo};

use crate::config::EngineConfig;
use crate::uci;

pub const ENGINE_READY_TIMEOUT: Duration = Duration::from_secs(30);
pub const MOVE_NOW_TIMEOUT: Duration = Duration::from_millis(1_000);
pub const REQUEST_READY_TIMEOUT: Duration = Duration::from_millis(2_000);
pub const ENGINE_QUIT_TIMEOUT: Duration = Duration::from_millis(300);
pub const ENGINE_QUIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// エンジンイベントの受け口。I/O スレッドから呼ばれる。
pub type EventSink = Box<dyn FnMut(EngineEvent) + Send>;

/// 1本のエンジンプロセスに対する操作面。
///
/// 実装はプロトコルごとに分かれる想定で、オーケストレーション側は
/// この trait 越しにのみエンジンへ触れる。
pub trait EngineLink: Send {
    /// 現局面の探索を依頼する。`ponder_hit` のときは事前に同じ局面を
    /// ponder 中なので、局面再送ではなく継続通知のみを送る。
    fn compute_move(&mut self, record: &GameRecord, limits: &GoLimits, ponder_hit: bool)
    -> Result<()>;

    /// 予測手 `ponder_move` を足した局面で先読み探索を開始させる。
    fn allow_ponder(&mut self, record: &GameRecord, limits: &GoLimits, ponder_move: &str)
    -> Result<()>;

    /// 即時回答を要求する。`wait_for_answer` なら bestmove 応答を
    /// 上限時間まで待ち、受理できたかを返す。
    fn move_now(&mut self, wait_for_answer: bool, timeout: Option<Duration>) -> bool;

    fn set_option(&mut self, name: &str, value: &str) -> bool;

    /// isready/readyok の往復。応答があれば true。
    fn request_ready(&mut self, timeout: Option<Duration>) -> bool;

    /// 次の対局の開始を通知する。
    fn new_game(&mut self) -> Result<()>;

    /// エンジンプロセスの常駐メモリ量 (バイト)。
    fn engine_memory_usage(&self) -> u64;

    /// イベント送り先を差し替える。restart 後は引き継がれないので
    /// 呼び出し側が再設定する。
    fn set_event_sink(&mut self, sink: EventSink);

    fn clear_event_sink(&mut self);

    fn config(&self) -> &EngineConfig;

    /// プロセス生存中は再利用されない一意 ID。
    fn id(&self) -> u64;

    /// プロセス異常 (切断・起動失敗) を検知したか。
    fn failure(&self) -> bool;

    /// プロセスを停止する。二重呼び出しは無害。
    fn shutdown(&mut self);
}

#[derive(Default)]
struct WireState {
    alive: bool,
    uciok: bool,
    readyok_seq: u64,
    bestmove_seq: u64,
    options: HashSet<String>,
}

struct Shared {
    engine_id: u64,
    wire: Mutex<WireState>,
    cv: Condvar,
    sink: Mutex<Option<EventSink>>,
    failed: AtomicBool,
}

impl Shared {
    fn lock_wire(&self) -> MutexGuard<'_, WireState> {
        self.wire.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: EngineEvent) {
        let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cb) = sink.as_mut() {
            cb(event);
        }
    }

    /// 受信1行を振り分ける。イベント生成と handshake 通知の両方を行う。
    fn dispatch_line(&self, line: &str) {
        if let Some(info) = SearchInfo::parse(line) {
            self.emit(EngineEvent::info(self.engine_id, info));
            return;
        }
        if line.starts_with("bestmove") {
            let event = match uci::parse_bestmove(line) {
                Some((best, ponder)) => EngineEvent::best_move(self.engine_id, best, ponder),
                None => EngineEvent {
                    errors: vec![format!("malformed bestmove line '{line}'")],
                    ..EngineEvent::new(EngineEventKind::BestMove, self.engine_id)
                },
            };
            {
                let mut wire = self.lock_wire();
                wire.bestmove_seq += 1;
            }
            self.cv.notify_all();
            self.emit(event);
            return;
        }
        match line.trim() {
            "uciok" => {
                self.lock_wire().uciok = true;
                self.cv.notify_all();
            }
            "readyok" => {
                self.lock_wire().readyok_seq += 1;
                self.cv.notify_all();
            }
            _ => {
                if let Some(name) = uci::parse_option_name(line) {
                    self.lock_wire().options.insert(name);
                }
            }
        }
    }

    fn mark_dead(&self, detail: String) {
        {
            let mut wire = self.lock_wire();
            if !wire.alive {
                return;
            }
            wire.alive = false;
        }
        self.failed.store(true, Ordering::Relaxed);
        self.cv.notify_all();
        self.emit(EngineEvent::disconnected(self.engine_id, detail));
    }
}

/// UCI エンジンプロセス。stdout は専用スレッドで読み、行単位で
/// イベントに変換する。
pub struct UciLink {
    id: u64,
    cfg: EngineConfig,
    child: Child,
    pid: u32,
    stdin: BufWriter<ChildStdin>,
    shared: Arc<Shared>,
    reader: Option<JoinHandle<()>>,
    stopped: bool,
}

impl UciLink {
    /// プロセスを起動し `uci` を送る。handshake 完了は `wait_ready` で待つ。
    pub fn spawn(cfg: &EngineConfig, id: u64) -> Result<Self> {
        let mut cmd = Command::new(&cfg.path);
        if !cfg.args.is_empty() {
            cmd.args(&cfg.args);
        }
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| anyhow!("failed to spawn engine at {}: {e}", cfg.path.display()))?;
        let pid = child.id();
        let stdin = child.stdin.take().ok_or_else(|| anyhow!("no stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("no stdout"))?;

        let shared = Arc::new(Shared {
            engine_id: id,
            wire: Mutex::new(WireState {
                alive: true,
                ..WireState::default()
            }),
            cv: Condvar::new(),
            sink: Mutex::new(None),
            failed: AtomicBool::new(false),
        });

        let reader_shared = shared.clone();
        let label = cfg.name.clone();
        let reader = std::thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                match line {
                    Ok(l) => reader_shared.dispatch_line(&l),
                    Err(_) => break,
                }
            }
            reader_shared.mark_dead(format!("{label}: engine stdout closed"));
        });

        let mut link = Self {
            id,
            cfg: cfg.clone(),
            child,
            pid,
            stdin: BufWriter::new(stdin),
            shared,
            reader: Some(reader),
            stopped: false,
        };
        link.write_line("uci")?;
        Ok(link)
    }

    /// uciok を待ち、オプションを流し込み、readyok まで同期する。
    pub fn wait_ready(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        if !self.wait_wire(deadline, |w| w.uciok) {
            log::warn!("{}: no uciok within {:?}", self.cfg.name, timeout);
            return false;
        }
        for opt in self.cfg.options.clone() {
            self.set_option(&opt.name, &opt.value);
        }
        let advertises_ponder = self.shared.lock_wire().options.contains("Ponder");
        if advertises_ponder {
            let value = if self.cfg.ponder { "true" } else { "false" };
            self.set_option("Ponder", value);
        }
        if !self.request_ready(Some(deadline.saturating_duration_since(Instant::now()))) {
            return false;
        }
        self.write_line("ucinewgame").is_ok()
    }

    fn wait_wire(&self, deadline: Instant, done: impl Fn(&WireState) -> bool) -> bool {
        let mut wire = self.shared.lock_wire();
        loop {
            if done(&wire) {
                return true;
            }
            if !wire.alive {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .shared
                .cv
                .wait_timeout(wire, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            wire = guard;
        }
    }

    fn write_line(&mut self, msg: &str) -> Result<()> {
        self.stdin.write_all(msg.as_bytes())?;
        self.stdin.write_all(b"\n")?;
        self.stdin.flush()?;
        Ok(())
    }

    fn quit(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        let _ = self.write_line("quit");
        let deadline = Instant::now() + ENGINE_QUIT_TIMEOUT;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            std::thread::sleep(ENGINE_QUIT_POLL_INTERVAL);
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl EngineLink for UciLink {
    fn compute_move(
        &mut self,
        record: &GameRecord,
        limits: &GoLimits,
        ponder_hit: bool,
    ) -> Result<()> {
        // 送信前マーカー。ponder 探索から遅れて届く info 行と
        // 新しい探索フェーズとの境界をイベント列の中で確定させる。
        self.shared
            .emit(EngineEvent::new(EngineEventKind::SendingComputeMove, self.id));
        if ponder_hit {
            self.write_line("ponderhit")?;
        } else {
            self.write_line(&uci::position_command(record))?;
            self.write_line(&uci::go_command(limits, false))?;
        }
        self.shared
            .emit(EngineEvent::new(EngineEventKind::ComputeMoveSent, self.id));
        Ok(())
    }

    fn allow_ponder(
        &mut self,
        record: &GameRecord,
        limits: &GoLimits,
        ponder_move: &str,
    ) -> Result<()> {
        self.write_line(&uci::position_command_with_extra(record, Some(ponder_move)))?;
        self.write_line(&uci::go_command(limits, true))?;
        Ok(())
    }

    fn move_now(&mut self, wait_for_answer: bool, timeout: Option<Duration>) -> bool {
        let before = self.shared.lock_wire().bestmove_seq;
        if self.write_line("stop").is_err() {
            return false;
        }
        if !wait_for_answer {
            return true;
        }
        let deadline = Instant::now() + timeout.unwrap_or(MOVE_NOW_TIMEOUT);
        self.wait_wire(deadline, |w| w.bestmove_seq > before)
    }

    fn set_option(&mut self, name: &str, value: &str) -> bool {
        let known = {
            let wire = self.shared.lock_wire();
            wire.options.is_empty() || wire.options.contains(name)
        };
        if !known {
            log::debug!("{}: option '{name}' not advertised, sending anyway", self.cfg.name);
        }
        self.write_line(&format!("setoption name {name} value {value}")).is_ok()
    }

    fn request_ready(&mut self, timeout: Option<Duration>) -> bool {
        let before = self.shared.lock_wire().readyok_seq;
        if self.write_line("isready").is_err() {
            return false;
        }
        let deadline = Instant::now() + timeout.unwrap_or(REQUEST_READY_TIMEOUT);
        self.wait_wire(deadline, |w| w.readyok_seq > before)
    }

    fn new_game(&mut self) -> Result<()> {
        self.write_line("ucinewgame")?;
        if !self.request_ready(None) {
            anyhow::bail!("{}: no readyok after ucinewgame", self.cfg.name);
        }
        Ok(())
    }

    fn engine_memory_usage(&self) -> u64 {
        use sysinfo::{Pid, ProcessesToUpdate, System};
        let pid = Pid::from_u32(self.pid);
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        sys.process(pid).map(|p| p.memory()).unwrap_or(0)
    }

    fn set_event_sink(&mut self, sink: EventSink) {
        *self.shared.sink.lock().unwrap_or_else(|e| e.into_inner()) = Some(sink);
    }

    fn clear_event_sink(&mut self) {
        *self.shared.sink.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    fn id(&self) -> u64 {
        self.id
    }

    fn failure(&self) -> bool {
        self.shared.failed.load(Ordering::Relaxed) || !self.shared.lock_wire().alive
    }

    fn shutdown(&mut self) {
        self.quit();
    }
}

impl Drop for UciLink {
    fn drop(&mut self) {
        self.clear_event_sink();
        self.quit();
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // cat は uci へ応答しないが、書き込みと読み取りスレッドは生きている
    #[test]
    fn spawn_writes_the_handshake_and_times_out_against_a_silent_process() {
        let cfg = EngineConfig::new("cat", "/bin/cat");
        let mut link = UciLink::spawn(&cfg, 1).unwrap();
        assert!(!link.wait_ready(Duration::from_millis(100)));
        assert!(!link.failure());
        link.shutdown();
    }

    #[test]
    fn spawn_fails_for_a_missing_binary() {
        let cfg = EngineConfig::new("ghost", "/nonexistent/engine/binary");
        assert!(UciLink::spawn(&cfg, 1).is_err());
    }
}
