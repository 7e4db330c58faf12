//! テスト用のスクリプト駆動エンジン。プロセスを起動せず、
//! compute のたびに台本から bestmove を返す。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use gauntlet_core::{EngineEvent, EngineEventKind, GameRecord, GoLimits};
use gauntlet_engine::{EngineConfig, EngineLink, EventSink};

#[derive(Default)]
pub struct MockCalls {
    /// compute_move 呼び出しごとの ponder_hit フラグ。
    pub compute: Vec<bool>,
    pub ponder: Vec<String>,
    pub move_now: u32,
    pub ready: u32,
    pub new_games: u32,
}

pub struct MockLink {
    id: u64,
    cfg: EngineConfig,
    sink: Mutex<Option<EventSink>>,
    script: Mutex<VecDeque<(String, Option<String>)>>,
    pub calls: Arc<Mutex<MockCalls>>,
    pub answer_move_now: bool,
    pub broken: bool,
}

impl MockLink {
    pub fn new(id: u64, name: &str) -> Self {
        let mut cfg = EngineConfig::new(name, "/dev/null");
        cfg.ponder = true;
        Self {
            id,
            cfg,
            sink: Mutex::new(None),
            script: Mutex::new(VecDeque::new()),
            calls: Arc::new(Mutex::new(MockCalls::default())),
            answer_move_now: true,
            broken: false,
        }
    }

    /// compute のたびに順番に返す応答を積む。
    pub fn scripted(id: u64, name: &str, moves: &[(&str, Option<&str>)]) -> Self {
        let link = Self::new(id, name);
        for (token, ponder) in moves {
            link.push_answer(token, *ponder);
        }
        link
    }

    pub fn push_answer(&self, token: &str, ponder: Option<&str>) {
        self.script
            .lock()
            .unwrap()
            .push_back((token.to_string(), ponder.map(str::to_string)));
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(cb) = self.sink.lock().unwrap().as_mut() {
            cb(event);
        }
    }
}

impl EngineLink for MockLink {
    fn compute_move(
        &mut self,
        _record: &GameRecord,
        _limits: &GoLimits,
        ponder_hit: bool,
    ) -> Result<()> {
        self.calls.lock().unwrap().compute.push(ponder_hit);
        self.emit(EngineEvent::new(EngineEventKind::SendingComputeMove, self.id));
        self.emit(EngineEvent::new(EngineEventKind::ComputeMoveSent, self.id));
        if let Some((token, ponder)) = self.script.lock().unwrap().pop_front() {
            self.emit(EngineEvent::best_move(self.id, token, ponder));
        }
        Ok(())
    }

    fn allow_ponder(
        &mut self,
        _record: &GameRecord,
        _limits: &GoLimits,
        ponder_move: &str,
    ) -> Result<()> {
        self.calls.lock().unwrap().ponder.push(ponder_move.to_string());
        Ok(())
    }

    fn move_now(&mut self, _wait_for_answer: bool, _timeout: Option<Duration>) -> bool {
        self.calls.lock().unwrap().move_now += 1;
        self.answer_move_now
    }

    fn set_option(&mut self, _name: &str, _value: &str) -> bool {
        true
    }

    fn request_ready(&mut self, _timeout: Option<Duration>) -> bool {
        self.calls.lock().unwrap().ready += 1;
        !self.broken
    }

    fn new_game(&mut self) -> Result<()> {
        self.calls.lock().unwrap().new_games += 1;
        Ok(())
    }

    fn engine_memory_usage(&self) -> u64 {
        0
    }

    fn set_event_sink(&mut self, sink: EventSink) {
        *self.sink.lock().unwrap() = Some(sink);
    }

    fn clear_event_sink(&mut self) {
        *self.sink.lock().unwrap() = None;
    }

    fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    fn id(&self) -> u64 {
        self.id
    }

    fn failure(&self) -> bool {
        self.broken
    }

    fn shutdown(&mut self) {}
}
