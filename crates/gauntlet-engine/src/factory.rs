use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;

use crate::config::EngineConfig;
use crate::link::{ENGINE_READY_TIMEOUT, EngineLink, UciLink};

/// 起動したエンジンと handshake 完了状態。
pub struct StartedEngine {
    pub link: Box<dyn EngineLink>,
    pub ready: bool,
}

/// 一括起動の結果。起動に失敗した要素は index と理由で残す。
#[derive(Default)]
pub struct StartReport {
    pub engines: Vec<Option<StartedEngine>>,
    pub spawn_errors: Vec<(usize, String)>,
}

impl StartReport {
    pub fn all_ready(&self) -> bool {
        self.spawn_errors.is_empty()
            && self
                .engines
                .iter()
                .all(|e| e.as_ref().is_some_and(|s| s.ready))
    }
}

/// リンク生成の注入口。設定・払い出し済み ID・handshake 待ち上限を
/// 受け取り、リンクと ready 状態を返す。
pub type LinkCreator =
    dyn Fn(&EngineConfig, u64, Duration) -> Result<(Box<dyn EngineLink>, bool)> + Send + Sync;

/// エンジンプロセスの生成と再起動。ID はプロセス単位で単調増加し、
/// restart 後の古い ID を弁別できる。
pub struct EngineFactory {
    next_id: AtomicU64,
    ready_timeout: Duration,
    creator: Box<LinkCreator>,
}

impl Default for EngineFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineFactory {
    pub fn new() -> Self {
        Self::with_ready_timeout(ENGINE_READY_TIMEOUT)
    }

    pub fn with_ready_timeout(timeout: Duration) -> Self {
        Self::with_creator_and_timeout(
            Box::new(|cfg, id, timeout| {
                let mut link = UciLink::spawn(cfg, id)?;
                let ready = link.wait_ready(timeout);
                Ok((Box::new(link) as Box<dyn EngineLink>, ready))
            }),
            timeout,
        )
    }

    /// プロセスを起動しない実装へ差し替える。テストが主な用途。
    pub fn with_creator(creator: Box<LinkCreator>) -> Self {
        Self::with_creator_and_timeout(creator, ENGINE_READY_TIMEOUT)
    }

    fn with_creator_and_timeout(creator: Box<LinkCreator>, timeout: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            ready_timeout: timeout,
            creator,
        }
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// 1本起動して handshake 完了まで待つ。
    pub fn create_engine(&self, cfg: &EngineConfig) -> Result<StartedEngine> {
        let id = self.allocate_id();
        let (link, ready) = (self.creator)(cfg, id, self.ready_timeout)?;
        if !ready {
            log::warn!("engine '{}' (id {id}) did not become ready", cfg.name);
        }
        Ok(StartedEngine { link, ready })
    }

    /// 複数エンジンを並列に起動する。handshake 待ちが直列に
    /// 積み上がらないよう、1本ごとにスレッドを割り当てる。
    pub fn create_engines(&self, configs: &[EngineConfig]) -> StartReport {
        let mut report = StartReport::default();
        let results: Vec<Result<StartedEngine>> = std::thread::scope(|scope| {
            let handles: Vec<_> = configs
                .iter()
                .map(|cfg| scope.spawn(move || self.create_engine(cfg)))
                .collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(res) => res,
                    Err(_) => Err(anyhow::anyhow!("engine startup thread panicked")),
                })
                .collect()
        });
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(started) => report.engines.push(Some(started)),
                Err(e) => {
                    report.engines.push(None);
                    report.spawn_errors.push((index, e.to_string()));
                }
            }
        }
        report
    }

    /// 同じ設定で新しいプロセスに差し替える。古いプロセスを止めてから
    /// 起動し直し、handshake が完了したかを返す。イベントの送り先は
    /// 引き継がれないので呼び出し側で再設定すること。
    pub fn restart(&self, link: &mut Box<dyn EngineLink>) -> Result<bool> {
        let cfg = link.config().clone();
        let old_id = link.id();
        link.shutdown();
        log::info!("restarting engine '{}' (old id {old_id})", cfg.name);
        let started = self.create_engine(&cfg)?;
        *link = started.link;
        Ok(started.ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic() {
        let factory = EngineFactory::new();
        let a = factory.allocate_id();
        let b = factory.allocate_id();
        let c = factory.allocate_id();
        assert!(a < b && b < c);
    }

    #[test]
    fn create_engines_reports_spawn_failures() {
        let factory = EngineFactory::with_ready_timeout(Duration::from_millis(50));
        let cfg = EngineConfig::new("ghost", "/nonexistent/engine/binary");
        let report = factory.create_engines(std::slice::from_ref(&cfg));
        assert_eq!(report.engines.len(), 1);
        assert!(report.engines[0].is_none());
        assert_eq!(report.spawn_errors.len(), 1);
        assert_eq!(report.spawn_errors[0].0, 0);
        assert!(!report.all_ready());
    }
}
