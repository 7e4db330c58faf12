use std::fmt;
use std::sync::Mutex;

/// 検証レポートの重大度。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportLevel {
    Info,
    Warning,
    Error,
}

/// チェックリスト項目。エンジン挙動に対する検証1件ごとに
/// pass/fail を独立に記録する。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    BestMoveValid,
    PonderMoveValid,
    PvMoveValid,
    CurrMoveValid,
    NoLossOnTime,
    MoveTimeOverrun,
    MoveTimeUnderrun,
    DepthOverrun,
    DepthUnderrun,
    NodesOverrun,
    NodesUnderrun,
    StopAnswered,
    ReadyAnswered,
    EngineStarted,
    EngineRestarted,
    NoTimeoutLoss,
    TimeUsageInRange,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BestMoveValid => "best-move-valid",
            Self::PonderMoveValid => "ponder-move-valid",
            Self::PvMoveValid => "pv-move-valid",
            Self::CurrMoveValid => "currmove-valid",
            Self::NoLossOnTime => "no-loss-on-time",
            Self::MoveTimeOverrun => "move-time-overrun",
            Self::MoveTimeUnderrun => "move-time-underrun",
            Self::DepthOverrun => "depth-overrun",
            Self::DepthUnderrun => "depth-underrun",
            Self::NodesOverrun => "nodes-overrun",
            Self::NodesUnderrun => "nodes-underrun",
            Self::StopAnswered => "stop-answered",
            Self::ReadyAnswered => "ready-answered",
            Self::EngineStarted => "engine-started",
            Self::EngineRestarted => "engine-restarted",
            Self::NoTimeoutLoss => "no-timeout-loss",
            Self::TimeUsageInRange => "time-usage-in-range",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 検証結果の受け口。本体のすべての enforcement はここを通るので、
/// 外からはトピック単位で観測できる。
pub trait Reporter: Send + Sync {
    /// 戻り値は `passed` をそのまま返す。
    fn log_report(&self, topic: Topic, passed: bool, detail: &str, level: ReportLevel) -> bool;
}

/// log クレートへ流すだけの Reporter。
pub struct LogReporter;

impl Reporter for LogReporter {
    fn log_report(&self, topic: Topic, passed: bool, detail: &str, level: ReportLevel) -> bool {
        if passed {
            log::debug!("[{topic}] ok: {detail}");
        } else {
            match level {
                ReportLevel::Info => log::info!("[{topic}] FAIL: {detail}"),
                ReportLevel::Warning => log::warn!("[{topic}] FAIL: {detail}"),
                ReportLevel::Error => log::error!("[{topic}] FAIL: {detail}"),
            }
        }
        passed
    }
}

#[derive(Clone, Debug)]
pub struct ReportEntry {
    pub topic: Topic,
    pub passed: bool,
    pub detail: String,
    pub level: ReportLevel,
}

/// 記録型の Reporter。テストと CLI の集計に使う。
#[derive(Default)]
pub struct RecordingReporter {
    entries: Mutex<Vec<ReportEntry>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ReportEntry> {
        self.lock().clone()
    }

    pub fn failures(&self) -> Vec<ReportEntry> {
        self.lock().iter().filter(|e| !e.passed).cloned().collect()
    }

    pub fn count(&self, topic: Topic) -> usize {
        self.lock().iter().filter(|e| e.topic == topic).count()
    }

    pub fn failed(&self, topic: Topic) -> bool {
        self.lock().iter().any(|e| e.topic == topic && !e.passed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ReportEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Reporter for RecordingReporter {
    fn log_report(&self, topic: Topic, passed: bool, detail: &str, level: ReportLevel) -> bool {
        LogReporter.log_report(topic, passed, detail, level);
        self.lock().push(ReportEntry {
            topic,
            passed,
            detail: detail.to_string(),
            level,
        });
        passed
    }
}
