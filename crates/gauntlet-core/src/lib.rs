pub mod error;
pub mod event;
pub mod position;
pub mod record;
pub mod report;
pub mod search_info;
pub mod time_control;

pub use error::PositionError;
pub use event::{EngineEvent, EngineEventKind};
pub use position::{AppliedMove, ShadowPosition};
pub use record::{
    GameEndCause, GameEndResult, GameOutcome, GameRecord, MoveRecord, StartPosition,
};
pub use report::{LogReporter, RecordingReporter, ReportEntry, ReportLevel, Reporter, Topic};
pub use search_info::SearchInfo;
pub use time_control::{GoLimits, TimeControl};
