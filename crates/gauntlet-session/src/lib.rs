pub mod context;
pub mod pool;
pub mod seat;
pub mod task;
pub mod tournament;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{EngineRecord, GameContext};
pub use pool::{GameManagerPool, PoolConfig};
pub use seat::{BestMoveOutcome, ComputeState, PlayerSeat};
pub use task::{ComputeTask, TaskType};
pub use tournament::{GameTask, TaskProvider, TestTournament};
