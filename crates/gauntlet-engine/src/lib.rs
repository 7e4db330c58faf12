pub mod config;
pub mod factory;
pub mod link;
pub mod uci;

pub use config::{EngineConfig, EngineOption, EngineRegistry};
pub use factory::{EngineFactory, LinkCreator, StartReport, StartedEngine};
pub use link::{EngineLink, EventSink, UciLink};
