pub mod supervisor;
pub mod worker;

pub use supervisor::StrategySupervisor;
pub use worker::{StrategyWorker, WorkerConfig, WorkerDeps};
