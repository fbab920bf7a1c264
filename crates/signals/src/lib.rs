pub mod evaluator;
pub mod params;

pub use evaluator::{evaluate_bar_close, Signal, SignalEngine};
pub use params::{Direction, SessionContext, SignalKind, SignalParams};
