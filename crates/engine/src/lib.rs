pub mod admission;
pub mod calendar;
pub mod exit_engine;
pub mod locks;
pub mod order_manager;
pub mod risk;
pub mod scheduler;
pub mod selector;

pub use admission::{Admission, AdmissionPipeline, ConfluenceInfo, ExitOverrides, IncomingAlert};
pub use calendar::EventCalendar;
pub use exit_engine::{advance_high_water, decide_exit, ExitEngine, ExitParams, PositionView};
pub use locks::TradeLocks;
pub use order_manager::{compute_stop_price, OrderManager};
pub use risk::{GateInput, GateOutcome, RejectReason, RiskGate};
pub use scheduler::Scheduler;
pub use selector::{ContractSelector, SelectedContract};
