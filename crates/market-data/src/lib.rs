pub mod bars;
pub mod quote_cache;
pub mod stream;

pub use bars::{Bar, BarAggregator, Timeframe};
pub use quote_cache::{QuoteCache, QuoteKind, QuoteSnapshot, StreamCommand};
pub use stream::{subscribe_base_symbols, QuoteStream};
