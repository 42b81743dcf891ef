//! Core data model shared across the pipeline: normalized order-book events,
//! arbitrage signals, and paper positions.

mod book;
mod position;
mod signal;

pub use book::{BookEvent, Level, Venue, LEADERS};
pub use position::{EvSnapshot, ExitReason, PaperTrade, Position};
pub use signal::{Side, Signal};
