//! Database module for PostgreSQL persistence.

mod events;
mod pool;
mod sink;

pub use events::*;
pub use pool::*;
pub use sink::*;
