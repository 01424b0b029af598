//! Command implementations.

mod info;
mod simulate;

pub use info::run_info;
pub use simulate::run_simulate;
