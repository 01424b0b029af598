//! # Contracts
//!
//! Frozen interface contracts shared by every crate of the workspace:
//! the access-event model, the live handle traits a server implements, the
//! freezer that turns one into the other, and the sink interface.
//! Business crates depend on this crate, never the other way round.
//!
//! ## Lifecycle
//! - `LiveEvent<'a>` borrows the server's request/response (valid only inside
//!   the completion hook)
//! - `AccessEvent` is the frozen, self-contained value handed to sinks

mod config;
mod error;
mod event;
mod freeze;
mod live;
pub mod mock;
mod multimap;
mod sink;
mod sink_id;

pub use config::*;
pub use error::*;
pub use event::*;
pub use freeze::{CaptureIssue, EventFreezer, LiveEvent};
pub use live::*;
pub use multimap::{MultiMap, MultiMapBuilder};
pub use sink::*;
pub use sink_id::SinkId;
