//! Core infrastructure shared by the job control plane crates.
//!
//! This crate provides the pieces every other crate in this workspace
//! needs but none of them should own individually:
//! - an event system for observability (`events`)
//! - a clock abstraction that separates monotonic and epoch time (`clock`)
//! - a generic cancellation context that can be tripped by several
//!   independent sources and remembers which one fired first (`cancel`)

pub mod cancel;
pub mod clock;
pub mod events;

pub use cancel::{CancelReason, CancellationContext, CancellationToken};
pub use clock::{Clock, SystemClock, TestClock};
pub use events::{EventListener, EventListeners, FnListener, ResilienceEvent};
