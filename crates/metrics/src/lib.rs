//! Metrics facade for parley.
//!
//! Crates record through the `metrics` macros re-exported here using the names
//! in [`definitions`]. Without an installed recorder every call is a no-op, so
//! library crates depend on this unconditionally behind their `metrics` feature.
//!
//! ```rust,ignore
//! use parley_metrics::{counter, queue, labels};
//!
//! counter!(queue::ENQUEUED_TOTAL).increment(1);
//! ```

mod definitions;

pub use definitions::*;

pub use metrics::{counter, gauge, histogram};
