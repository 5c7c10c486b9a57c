//! Command registration, resolution, and dispatch.
//!
//! A [`DispatchTable`] is an insertion-ordered registry of
//! [`CommandDescriptor`]s owned by exactly one server instance. Typed
//! keywords resolve by case-sensitive prefix match; dispatch validates the
//! argument count and routes all callback output through an [`OutputSink`]
//! the session engine flushes at transport-appropriate points.

mod descriptor;
mod output;
mod table;

pub use descriptor::{CommandCallback, CommandDescriptor, RegisterError};
pub use output::OutputSink;
pub use table::{DispatchOutcome, DispatchTable, Resolution};

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");
