//! Call tree construction and cross-session merging.
//!
//! This crate contains the tree-shaped building blocks of profile
//! aggregation:
//!
//! - [`Node`]: one function occurrence on one thread during one profiling
//!   session, owning its callees. Both session builders (interval snapshots
//!   and method events) and the [`BacktraceAggregator`] produce forests of
//!   these nodes.
//! - [`BacktraceAggregator`]: incrementally splices an ordered stream of flat
//!   stack-trace rows into per-thread call trees, one set per profile.
//! - [`AggregateCallTree`] and [`CallTreeAggregator`]: deduplicate call trees
//!   observed across many profiles into canonical trees carrying duration
//!   distributions, either whole or along the paths to one target function.
//!
//! Frames are identified by `(image basename, symbol)` everywhere; source
//! locations are display metadata and never participate in identity.

mod aggregate;
mod backtrace;
mod frame;
mod node;

pub use crate::aggregate::*;
pub use crate::backtrace::*;
pub use crate::frame::*;
pub use crate::node::*;
