//! Client-side synchronization core for server-executed document alignment jobs.
//!
//! Components, leaves first:
//!
//! - [`transport`]: authenticated requests, typed errors, downloads.
//! - [`api`]: logical operations with one adapter per protocol generation.
//! - [`registry`]: local job snapshots, including optimistic state and rollback.
//! - [`lifecycle`]: start / extend / stop and the per-job polling loop.
//! - [`conflicts`] and [`processing`]: per-job workspaces.
//! - [`export`]: previews and downloadable artifacts.
//! - [`workbench`]: selected-job facade tying the above together.

pub mod api;
pub mod conflicts;
pub mod error;
pub mod export;
pub mod lifecycle;
pub mod model;
pub mod processing;
pub mod registry;
pub mod transport;
pub mod workbench;

pub use error::{AlignError, Result};
