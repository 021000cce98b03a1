//! Advisory fetch-and-aggregate core.
//!
//! One fetch cycle retrieves the advisory feed, fans out a bounded pool of
//! per-entry detail fetches, and aggregates the results:
//!
//! - [`record`] - entry field extraction, [`Record`], key derivation
//! - [`fetcher`] - the orchestrator, worker pool and combined error
//!
//! Everything here is created fresh each cycle and discarded once the caller
//! has consumed the snapshot; there is no cross-cycle state.

mod fetcher;
mod record;

pub use fetcher::{CycleErrors, Fetcher, Snapshot};
pub use record::{EntryFields, Record};
