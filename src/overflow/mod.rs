//! # Overflow Storage
//!
//! A bounded, TTL-governed side store for payloads too large to travel on a
//! stream, and the record filter that routes them through it.

pub mod entry;
pub mod errors;
pub mod filter;
pub mod moka_store;
pub mod traits;

pub use entry::{EntryStatus, OverflowBlob, OverflowSnapshot, ParamValue, StoreStats};
pub use errors::{OverflowError, OverflowResult};
pub use filter::OverflowRecordFilter;
pub use moka_store::MokaOverflowStore;
pub use traits::OverflowStore;
