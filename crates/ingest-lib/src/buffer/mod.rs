//! In-memory buffering between ingestion and persistence
//!
//! Two decoupled accumulators, each behind its own lock so ownership
//! traffic can never stall metric ingestion:
//! - `IntervalBuffer`: watermarked sliding window of interval slots
//! - `OwnerBuffer`: time-flushed collector for pod ownership metadata

mod interval;
mod owner;

pub use interval::{EvictedSlot, IntervalBuffer, Slot};
pub use owner::OwnerBuffer;
