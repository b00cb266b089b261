//! Shared-ledger access: policy model and the get/prepare/insert client.

/// Query, prepare and insert primitives.
mod client;
/// Policy payloads, selectors and declared records.
mod policy;

pub use client::{LedgerClient, LedgerError, PolicyLookup};
pub use policy::*;
