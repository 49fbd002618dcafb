//! # fleet-id
//!
//! Typed identifiers for every resource the fleet control plane stores.
//!
//! All ids share the format `{prefix}_{ulid}`:
//!
//! - `acct_01HV4Z2WQXKJNM8GPQY6VBKC3D` (account)
//! - `node_01HV4Z3MXNKPQR9HSTZ7WCLD4E` (bare-metal node)
//! - `wl_01HV4Z4NYPLTRS0JTUA8XDME5F` (workload)
//!
//! The prefix keeps ids of different resources from being mixed up at the API
//! boundary, and the ULID keeps them time-ordered.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
