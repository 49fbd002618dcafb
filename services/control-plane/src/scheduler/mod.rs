//! Placement and admission for new workloads.
//!
//! A create request flows through:
//! - [`tiers::match_tier`]: the requested shape must equal a catalog tier
//! - [`admission::check_admission`]: the account must afford the tier
//! - [`crate::nodes::find_candidates`]: live nodes with enough free capacity
//! - [`NodeSelector`]: pick one of them
//!
//! All four steps run inside the transaction that inserts the workload.

pub mod admission;
pub mod placement;
pub mod tiers;

pub use admission::{admits, check_admission, MIN_RUNTIME_MINUTES};
pub use placement::{FirstSelector, NodeSelector, RandomSelector};
pub use tiers::{match_tier, CreateTier, TierCatalog};
