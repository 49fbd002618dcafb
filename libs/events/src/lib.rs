//! # fleet-events
//!
//! Workload lifecycle events as reported by node agents, and the status a
//! workload is in after a given event.
//!
//! ## Design Principles
//!
//! - The event log is append-only and is the single write path for status
//! - Status is a projection: the status of the latest non-warning event
//! - `warning` events are informational and never move the state machine
//!
//! ## State Machine
//!
//! | Event kind                                   | Status          |
//! |----------------------------------------------|-----------------|
//! | `created`                                    | `scheduled`     |
//! | `starting`, `vmRestarted`, `forcedRestart`   | `starting`      |
//! | `awaitingCert`                               | `awaitingCert`  |
//! | `running`                                    | `running`       |
//! | `stopped`                                    | `stopped`       |
//! | `failedToStart`                              | `error`         |
//! | `warning`                                    | unchanged       |

mod error;
mod types;

pub use error::EventError;
pub use types::*;
