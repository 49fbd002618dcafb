//! Fleet control plane library.
//!
//! This crate primarily ships a `control-plane` binary, but we expose a small
//! library surface to enable integration testing and reuse.

pub mod accounts;
pub mod api;
pub mod clients;
pub mod config;
pub mod db;
pub mod error;
pub mod metering;
pub mod models;
pub mod nodes;
pub mod scheduler;
pub mod state;
pub mod workloads;
