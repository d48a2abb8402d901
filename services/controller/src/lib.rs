//! Flotilla fleet controller library.
//!
//! This crate primarily ships a `controller` binary, but the library
//! surface is exposed for integration testing.

pub mod api;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod disruption;
pub mod interruption;
pub mod orchestrator;
pub mod pool;
pub mod provider;
pub mod provisioner;
pub mod registry;
pub mod resources;
pub mod scheduler;
pub mod state;
pub mod workload;
