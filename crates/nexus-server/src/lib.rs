//! Nexus server library: configuration, routes, and background workers
//! around a [`nexus_core::Manager`]. Split from main.rs for integration tests.

pub mod config;
pub mod endpoints;
pub mod inbound;
pub mod logging;
pub mod routes;
pub mod shutdown;
pub mod state;
