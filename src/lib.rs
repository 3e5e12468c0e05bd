//! `hazard-tree` library crate.
//!
//! The binary (`hz`) is a thin wrapper around this library so that:
//!
//! - tree parsing, realization and statistics are testable without spawning processes
//! - the scheduler can be driven by other transports than the local thread pool
//! - code stays easy to navigate as the project grows

pub mod aggregate;
pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod io;
pub mod realize;
pub mod report;
pub mod schedule;
pub mod stats;
pub mod tree;
pub mod work;
