//! Reporting: tree summaries, realization tables and run/statistics output.

pub mod format;

pub use format::*;
