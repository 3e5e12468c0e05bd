//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - logic-tree vocabulary (`TreeKind`, `UncertaintyType`, `UncertaintyValue`, `Filter`)
//! - the hazard grid (`Imt`, `Location`, `HazardGrid`) and source items
//! - realizations and job configuration (`Realization`, `JobConfig`)

pub mod types;

pub use types::*;
