//! Input data that is generated rather than read.

pub mod sample;

pub use sample::generate_sources;
