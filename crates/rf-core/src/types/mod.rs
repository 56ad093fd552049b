//! Core data types flowing through the pipeline.

pub mod trade;
pub mod update;

pub use trade::*;
pub use update::*;
