//! Command handlers.
//!
//! Each handler loads its inputs, runs the operation and prints the result.

pub mod config;
pub mod simulate;
