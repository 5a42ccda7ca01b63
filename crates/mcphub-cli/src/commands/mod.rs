//! CLI command implementations.

pub mod call;
pub mod catalog;
pub mod servers;
