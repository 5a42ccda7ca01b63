//! # mcphub-core
//!
//! Core types shared by the mcphub crates.
//!
//! This crate provides:
//! - Layered application configuration
//! - Configuration validation results
//! - Common error types

pub mod config;
pub mod error;

pub use config::{Config, IssueSeverity, ValidationIssue, ValidationResult};
pub use error::{Error, Result};
