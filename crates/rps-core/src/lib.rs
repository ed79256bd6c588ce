//! Core types and utilities for the rock/paper/scissors classifier.
//!
//! This crate provides the error type, configuration, shared domain types,
//! metrics and device selection used across the workspace.

pub mod error;
pub mod types;
pub mod config;
pub mod metrics;
pub mod backend;
pub mod cli;

pub use error::{Error, Result};
pub use types::*;
pub use config::*;
pub use metrics::*;
pub use backend::*;
pub use cli::*;
