//! Route handlers

pub mod health;
pub mod predict;
pub mod serving;
