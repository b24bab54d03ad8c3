//! Infrastructure layer
//!
//! Handles filesystem layout, external processes and containers.

pub mod buildroot;
pub mod dirs;
pub mod filesystem;
pub mod runner;
pub mod sandbox;
pub mod sign;
