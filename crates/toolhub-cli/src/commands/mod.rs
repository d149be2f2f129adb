//! CLI command implementations.

pub mod config;
pub mod doctor;
pub mod invoke;
pub mod market;
pub mod servers;
