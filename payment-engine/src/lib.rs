//! Payment Engine - Client payment recording with drift detection and reconciliation.

pub mod config;
pub mod models;
pub mod services;
pub mod startup;
