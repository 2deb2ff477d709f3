//! prophet-mm: market-making session orchestrator for the Prophet
//! sports-wagering exchange.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod auth;
pub mod config;
pub mod engine;
pub mod exchange;
pub mod realtime;
pub mod strategy;
pub mod types;
