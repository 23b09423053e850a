//! mids-trigger: real-time mid-price feed and per-account strategy triggers
//!
//! This library provides the core components for:
//! - A self-healing WebSocket feed that replays its subscriptions on reconnect
//! - A price cache reconciling pushed prices with a pull fallback
//! - Per-account trigger evaluation with at most one decision in flight
//! - Structured logging and Prometheus metrics

pub mod cache;
pub mod cli;
pub mod config;
pub mod engine;
pub mod feed;
pub mod strategy;
pub mod telemetry;
pub mod ws;
