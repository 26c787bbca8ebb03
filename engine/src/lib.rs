//! Arbiter Engine Library
//!
//! Behavioral middleware that keeps an AI coding assistant on a
//! plan, code, test, complete lifecycle. The binary and the integration
//! tests both build on this library.

/// Configuration management module
pub mod config;

/// Context store: conversation records and tasks
pub mod db;

/// Per-session conversation history with bounded retention
pub mod history;

/// Rate-limit aware retries around judgment calls
pub mod invoker;

/// Judge, decider and elicitor capabilities
pub mod judge;

/// Validated task state machine
pub mod lifecycle;

/// Per-call workflow decisions
pub mod navigator;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
