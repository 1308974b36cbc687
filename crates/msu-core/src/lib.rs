//! MSU Study Reporter Core Library
//!
//! This library provides the host-side plumbing around the study telemetry:
//! - Exit codes for CLI operations
//! - Structured logging setup
//! - Configuration and store wiring
//! - Output rendering for status and report views
//! - The scheduled report trigger loop
//!
//! The binary entry point is in `main.rs`.

pub mod daemon;
pub mod exit_codes;
pub mod logging;
pub mod output;
pub mod runtime;
