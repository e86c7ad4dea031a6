//! fragalysis-backup-core: tiered backup rotation for the Fragalysis database
//!
//! Backups live on a mounted volume, one directory per tier. A scheduler
//! runs each tier independently.
//!
//! # Architecture
//!
//! ```text
//! dump command → hourly ──promote oldest──▶ daily ──▶ weekly ──▶ monthly
//!                  │                          │          │          │
//!                prune                      prune      prune      prune
//! ```
//!
//! # Modules
//!
//! - `tier`: the tier chain and per-tier rotation policy
//! - `naming`: artifact file names and their timestamps
//! - `lock`: per-tier run lock
//! - `dump`: the external command producing new dumps
//! - `evaluator`: the single produce or promote action of a tier
//! - `retention`: bounding a tier directory to its retention count
//! - `runner`: one invocation, from lock to prune
//! - `recovery`: read-only catalog of the volume and restore selection
//! - `config`: layered configuration (defaults, TOML, environment)
//! - `logging`: structured logging setup
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod config;
pub mod dump;
pub mod error;
pub mod evaluator;
pub mod lock;
pub mod logging;
pub mod naming;
pub mod recovery;
pub mod retention;
pub mod runner;
pub mod tier;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
