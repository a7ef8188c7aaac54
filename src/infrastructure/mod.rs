//! Infrastructure layer - External concerns
//!
//! This layer contains:
//! - Config: Configuration loading
//! - Storage: Per-plugin data, state and configuration files
//! - Database: The client session in SQLite
//! - Adapters: Chat client implementations (Matrix, console)

pub mod adapters;
pub mod config;
pub mod database;
pub mod storage;
