//! Data Source Backends
//!
//! This module provides the row source abstraction the export engine reads
//! through, with a PostgreSQL implementation for production jobs and an
//! in-memory implementation that interprets the statements the engine renders.

pub mod core;
pub mod memory;
pub mod postgres;

// Re-export core traits and types
pub use core::*;
pub use memory::{MemoryRow, MemorySource, RecordedStatement};
pub use postgres::{PostgresRow, PostgresSource};
