//! Integration test suite for Ledgerline.
//!
//! Exercises the crates together: a seeded SQLite database, an in-memory
//! upstream chain, and in-process WebSocket peers driven under paused time.

pub mod helpers;
