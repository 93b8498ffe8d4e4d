//! Data layer for PlayerVault (`PostgreSQL` behind a bounded pool).
//!
//! The cache keeps the hot copy of each online player's record in memory;
//! this crate owns the cold copy. Every read and write goes through the
//! [`RecordStore`] trait so the coherence core never sees `PostgreSQL`
//! directly and can be tested against an in-memory double.
//!
//! # Architecture
//!
//! ```text
//! Player Cache (playervault-core)
//!     |
//!     +-- RecordStore trait  <-- PgRecordStore
//!                                  |
//!                                  +-- DbPool (bounded sqlx pool)
//!                                        |
//!                                        +-- PostgreSQL
//! ```
//!
//! # Modules
//!
//! - [`pool`] -- `PostgreSQL` connection pool and configuration
//! - [`store`] -- the [`RecordStore`] capability trait
//! - [`record_store`] -- the `PostgreSQL` implementation
//! - [`error`] -- shared error types

pub mod error;
pub mod pool;
pub mod record_store;
pub mod store;

// Re-export primary types for convenience.
pub use error::StoreError;
pub use pool::{DbConfig, DbPool};
pub use record_store::PgRecordStore;
pub use store::RecordStore;
