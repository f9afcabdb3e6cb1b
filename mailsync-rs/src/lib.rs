//! mailsync-rs: pull-based mailbox synchronization into SQLite
//!
//! Ingests a Gmail mailbox into a local SQLite store and keeps the copy
//! consistent with the remote over repeated runs.
//!
//! # Features
//!
//! - **Idempotent sync**: every pass is safe to interrupt and re-run;
//!   records are written by upsert and the cursor only advances after the
//!   corresponding writes are durable
//! - **Concurrent fetching**: a bounded worker pool pipelined with the
//!   remote listing, with backpressure from a bounded queue
//! - **Deletion reconciliation**: full listings are compared against the
//!   store to soft-delete messages removed on the remote
//! - **Graceful shutdown**: Ctrl-C drains in-flight work and still commits
//!   what completed; a second Ctrl-C forces an exit
//!
//! # Modules
//!
//! - [`auth`]: stored OAuth2 token loading and refresh
//! - [`config`]: configuration management
//! - [`error`]: error types and classification
//! - [`gmail`]: remote API client, wire types, and record transform
//! - [`message`]: domain record types
//! - [`source`]: the remote-source trait the engine runs against
//! - [`storage`]: SQLite message store and sync checkpoint
//! - [`sync`]: orchestrator, worker pool, and retry policy

pub mod auth;
pub mod config;
pub mod error;
pub mod gmail;
pub mod message;
pub mod source;
pub mod storage;
pub mod sync;

// Re-export commonly used types
pub use config::Config;
pub use error::{Result, SyncError};
pub use storage::MessageStore;
pub use sync::{SyncEngine, SyncReport};
