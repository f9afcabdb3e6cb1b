//! Gmail REST API integration: wire types, client, and the transform into
//! the storage record shape.

pub mod client;
pub mod model;
pub mod transform;

pub use client::GmailClient;
