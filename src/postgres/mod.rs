// ABOUTME: PostgreSQL connectivity for the metadata store
// ABOUTME: TLS policy, connect with retry, and schema migration

pub mod connection;
pub mod schema;

pub use connection::{connect, connect_with_retry, init_tls_policy};
pub use schema::migrate;
