// ABOUTME: Library root for metadata-sync
// ABOUTME: Postgres-backed record stores and CLI commands around the sync engine

pub mod commands;
pub mod config;
pub mod kinds;
pub mod postgres;
pub mod shutdown;
pub mod utils;
