// ABOUTME: Command implementations for the metadata-sync CLI
// ABOUTME: Exports serve, migrate, watch, put and remove

pub mod client;
pub mod serve;

pub use client::{put, remove, watch, ClientOptions};
pub use serve::{migrate, serve};
