//! CLI command implementations.

pub mod cache;
pub mod common;
pub mod config;
pub mod ingest;
pub mod init;
pub mod plan;
