//! GDSync Core - Domain logic and port definitions
//!
//! This crate contains the hexagonal architecture core with:
//! - Domain entities (`FileInfo`, `Change`, `SyncState`)
//! - Validated newtypes (`FileId`, `ChangeToken`)
//! - Port definitions (traits implemented by adapters)
//! - Application configuration

pub mod config;
pub mod domain;
pub mod ports;
