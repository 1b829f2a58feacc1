//! Receipt backup library
//!
//! Export, restore and lifecycle management of remote receipt backups.
//! Exposed as a library for the CLI and for integration tests.

pub mod app;
pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod remote;
pub mod services;
pub mod storage;
