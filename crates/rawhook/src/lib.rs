//! Rawhook host library.
//!
//! This library exposes internal modules for testing purposes.
//! The main entry point is the `rawhook` binary.

pub mod config;
pub mod events;
pub mod host;
pub mod http_client;
pub mod server;
