//! Switchboard - single-threaded select-style HTTP server
//!
//! One event loop multiplexes every client connection, frames minimal
//! HTTP requests out of partial reads, and drains responses with bounded
//! partial writes.

pub mod config;
pub mod http;
pub mod server;
pub mod site;
