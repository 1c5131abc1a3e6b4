//! HTTP protocol implementation.
//!
//! A deliberately small HTTP/1.x subset: one request per connection, no
//! keep-alive, no chunked encoding. Every response carries
//! `Connection: close` and the connection is closed once it has been sent.
//!
//! # Architecture
//!
//! - **`connection`**: per-socket buffers and the request/response state machine
//! - **`parser`**: frames a request out of the read buffer at CRLFCRLF
//! - **`request`**: the parsed request and its method
//! - **`form`**: `key=value&key2` body splitting
//! - **`router`**: exact `(method, path)` dispatch with a 404 default
//! - **`response`**: status codes and the queued response fragments
//! - **`writer`**: bounded, resumable sends of the concatenated response
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌──────────────────┐
//!        │ AwaitingRequest  │ ← Buffer bytes until CRLFCRLF
//!        └──────┬───────────┘
//!               │ Request framed, handler queued output
//!               ▼
//!        ┌──────────────────┐
//!        │  PendingOutput   │ ← Fragments waiting for a writable event
//!        └──────┬───────────┘
//!               │ First writable event: fragments concatenated
//!               ▼
//!        ┌──────────────────┐
//!        │    Draining      │ ← One bounded chunk per writable event
//!        └──────┬───────────┘
//!               │ Everything sent
//!               ▼
//!        ┌──────────────────┐
//!        │     Closed       │
//!        └──────────────────┘
//! ```
//!
//! Any state moves straight to `Closed` on an I/O error, and
//! `AwaitingRequest` does too when the peer disconnects.

pub mod connection;
pub mod form;
pub mod parser;
pub mod request;
pub mod response;
pub mod router;
pub mod writer;
