//! HTTP protocol implementation.
//!
//! This module implements the HTTP/1.1 side of the server: an incremental
//! request parser, response serialization and the per-connection state
//! machine driven by the event loop.
//!
//! # Architecture
//!
//! - **`connection`**: per-socket state machine, keep-alive bookkeeping
//! - **`parser`**: incremental request parser with size limits and chunked bodies
//! - **`request`**: HTTP request representation and target decoding
//! - **`response`**: HTTP response representation with builder pattern
//! - **`headers`**: ordered, case-insensitive header map
//! - **`writer`**: serializes responses and tracks partial writes
//! - **`mime`**: MIME type detection based on file extensions
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌──────────────────┐
//!        │  ReadingRequest  │ ← read until WouldBlock, parse after every read
//!        └──────┬───────────┘
//!               │ Request complete or rejected
//!               ▼
//!        ┌──────────────────┐
//!        │ AwaitingHandler  │ ← router produces a Response
//!        └──────┬───────────┘
//!               │ Response serialized
//!               ▼
//!        ┌──────────────────┐
//!        │ WritingResponse  │ ← one write per writable event
//!        └──────┬───────────┘
//!               │ Response flushed
//!               ├─ Keep-Alive → ReadingRequest (same connection)
//!               └─ Close → Closing
//! ```

pub mod connection;
pub mod headers;
pub mod mime;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
