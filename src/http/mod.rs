//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Echo client (client.rs)
//!     → injects traceparent from the current span
//!     → GET /echo?message=...
//! Echo server (server.rs)
//!     → request.rs (request ID, request span joined to the caller's trace)
//!     → echo handler (logs, metrics on the meter provider's recorder)
//!     → response with x-request-id
//! ```

pub mod client;
pub mod request;
pub mod server;

pub use client::{ClientError, EchoClient};
pub use request::{extract_context, inject_context, TRACEPARENT, X_REQUEST_ID};
pub use server::{EchoServer, ServerError};
