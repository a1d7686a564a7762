//! silta-core - Core types for the SILTA bridge runtime
//!
//! This crate provides the foundational types shared between the SILTA
//! bridge and protocol bindings (gRPC, queue, HTTP, ...):
//!
//! - [`Adapter`] trait - lifecycle + message I/O contract every transport
//!   binding must satisfy
//! - [`AdapterRuntime`] - shared state machine and statistics recorder
//!   adapters embed instead of re-implementing bookkeeping
//! - [`Message`] - the universal bridge envelope (zero-copy payload)
//! - [`AdapterError`] - error type for adapter operations
//!
//! # Why this crate exists
//!
//! Out-of-process protocol bindings need to implement the [`Adapter`]
//! trait and exchange [`Message`] values. Without `silta-core` they would
//! depend on the full `silta-bridge` runtime, which in turn may want to
//! host those bindings, creating a cyclic dependency:
//!
//! ```text
//! silta-core ◄── silta-bridge
//!     ▲
//!     └────────── protocol bindings
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(missing_docs)]

/// Lifecycle contract, status and statistics for transport adapters
pub mod adapter;
mod error;
/// The universal message envelope
pub mod message;
/// Typed adapter registry keyed by adapter name
pub mod registry;

pub use adapter::{
    Adapter, AdapterConfig, AdapterRuntime, AdapterState, AdapterStats, AdapterStatus,
    RateLimit, RetryConfig,
};
pub use error::AdapterError;
pub use message::{epoch_millis, Message, MessageId};
pub use registry::AdapterRegistry;
