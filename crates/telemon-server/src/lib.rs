//! The telemon server: verifies pushed metric batches and stores them.
//!
//! HTTP ([`http`]) and gRPC ([`grpc`]) front-ends extract their
//! transport-specific fields and hand them to the same
//! [`chain::SecurityChain`] before anything reaches storage.

pub mod app;
pub mod chain;
pub mod config;
pub mod grpc;
pub mod http;
pub mod ingest;
pub mod logging;
pub mod state;
