//! The telemon agent: samples host metrics and pushes them to the server.
//!
//! [`dispatcher::Dispatcher`] owns the sampling loop and the worker pool,
//! [`delivery::Delivery`] turns a batch into a signed, optionally
//! compressed and encrypted payload, and [`transport`] carries it over HTTP
//! or gRPC.

pub mod config;
pub mod delivery;
pub mod dispatcher;
pub mod transport;
