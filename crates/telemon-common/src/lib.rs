//! Shared building blocks for the telemon agent and server.
//!
//! Holds the metric data model, the protobuf wire messages, the bounded
//! [`retry`] executor used on both sides of the pipeline, the gzip codec
//! used for payload compression, the shutdown [`lifecycle`] token and the
//! [`wire`] header names both sides agree on.

pub mod compress;
pub mod lifecycle;
pub mod retry;
pub mod types;
pub mod wire;

pub mod proto {
    #![allow(clippy::pedantic)]
    #![allow(clippy::missing_errors_doc)]
    #![allow(clippy::doc_markdown)]
    #![allow(clippy::default_trait_access)]
    tonic::include_proto!("telemon");
}
