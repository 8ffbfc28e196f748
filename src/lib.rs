//! Tusk
//!
//! A resumable upload server and client.
//!
//! # Modules
//!
//! - `upload`: Sessions, chunk commits, storage backends, completion events
//! - `client`: Transfer engine with HTTP and in-process transports
//! - `routes`: HTTP surface of the upload protocol
//! - `storage`: S3-compatible object storage client

pub mod client;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod storage;
pub mod upload;
