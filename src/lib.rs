//! Video Downloader Core Library
//!
//! This library downloads media resources referenced by URLs into a local
//! directory using a bounded queue of cancellable, asynchronous HTTP fetch
//! operations.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`operation`] - Generic cancellable operations with an explicit lifecycle
//! - [`fetch`] - HTTP fetch operations (redirects, auth, size limits, sinks)
//! - [`download`] - Fetches that stream into a unique file in a directory
//! - [`queue`] - FIFO operation queue with bounded concurrency
//! - [`config`] - Read-only application options
//! - [`catalog`] - Video items to download

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod fetch;
pub mod operation;
pub mod queue;
mod user_agent;

// Re-export commonly used types
pub use catalog::{CatalogError, VideoItem};
pub use config::{AppOptions, ConfigError};
pub use download::{DownloadOperation, DownloadTarget, extension_for_media_type};
pub use error::OperationError;
pub use fetch::{FetchLimits, FetchRequest, HttpClient, HttpFetch, HttpFetchOperation};
pub use operation::{
    ExecutionContext, LifecycleError, Operation, OperationId, OperationState, OperationStrategy,
};
pub use queue::{OperationQueue, QueueError};
