//! # RAGVersion Core
//!
//! Backend-free logic for RAGVersion: data models, the error taxonomy,
//! content hashing, chunking strategies, hash-based chunk classification,
//! unified line diffs, and the [`Store`](store::Store) abstraction with an
//! in-memory implementation.
//!
//! This crate performs no filesystem, network, or database I/O. The
//! `ragversion` crate builds the tracking engine on top of it.

pub mod chunk;
pub mod chunk_diff;
pub mod error;
pub mod hash;
pub mod line_diff;
pub mod models;
pub mod store;

pub use error::{Error, ErrorCategory, Result};
