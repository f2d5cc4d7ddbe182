//! # RAGVersion
//!
//! **Document version tracking with chunk-level change detection for RAG pipelines.**
//!
//! Every observed state of a tracked file is stored as an immutable version.
//! With chunk tracking enabled, each version is also split into chunks and
//! compared with the previous version by content hash, so only the chunks
//! that actually changed need to be re-embedded downstream.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌─────────────────┐
//! │ Tracker  │──▶│ ChangeDetector│──▶│ Store            │
//! │          │   │ (readers)     │   │ SQLite / Remote  │
//! │          │   └───────────────┘   │ / InMemory       │
//! │          │   ┌───────────────┐   │                  │
//! │          │──▶│ ChunkChange-  │──▶│                  │
//! │          │   │ Detector      │   └─────────────────┘
//! │          │   └───────────────┘
//! │          │──▶ listeners (ChangeEvent)
//! └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use ragversion::{Config, Tracker};
//!
//! # async fn run() -> ragversion::Result<()> {
//! let tracker = Tracker::open(Config::default()).await?;
//! let result = tracker.track("docs/guide.md", None).await?;
//! if let Some(event) = result.event {
//!     println!("{} is now at version {}", event.file_path, event.version_number);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`tracker`] | Public entry point: single-file and directory tracking, queries, restore |
//! | [`detector`] | Create / modify / delete / restore detection per path |
//! | [`chunk_detector`] | Chunk splitting, classification and persistence |
//! | [`reader`] | Content readers by extension (text, markdown, PDF, DOCX) |
//! | [`scan`] | Directory enumeration with include/exclude globs |
//! | [`watch`] | Debounced file system watching that feeds the tracker |
//! | [`events`] | Change listeners and timeout-bounded dispatch |
//! | [`sqlite_store`] | Embedded SQLite backend |
//! | [`remote_store`] | PostgREST-compatible HTTP backend |
//! | [`db`] / [`migrate`] | SQLite pool and schema |
//! | [`compress`] | zstd content compression |
//! | [`logging`] | `tracing-subscriber` setup |
//!
//! Backend-free types (models, errors, chunkers, the [`Store`] trait) live in
//! `ragversion-core` and are re-exported here.

pub mod chunk_detector;
pub mod compress;
pub mod config;
pub mod db;
pub mod detector;
pub mod events;
pub mod logging;
pub mod migrate;
pub mod reader;
pub mod remote_store;
pub mod scan;
pub mod sqlite_store;
pub mod tracker;
pub mod watch;

pub use ragversion_core::{chunk, chunk_diff, hash, line_diff, models, store};
pub use ragversion_core::{Error, ErrorCategory, Result};

pub use config::{load_config, parse_config, Config};
pub use events::{ChangeListener, FnListener, ListenerId, LogListener};
pub use store::Store;
pub use tracker::{store_from_config, TrackDirectoryOptions, Tracker};
pub use watch::{DirectoryWatcher, WatchOptions};
