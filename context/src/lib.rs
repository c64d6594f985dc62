//! Conversation memory for the relay.
//!
//! This crate provides:
//! - Token estimation per model via tiktoken
//! - Model-specific context window limits
//! - The bounded history buffer and its truncation policy
//! - Archival of older turns to durable storage
//! - Per-session state keyed by chat
//!
//! # Architecture
//!
//! ```text
//! SessionStore
//! ├── sessions: SessionId -> Session
//! │   ├── history: HistoryBuffer (entries + designated system prompt)
//! │   └── models: ModelSelection (chat / image model)
//! ├── registry: ModelRegistry (limits per model)
//! └── archiver: Archiver -> dyn ArchiveSink
//! ```

mod archive;
mod atomic_write;
mod history;
mod model_limits;
mod session;
mod token_counter;

pub use archive::{ArchiveBatch, ArchiveError, ArchiveKey, ArchiveSink, Archiver, FsArchiveSink};
pub use atomic_write::{AtomicWriteOptions, atomic_write, atomic_write_with_options};
pub use history::{
    DEFAULT_ARCHIVE_THRESHOLD, DEFAULT_CAPACITY_COUNT, DEFAULT_CAPACITY_TOKENS, HistoryBuffer,
    HistorySettings, InsertOutcome,
};
pub use model_limits::{ModelLimits, ModelLimitsSource, ModelRegistry, ResolvedModelLimits};
pub use session::{SessionDefaults, SessionStore};
pub use token_counter::{Encoding, TokenCounter, estimate};
