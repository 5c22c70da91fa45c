//! Scorekeeper Core - chat score report reconciliation.
//!
//! This module provides:
//! - League registry with team/map alias resolution and ambiguity tracking
//! - Line parser for free-form score reports
//! - Schedule slot resolution with nearest-week block matching
//! - Idempotent reconciliation with append-only receipts
//! - Cursor-driven poll loop with backfill, run budgets and quota cooldown

pub mod config;
pub mod cooldown;
pub mod cursor;
pub mod error;
pub mod idempotency;
pub mod league_config;
pub mod models;
pub mod notify;
pub mod parser;
pub mod poller;
pub mod receipts;
pub mod reconciler;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod summary;
pub mod transport;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult, TransportError};
pub use league_config::LeagueConfig;
pub use models::{ChatMessage, MessageId, ParsedCandidate, TeamResolution};
pub use poller::Poller;
pub use receipts::{NoteTag, Receipt};
pub use reconciler::{ApplyOutcome, Reconciler, RejectReason};
pub use registry::{RegistryCache, RegistrySnapshot};
pub use summary::RunSummary;
pub use transport::{DmResult, Transport};
