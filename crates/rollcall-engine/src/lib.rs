//! rollcall-engine — Identity registry, attendance matching and the ledger.
//!
//! [`Engine`] ties a [`Registry`], an attendance [`Ledger`] and an
//! [`EmbeddingExtractor`](rollcall_core::EmbeddingExtractor) together into
//! the registration and attendance pipelines.

pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod matching;
pub mod registry;
pub mod store;

pub use config::{Config, ConfigError};
pub use engine::{AttendanceOutcome, Engine};
pub use error::{Error, Result};
pub use ledger::{
    parse_session_date, AttendanceLog, AttendanceRecord, AttendanceStatus, CsvLog, Ledger, MemoryLog,
};
pub use matching::{FaceMatch, MatchingEngine, SessionMatches};
pub use registry::{validate_identifier, Registry};
pub use store::{open_identity_store, CsvStore, IdentityStore, MemoryStore, SqliteStore, StoreError, UnavailableStore};
