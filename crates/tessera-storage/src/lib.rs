//! Tessera Storage crate - SQLite persistence for actions.
//!
//! Provides a WAL-mode SQLite database with migrations, the action store
//! with its compare-and-set status primitive, and repositories for
//! correlation tokens and previews.

pub mod actions;
pub mod correlations;
pub mod db;
pub mod migrations;
pub mod previews;

pub use actions::{ActionStore, StaleQuery, TransitionOutcome};
pub use correlations::CorrelationRepository;
pub use db::Database;
pub use previews::PreviewRepository;
