//! Core domain types, configuration and errors for the Tessera action
//! orchestrator.

pub mod config;
pub mod error;
pub mod events;
pub mod state_machine;
pub mod types;

pub use config::TesseraConfig;
pub use error::{Result, TesseraError};
pub use events::ActionCreatedEvent;
pub use state_machine::validate_transition;
pub use types::*;
