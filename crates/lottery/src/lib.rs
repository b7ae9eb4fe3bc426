//! Round and ticket lifecycle for a 6/45 number lottery
//!
//! This crate provides:
//! - Round lifecycle: open, close, status and draw results
//! - Ticket admission with one ticket per identity per round
//! - Result lookup by public ticket code
//! - HTTP API with JWT Ed25519 authentication
//! - SeaORM entities for PostgreSQL, MySQL/TiDB and SQLite
//!
//! Can be used as a library or standalone binary

pub mod auth;
pub mod config;
pub mod database;
pub mod entity;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod rate_limit;
pub mod results;
pub mod rounds;
pub mod service;
pub mod tickets;
pub mod validator;

// Re-export commonly used types
pub use auth::{create_jwt, AuthInfo, Authenticator, Claims};
pub use config::LotteryConfig;
pub use database::Database;
pub use error::{LotteryError, Result};
pub use handlers::{router, LotteryApi};
pub use results::{match_ticket, MatchResult, Resolution, ResultResolver};
pub use rounds::{OpenOutcome, RoundLifecycle, RoundPhase, RoundStatus};
pub use service::LotteryServiceRunner;
pub use tickets::{AcceptedTicket, TicketAdmission};
pub use validator::{NumberSet, ValidationError};
