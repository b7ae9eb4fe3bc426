//! Error types for the lottery service

use thiserror::Error;

use crate::validator::ValidationError;

/// Error type for round, ticket and result operations
#[derive(Error, Debug)]
pub enum LotteryError {
    /// Malformed identity or numbers, detected before any write
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Ticket submitted while no round accepts tickets
    #[error("No active round is accepting tickets")]
    NoActiveRound,

    /// A ticket with this identity already exists in the current round
    #[error("A ticket with this identity number already exists in the current round")]
    DuplicateTicket,

    /// Requested action does not fit the round's phase
    #[error("Invalid round state: {0}")]
    InvalidState(String),

    /// Missing or invalid credentials
    #[error("Authentication required: {0}")]
    Unauthenticated(String),

    /// Valid credentials without the required scope
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Database connection or operation error
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Stored number sequence could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LotteryError {
    /// Whether the failure belongs to infrastructure rather than the caller
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            LotteryError::Database(_) | LotteryError::Serialization(_) | LotteryError::Config(_)
        )
    }
}

/// Result type alias for lottery operations
pub type Result<T> = std::result::Result<T, LotteryError>;
