//! Ticket result lookup by public code

use chrono::{DateTime, Utc};
use sea_orm::EntityTrait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::database::Database;
use crate::entity::{rounds, tickets};
use crate::error::Result;
use crate::validator::NumberSet;

/// Matches of one ticket against a draw.
///
/// A jackpot is a full match of the ticket's own numbers, so a 7-number
/// ticket needs all 7 drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub matches: usize,
    pub jackpot: bool,
}

/// Compare ticket numbers with drawn numbers
pub fn match_ticket(ticket: &NumberSet, drawn: &NumberSet) -> MatchResult {
    let matches = ticket.intersection_len(drawn);
    MatchResult {
        matches,
        jackpot: matches == ticket.len(),
    }
}

/// Ticket details shown alongside a result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketView {
    pub code: String,
    pub identity: String,
    pub numbers: NumberSet,
    pub created_at: DateTime<Utc>,
    pub round_id: i32,
    pub round_active: bool,
}

/// Outcome of a lookup; an unknown code is a normal answer, not an error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Resolution {
    #[serde(rename_all = "camelCase")]
    NotFound { code: String },

    #[serde(rename_all = "camelCase")]
    Pending { ticket: TicketView },

    #[serde(rename_all = "camelCase")]
    Drawn {
        ticket: TicketView,
        drawn_numbers: NumberSet,
        drawn_at: DateTime<Utc>,
        matches: usize,
        jackpot: bool,
    },
}

/// Result resolver
#[derive(Clone)]
pub struct ResultResolver {
    db: Arc<Database>,
}

impl ResultResolver {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Look up a ticket by code and compare it with its round's draw, if any
    pub async fn resolve(&self, code: &str) -> Result<Resolution> {
        let found = tickets::Entity::find_by_id(code.to_string())
            .find_also_related(rounds::Entity)
            .one(self.db.connection())
            .await?;

        let (ticket, round) = match found {
            Some(found) => found,
            None => {
                debug!("No ticket with code {}", code);
                return Ok(Resolution::NotFound {
                    code: code.to_string(),
                });
            }
        };

        let round_active = match &round {
            Some(round) => round.active,
            None => {
                warn!("Ticket {} references missing round {}", ticket.code, ticket.round_id);
                false
            }
        };

        let view = TicketView {
            numbers: NumberSet::from_json(&ticket.numbers)?,
            code: ticket.code,
            identity: ticket.identity,
            created_at: ticket.created_at,
            round_id: ticket.round_id,
            round_active,
        };

        let draw = match self.db.draw_for_round(view.round_id).await? {
            Some(draw) => draw,
            None => return Ok(Resolution::Pending { ticket: view }),
        };

        let drawn_numbers = NumberSet::from_json(&draw.numbers)?;
        let MatchResult { matches, jackpot } = match_ticket(&view.numbers, &drawn_numbers);

        Ok(Resolution::Drawn {
            ticket: view,
            drawn_numbers,
            drawn_at: draw.drawn_at,
            matches,
            jackpot,
        })
    }
}
