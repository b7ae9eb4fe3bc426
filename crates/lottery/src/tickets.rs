//! Ticket admission against the open round

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, Query};
use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityName};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::database::{is_unique_violation, Database};
use crate::entity::{rounds, tickets};
use crate::error::{LotteryError, Result};
use crate::metrics;
use crate::validator::{validate_ticket, NumberSet, TicketCandidate};

/// What the caller gets back for an accepted ticket
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedTicket {
    pub code: String,
    pub round_id: i32,
    pub identity: String,
    pub numbers: NumberSet,
    pub created_at: DateTime<Utc>,
}

/// Ticket admission service
#[derive(Clone)]
pub struct TicketAdmission {
    db: Arc<Database>,
}

impl TicketAdmission {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Validate and record a ticket for the open round
    pub async fn submit_ticket(
        &self,
        identity: &str,
        numbers: &[i64],
        submitter_ref: &str,
    ) -> Result<AcceptedTicket> {
        let candidate = match validate_ticket(Some(identity), Some(numbers)) {
            Ok(candidate) => candidate,
            Err(e) => {
                metrics::record_ticket_rejected(e.code());
                return Err(e.into());
            }
        };
        self.admit(candidate, submitter_ref).await
    }

    /// Record a ticket that already passed validation.
    ///
    /// The duplicate lookup gives the common case a clear answer; the unique
    /// index on `(round_id, identity)` settles concurrent submissions, and
    /// the insert only selects from a round that is still active.
    pub async fn admit(
        &self,
        candidate: TicketCandidate,
        submitter_ref: &str,
    ) -> Result<AcceptedTicket> {
        let result = self.try_admit(candidate, submitter_ref).await;
        match &result {
            Ok(ticket) => {
                info!(
                    "Accepted ticket {} for round {} (identity {})",
                    ticket.code, ticket.round_id, ticket.identity
                );
                metrics::record_ticket_accepted();
            }
            Err(LotteryError::NoActiveRound) => {
                metrics::record_ticket_rejected("no_active_round");
            }
            Err(LotteryError::DuplicateTicket) => {
                metrics::record_ticket_rejected("duplicate_ticket");
            }
            Err(_) => {}
        }
        result
    }

    async fn try_admit(
        &self,
        candidate: TicketCandidate,
        submitter_ref: &str,
    ) -> Result<AcceptedTicket> {
        let round = self
            .db
            .active_round()
            .await?
            .ok_or(LotteryError::NoActiveRound)?;

        if self
            .db
            .ticket_for_identity(round.id, &candidate.identity)
            .await?
            .is_some()
        {
            debug!(
                "Identity {} already holds a ticket in round {}",
                candidate.identity, round.id
            );
            return Err(LotteryError::DuplicateTicket);
        }

        let ticket = AcceptedTicket {
            code: Uuid::new_v4().to_string(),
            round_id: round.id,
            identity: candidate.identity,
            numbers: candidate.numbers,
            created_at: Utc::now(),
        };
        self.insert_ticket(&ticket, submitter_ref).await?;
        Ok(ticket)
    }

    /// `INSERT INTO tickets (...) SELECT ... FROM rounds WHERE id = ? AND active`
    ///
    /// Zero inserted rows means the round closed after it was read.
    async fn insert_ticket(&self, ticket: &AcceptedTicket, submitter_ref: &str) -> Result<()> {
        let connection = self.db.connection();
        let backend = connection.get_database_backend();

        let source = Query::select()
            .expr(Expr::val(ticket.code.clone()))
            .column(rounds::Column::Id)
            .expr(Expr::val(ticket.identity.clone()))
            .expr(Expr::val(ticket.numbers.to_json()?))
            .expr(Expr::val(submitter_ref.to_string()))
            .expr(Expr::val(ticket.created_at))
            .from(rounds::Entity.table_ref())
            .and_where(rounds::Column::Id.eq(ticket.round_id))
            .and_where(rounds::Column::Active.eq(true))
            .to_owned();

        let insert = Query::insert()
            .into_table(tickets::Entity.table_ref())
            .columns([
                tickets::Column::Code,
                tickets::Column::RoundId,
                tickets::Column::Identity,
                tickets::Column::Numbers,
                tickets::Column::SubmitterRef,
                tickets::Column::CreatedAt,
            ])
            .select_from(source)
            .map_err(|e| DbErr::Custom(format!("invalid ticket insert: {}", e)))?
            .to_owned();

        match connection.execute(backend.build(&insert)).await {
            Ok(result) if result.rows_affected() == 0 => {
                warn!(
                    "Round {} closed before ticket {} was stored",
                    ticket.round_id, ticket.code
                );
                Err(LotteryError::NoActiveRound)
            }
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(LotteryError::DuplicateTicket),
            Err(e) => Err(e.into()),
        }
    }
}
