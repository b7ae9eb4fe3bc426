//! Round lifecycle: open, close, status and draw results
//!
//! Each round moves one way through `Open -> Closed -> ResultsRecorded`.
//! Only one round may be open at a time; the guard lives in the store (a
//! unique index over `rounds.active_slot`), so it holds across any number of
//! service instances sharing the database.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::database::{is_unique_violation, Database};
use crate::entity::{drawn_numbers, rounds};
use crate::error::{LotteryError, Result};
use crate::metrics;
use crate::validator::{validate_draw, NumberSet};

/// Phase of a single round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundPhase {
    Open,
    Closed,
    ResultsRecorded,
}

impl RoundPhase {
    pub fn of(round: &rounds::Model, has_draw: bool) -> Self {
        match (round.active, has_draw) {
            (true, _) => RoundPhase::Open,
            (false, false) => RoundPhase::Closed,
            (false, true) => RoundPhase::ResultsRecorded,
        }
    }
}

/// Outcome of an open request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    /// A new round was created and is accepting tickets
    Opened(rounds::Model),
    /// A round was already open; nothing changed
    AlreadyOpen,
}

/// Read model for the most recently created round
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundStatus {
    pub has_round: bool,
    pub is_active: bool,
    pub ticket_count: u64,
    pub drawn_numbers: Option<NumberSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<RoundPhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl RoundStatus {
    fn no_round() -> Self {
        Self {
            has_round: false,
            is_active: false,
            ticket_count: 0,
            drawn_numbers: None,
            round_id: None,
            phase: None,
            created_at: None,
        }
    }
}

/// Round lifecycle manager
#[derive(Clone)]
pub struct RoundLifecycle {
    db: Arc<Database>,
}

impl RoundLifecycle {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Open a new round unless one is already open.
    ///
    /// A duplicate open is benign: it reports [`OpenOutcome::AlreadyOpen`]
    /// instead of failing, including when two opens race.
    pub async fn open_round(&self) -> Result<OpenOutcome> {
        if let Some(active) = self.db.active_round().await? {
            debug!("Round {} is already open", active.id);
            return Ok(OpenOutcome::AlreadyOpen);
        }
        self.insert_active_round().await
    }

    async fn insert_active_round(&self) -> Result<OpenOutcome> {
        let round = rounds::ActiveModel {
            active: Set(true),
            active_slot: Set(Some(rounds::ACTIVE_SLOT)),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        match round.insert(self.db.connection()).await {
            Ok(round) => {
                info!("Opened round {}", round.id);
                metrics::record_round_opened();
                Ok(OpenOutcome::Opened(round))
            }
            Err(e) if is_unique_violation(&e) => {
                debug!("Concurrent open lost the race; a round is already open");
                Ok(OpenOutcome::AlreadyOpen)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Close whichever round is open. Returns how many rounds were closed;
    /// zero when nothing was open.
    pub async fn close_round(&self) -> Result<u64> {
        let result = rounds::Entity::update_many()
            .col_expr(rounds::Column::Active, Expr::value(false))
            .col_expr(rounds::Column::ActiveSlot, Expr::value(Option::<i32>::None))
            .filter(rounds::Column::Active.eq(true))
            .exec(self.db.connection())
            .await?;

        if result.rows_affected == 0 {
            debug!("Close requested with no open round");
        } else {
            info!("Closed {} round(s)", result.rows_affected);
            metrics::record_rounds_closed(result.rows_affected);
        }
        Ok(result.rows_affected)
    }

    /// Status of the most recently created round
    pub async fn current_round_status(&self) -> Result<RoundStatus> {
        let round = match self.db.latest_round().await? {
            Some(round) => round,
            None => return Ok(RoundStatus::no_round()),
        };

        let ticket_count = self.db.ticket_count(round.id).await?;
        let drawn_numbers = match self.db.draw_for_round(round.id).await? {
            Some(draw) => Some(NumberSet::from_json(&draw.numbers)?),
            None => None,
        };

        Ok(RoundStatus {
            has_round: true,
            is_active: round.active,
            ticket_count,
            phase: Some(RoundPhase::of(&round, drawn_numbers.is_some())),
            drawn_numbers,
            round_id: Some(round.id),
            created_at: Some(round.created_at),
        })
    }

    /// Validate and record the draw for the most recent round
    pub async fn store_results(&self, numbers: &[i64]) -> Result<drawn_numbers::Model> {
        let numbers = validate_draw(numbers)?;
        self.record_draw(numbers).await
    }

    /// Record an already validated draw for the most recent round.
    ///
    /// Fails with [`LotteryError::InvalidState`] when there is no round, the
    /// latest round is still open, or it already has a result.
    pub async fn record_draw(&self, numbers: NumberSet) -> Result<drawn_numbers::Model> {
        let round = self
            .db
            .latest_round()
            .await?
            .ok_or_else(|| LotteryError::InvalidState("no rounds have been recorded".to_string()))?;

        if round.active {
            warn!("Results submitted while round {} is still open", round.id);
            return Err(LotteryError::InvalidState(format!(
                "round {} is still accepting tickets",
                round.id
            )));
        }

        if self.db.draw_for_round(round.id).await?.is_some() {
            return Err(already_drawn(round.id));
        }

        let draw = drawn_numbers::Model {
            round_id: round.id,
            numbers: numbers.to_json()?,
            drawn_at: Utc::now(),
        };
        let active = drawn_numbers::ActiveModel {
            round_id: Set(draw.round_id),
            numbers: Set(draw.numbers.clone()),
            drawn_at: Set(draw.drawn_at),
        };

        match drawn_numbers::Entity::insert(active)
            .exec_without_returning(self.db.connection())
            .await
        {
            Ok(_) => {
                info!("Stored results for round {}: {:?}", round.id, numbers.as_slice());
                metrics::record_results_stored();
                Ok(draw)
            }
            Err(e) if is_unique_violation(&e) => Err(already_drawn(round.id)),
            Err(e) => Err(e.into()),
        }
    }
}

fn already_drawn(round_id: i32) -> LotteryError {
    LotteryError::InvalidState(format!("numbers were already drawn for round {}", round_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn lifecycle() -> RoundLifecycle {
        RoundLifecycle::new(Arc::new(Database::in_memory().await.unwrap()))
    }

    #[tokio::test]
    async fn test_status_without_rounds() {
        let rounds = lifecycle().await;
        let status = rounds.current_round_status().await.unwrap();
        assert_eq!(status, RoundStatus::no_round());
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let rounds = lifecycle().await;

        let first = rounds.open_round().await.unwrap();
        assert!(matches!(first, OpenOutcome::Opened(ref r) if r.active));
        assert_eq!(rounds.open_round().await.unwrap(), OpenOutcome::AlreadyOpen);

        let status = rounds.current_round_status().await.unwrap();
        assert!(status.has_round && status.is_active);
        assert_eq!(status.phase, Some(RoundPhase::Open));
    }

    #[tokio::test]
    async fn test_racing_insert_reports_already_open() {
        let rounds = lifecycle().await;
        rounds.insert_active_round().await.unwrap();
        // bypasses the read check, so only the unique index can stop it
        assert_eq!(
            rounds.insert_active_round().await.unwrap(),
            OpenOutcome::AlreadyOpen
        );
    }

    #[tokio::test]
    async fn test_close_without_open_round_is_noop() {
        let rounds = lifecycle().await;
        assert_eq!(rounds.close_round().await.unwrap(), 0);

        rounds.open_round().await.unwrap();
        assert_eq!(rounds.close_round().await.unwrap(), 1);
        assert_eq!(rounds.close_round().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_closed_round_frees_the_slot() {
        let rounds = lifecycle().await;
        rounds.open_round().await.unwrap();
        rounds.close_round().await.unwrap();

        let second = rounds.open_round().await.unwrap();
        let OpenOutcome::Opened(second) = second else {
            panic!("expected a new round");
        };
        let status = rounds.current_round_status().await.unwrap();
        assert_eq!(status.round_id, Some(second.id));
        assert_eq!(status.ticket_count, 0);
    }

    #[tokio::test]
    async fn test_store_results_transition_order() {
        let rounds = lifecycle().await;

        let err = rounds.store_results(&[1, 2, 3, 4, 5, 6]).await.unwrap_err();
        assert!(matches!(err, LotteryError::InvalidState(_)));

        rounds.open_round().await.unwrap();
        let err = rounds.store_results(&[1, 2, 3, 4, 5, 6]).await.unwrap_err();
        assert!(matches!(err, LotteryError::InvalidState(_)));

        rounds.close_round().await.unwrap();
        let draw = rounds.store_results(&[1, 2, 3, 4, 5, 6, 7]).await.unwrap();
        assert_eq!(draw.numbers, "[1,2,3,4,5,6,7]");

        let err = rounds.store_results(&[8, 9, 10, 11, 12, 13]).await.unwrap_err();
        assert!(matches!(err, LotteryError::InvalidState(_)));

        let status = rounds.current_round_status().await.unwrap();
        assert_eq!(status.phase, Some(RoundPhase::ResultsRecorded));
        assert_eq!(
            status.drawn_numbers.unwrap().as_slice(),
            &[1, 2, 3, 4, 5, 6, 7]
        );
    }

    #[tokio::test]
    async fn test_store_results_validates_before_state() {
        let rounds = lifecycle().await;
        let err = rounds.store_results(&[3, 3]).await.unwrap_err();
        assert!(matches!(err, LotteryError::Validation(_)));
    }

    #[tokio::test]
    async fn test_latest_round_ignores_skewed_clock() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let lifecycle = RoundLifecycle::new(db.clone());
        let admission = crate::tickets::TicketAdmission::new(db.clone());

        // closed round stamped by an instance whose clock runs a minute fast
        let skewed = rounds::ActiveModel {
            active: Set(false),
            active_slot: Set(None),
            created_at: Set(Utc::now() + chrono::Duration::seconds(60)),
            ..Default::default()
        }
        .insert(db.connection())
        .await
        .unwrap();

        let OpenOutcome::Opened(open) = lifecycle.open_round().await.unwrap() else {
            panic!("expected a new round");
        };
        let ticket = admission
            .submit_ticket("X123", &[1, 2, 3, 4, 5, 6], "auth0|alice")
            .await
            .unwrap();
        assert_eq!(ticket.round_id, open.id);

        let status = lifecycle.current_round_status().await.unwrap();
        assert_eq!(status.round_id, Some(open.id));
        assert!(status.is_active);
        assert_eq!(status.ticket_count, 1);

        lifecycle.close_round().await.unwrap();
        let draw = lifecycle.store_results(&[1, 2, 3, 4, 5, 6]).await.unwrap();
        assert_eq!(draw.round_id, open.id);
        assert!(db.draw_for_round(skewed.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_draws_record_once() {
        let rounds = lifecycle().await;
        rounds.open_round().await.unwrap();
        rounds.close_round().await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let rounds = rounds.clone();
                tokio::spawn(async move { rounds.store_results(&[5, 10, 15, 20, 25, 30]).await })
            })
            .collect();

        let mut stored = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => stored += 1,
                Err(LotteryError::InvalidState(_)) => {}
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(stored, 1);
    }
}
