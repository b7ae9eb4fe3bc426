//! Database connection, schema bootstrap and shared round queries

use sea_orm::sea_query::Index;
use sea_orm::{
    ColumnTrait, ConnectOptions, ConnectionTrait, Database as SeaOrmDatabase, DatabaseConnection,
    DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Schema, SqlErr,
};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::LotteryConfig;
use crate::entity::*;
use crate::error::Result;

/// Lottery database connection wrapper
pub struct Database {
    connection: DatabaseConnection,
}

impl Database {
    /// Get a reference to the database connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    /// Connect with pool settings from the configuration, retrying a few times
    pub async fn new(config: &LotteryConfig) -> Result<Self> {
        info!("Connecting to database: {}", mask_url(&config.database_url));

        let mut attempts = 0;
        const MAX_ATTEMPTS: u32 = 3;
        const RETRY_DELAY: Duration = Duration::from_secs(2);

        loop {
            attempts += 1;

            let mut opt = ConnectOptions::new(config.database_url.clone());
            opt.max_connections(config.max_connections)
                .min_connections(config.max_connections.min(2))
                .connect_timeout(Duration::from_secs(config.connection_timeout_secs))
                .acquire_timeout(Duration::from_secs(30))
                .idle_timeout(Duration::from_secs(300))
                .max_lifetime(Duration::from_secs(3600))
                .sqlx_logging(config.enable_sql_logging)
                .sqlx_logging_level(tracing::log::LevelFilter::Debug);

            match SeaOrmDatabase::connect(opt).await {
                Ok(connection) => {
                    info!(
                        "Database connection established (max connections: {})",
                        config.max_connections
                    );
                    return Ok(Self { connection });
                }
                Err(e) if attempts < MAX_ATTEMPTS => {
                    warn!(
                        "Failed to connect to database (attempt {}/{}): {}",
                        attempts, MAX_ATTEMPTS, e
                    );
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => {
                    error!("Failed to connect to database after {} attempts", MAX_ATTEMPTS);
                    return Err(e.into());
                }
            }
        }
    }

    /// Fresh SQLite in-memory store with the schema applied.
    ///
    /// Every pooled SQLite memory connection is its own database, so the pool
    /// is pinned to a single connection.
    pub async fn in_memory() -> Result<Self> {
        let mut opt = ConnectOptions::new("sqlite::memory:");
        opt.max_connections(1).min_connections(1).sqlx_logging(false);

        let db = Self {
            connection: SeaOrmDatabase::connect(opt).await?,
        };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// Create tables and uniqueness constraints if they do not exist yet.
    ///
    /// The constraints carry the concurrency guarantees: one active round
    /// (`rounds.active_slot`), one ticket per identity per round
    /// (`tickets.round_id, tickets.identity`) and one draw per round
    /// (`drawn_numbers.round_id`).
    pub async fn ensure_schema(&self) -> Result<()> {
        let backend = self.connection.get_database_backend();
        let schema = Schema::new(backend);

        let rounds_table = schema
            .create_table_from_entity(rounds::Entity)
            .if_not_exists()
            .to_owned();

        let tickets_table = schema
            .create_table_from_entity(tickets::Entity)
            .if_not_exists()
            .index(
                Index::create()
                    .name("uq_tickets_round_identity")
                    .col(tickets::Column::RoundId)
                    .col(tickets::Column::Identity)
                    .unique(),
            )
            .to_owned();

        let drawn_table = schema
            .create_table_from_entity(drawn_numbers::Entity)
            .if_not_exists()
            .to_owned();

        for table in [rounds_table, tickets_table, drawn_table] {
            self.connection.execute(backend.build(&table)).await?;
        }

        debug!("Lottery schema is in place ({:?})", backend);
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> Result<()> {
        self.connection.ping().await?;
        Ok(())
    }

    /// The round currently accepting tickets, if any
    pub async fn active_round(&self) -> Result<Option<rounds::Model>> {
        Ok(rounds::Entity::find()
            .filter(rounds::Column::Active.eq(true))
            .order_by_desc(rounds::Column::Id)
            .one(&self.connection)
            .await?)
    }

    /// The most recently created round, active or not.
    ///
    /// Recency follows the store-assigned id; `created_at` comes from the
    /// clock of whichever instance opened the round.
    pub async fn latest_round(&self) -> Result<Option<rounds::Model>> {
        Ok(rounds::Entity::find()
            .order_by_desc(rounds::Column::Id)
            .one(&self.connection)
            .await?)
    }

    /// Number of tickets submitted in a round
    pub async fn ticket_count(&self, round_id: i32) -> Result<u64> {
        Ok(tickets::Entity::find()
            .filter(tickets::Column::RoundId.eq(round_id))
            .count(&self.connection)
            .await?)
    }

    /// Ticket submitted under `identity` in a round, if any
    pub async fn ticket_for_identity(
        &self,
        round_id: i32,
        identity: &str,
    ) -> Result<Option<tickets::Model>> {
        Ok(tickets::Entity::find()
            .filter(tickets::Column::RoundId.eq(round_id))
            .filter(tickets::Column::Identity.eq(identity))
            .one(&self.connection)
            .await?)
    }

    /// Draw recorded for a round, if any
    pub async fn draw_for_round(&self, round_id: i32) -> Result<Option<drawn_numbers::Model>> {
        Ok(drawn_numbers::Entity::find_by_id(round_id)
            .one(&self.connection)
            .await?)
    }
}

/// Whether a store error is a unique or primary key violation
pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

/// Mask sensitive parts of database URL for logging
pub fn mask_url(url: &str) -> String {
    if let Ok(parsed) = url::Url::parse(url) {
        if let Some(password) = parsed.password() {
            return url.replace(password, "****");
        }
        return url.to_string();
    }

    // If parsing fails, mask the credentials between "://" and "@"
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at_pos)) if at_pos > scheme_end => {
            format!("{}****{}", &url[..scheme_end + 3], &url[at_pos..])
        }
        _ => url.to_string(),
    }
}
