//! Main lottery service implementation

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::{
    auth::Authenticator,
    config::LotteryConfig,
    database::Database,
    handlers::{router, LotteryApi},
    metrics,
};

/// Main lottery service
pub struct LotteryServiceRunner {
    config: LotteryConfig,
    db: Arc<Database>,
    auth: Authenticator,
}

impl LotteryServiceRunner {
    /// Connect to the store and prepare the schema
    pub async fn new(config: LotteryConfig) -> Result<Self> {
        config.validate()?;

        let auth = Authenticator::new(&config.issuer_public_key, &config.audience)?;

        // Initialize database
        let db = Arc::new(Database::new(&config).await?);
        db.ensure_schema().await?;

        metrics::init_metrics()?;

        Ok(Self { config, db, auth })
    }

    /// Run the HTTP server until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.listen_addr;
        let api = Arc::new(LotteryApi::new(self.db.clone(), self.config, self.auth));
        let app = router(api);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Starting lottery service on {}", addr);

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }

    /// Get a handle to the database
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }
}
