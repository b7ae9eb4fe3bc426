//! Lottery service binary

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dotenvy::dotenv;
use lottery::auth::{create_jwt, new_claims, ADMIN_SCOPE, PARTICIPANT_SCOPE};
use lottery::database::mask_url;
use lottery::logging::{init_logging, LogDestination};
use lottery::{LotteryConfig, LotteryServiceRunner};
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[clap(name = "lottery")]
#[clap(about = "Lottery round service - rounds, tickets and draw results over HTTP")]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API
    Serve(ServeArgs),
    /// Mint a signed bearer token for local testing and admin scripts
    Token(TokenArgs),
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
    /// Database connection URL (can also be set via DATABASE_URL env var)
    #[clap(long, env = "DATABASE_URL")]
    database_url: String,

    /// Listen address for the HTTP server
    #[clap(long, default_value = "0.0.0.0:3000", env = "LISTEN_ADDR")]
    listen_addr: SocketAddr,

    /// Public base URL used in ticket receipt links
    #[clap(long, default_value = "http://localhost:3000", env = "BASE_URL")]
    base_url: String,

    /// Hex-encoded Ed25519 public key of the token issuer
    #[clap(long, env = "AUTH_ISSUER_PUBLIC_KEY")]
    issuer_public_key: String,

    /// Expected token audience
    #[clap(long, default_value = "loto-645-api", env = "AUTH_AUDIENCE")]
    audience: String,

    /// Maximum database connections in pool
    #[clap(long, default_value_t = 20, env = "DATABASE_MAX_CONNECTIONS")]
    max_connections: u32,

    /// Database connection timeout in seconds
    #[clap(long, default_value_t = 10, env = "DATABASE_CONNECT_TIMEOUT_SECS")]
    connect_timeout_secs: u64,

    /// Log SQL statements at debug level
    #[clap(long, env = "DATABASE_SQL_LOGGING")]
    sql_logging: bool,

    /// Requests allowed per client address in one rate-limit window
    #[clap(long, default_value_t = 100, env = "RATE_LIMIT_MAX_REQUESTS")]
    rate_limit_max_requests: u32,

    /// Rate-limit window in seconds
    #[clap(long, default_value_t = 900, env = "RATE_LIMIT_WINDOW_SECS")]
    rate_limit_window_secs: u64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum TokenScope {
    Participant,
    Admin,
}

#[derive(clap::Args, Debug)]
struct TokenArgs {
    /// Hex-encoded Ed25519 secret key of the token issuer
    #[clap(long, env = "AUTH_ISSUER_SECRET_KEY")]
    issuer_secret_key: String,

    /// Token subject (participant id or machine client id)
    #[clap(long)]
    subject: String,

    #[clap(long, value_enum, default_value = "participant")]
    scope: TokenScope,

    #[clap(long, default_value = "loto-645-api", env = "AUTH_AUDIENCE")]
    audience: String,

    #[clap(long)]
    name: Option<String>,

    #[clap(long)]
    email: Option<String>,

    /// Token lifetime in seconds
    #[clap(long, default_value_t = 3600)]
    ttl_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenv().ok();

    match Cli::parse().command {
        Command::Serve(args) => serve(args).await,
        Command::Token(args) => token(args),
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let _guard = init_logging(&LogDestination::from_env())?;

    tracing::info!("Starting lottery service");
    tracing::info!("Database URL: {}", mask_url(&args.database_url));
    tracing::info!("Listen address: {}", args.listen_addr);
    tracing::info!("Base URL: {}", args.base_url);

    let config = LotteryConfig {
        database_url: args.database_url,
        listen_addr: args.listen_addr,
        base_url: args.base_url,
        issuer_public_key: args.issuer_public_key,
        audience: args.audience,
        max_connections: args.max_connections,
        connection_timeout_secs: args.connect_timeout_secs,
        enable_sql_logging: args.sql_logging,
        rate_limit_max_requests: args.rate_limit_max_requests,
        rate_limit_window_secs: args.rate_limit_window_secs,
    };

    let service = LotteryServiceRunner::new(config).await?;

    // Handle shutdown gracefully
    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received shutdown signal"),
            Err(e) => {
                tracing::error!("Failed to install CTRL+C signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    if let Err(e) = service.run(shutdown).await {
        tracing::error!("Service error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Lottery service stopped");
    Ok(())
}

fn token(args: TokenArgs) -> Result<()> {
    let secret: [u8; 32] = hex::decode(args.issuer_secret_key.trim())?
        .try_into()
        .map_err(|_| anyhow!("Issuer secret key must be 32 bytes"))?;

    let scope = match args.scope {
        TokenScope::Participant => PARTICIPANT_SCOPE,
        TokenScope::Admin => ADMIN_SCOPE,
    };

    let mut claims = new_claims(&args.subject, &args.audience, scope, args.ttl_secs)?;
    claims.name = args.name;
    claims.email = args.email;

    println!("{}", create_jwt(&secret, &claims)?);
    Ok(())
}
