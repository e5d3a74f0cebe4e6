//! `civica` — operator CLI for the session and credential core.

// Import and re-export the `error` module
pub use self::error::{Error, Result};
mod error;

use std::error::Error as _;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use civica_core::auth::password::hash_password_with_cost;
use civica_core::auth::session::SessionManager;
use civica_core::cache::KvCache;
use civica_core::cache::memory::MemoryKvCache;
use civica_core::cache::redis::RedisKvCache;
use civica_core::config::SessionConfig;
use civica_core::context::RequestContext;
use civica_core::store::postgres::PgCredentialStore;
use clap::Parser;
use cli::{Cli, Commands, DbArgs};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};

mod cli;
mod logging;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{e}");
        let mut source = e.source();
        while let Some(cause) = source {
            error!("  caused by: {cause}");
            source = cause.source();
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    logging::init()?;

    let args = Cli::parse();

    match args.command {
        Commands::Version => {
            println!(
                "{} {} (core {})",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
                civica_core::version()
            );
        }
        Commands::Migrate(db) => {
            let pool = connect(&db).await?;
            info!("running database migrations");
            civica_core::migrate::migrate(&pool).await?;
            info!("migrations applied");
        }
        Commands::HashPassword { password, cost } => {
            let password = match password {
                Some(p) => p,
                None => read_password_line()?,
            };
            if password.is_empty() {
                return Err(Error::Custom("password must not be empty".into()));
            }
            println!("{}", hash_password_with_cost(&password, cost)?);
        }
        Commands::PurgeTokens { db, retention_days } => {
            let pool = connect(&db).await?;
            let sessions = session_manager(pool, Arc::new(MemoryKvCache::new()))?;
            let purged = sessions
                .purge_expired(
                    &RequestContext::background(),
                    chrono::Duration::days(i64::from(retention_days)),
                )
                .await?;
            println!("{purged}");
        }
        Commands::RevokeSessions {
            db,
            audience,
            subject,
            redis_url,
        } => {
            let pool = connect(&db).await?;
            let kv: Arc<dyn KvCache> = match redis_url {
                Some(url) => Arc::new(RedisKvCache::connect(&url).await?),
                None => {
                    warn!("no REDIS_URL given; cache markers expire on their own");
                    Arc::new(MemoryKvCache::new())
                }
            };
            let sessions = session_manager(pool, kv)?;
            let revoked = sessions
                .logout_all(&RequestContext::background(), audience, subject)
                .await?;
            println!("{revoked}");
        }
    }

    Ok(())
}

async fn connect(db: &DbArgs) -> Result<PgPool> {
    info!(max_connections = db.max_connections, "connecting to database");
    Ok(PgPoolOptions::new()
        .max_connections(db.max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&db.database_url)
        .await?)
}

fn session_manager(pool: PgPool, kv: Arc<dyn KvCache>) -> Result<SessionManager> {
    let store = Arc::new(PgCredentialStore::new(pool));
    Ok(SessionManager::from_config(store, kv, SessionConfig::from_env())?)
}

fn read_password_line() -> Result<String> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
