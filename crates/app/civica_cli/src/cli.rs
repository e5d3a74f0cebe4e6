use civica_core::models::auth::Audience;
use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "civica", version, about = "Civica session and credential operations")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print version information.
    Version,

    /// Apply pending database migrations.
    Migrate(DbArgs),

    /// Hash a password for identity provisioning. Reads stdin when `--password` is omitted.
    HashPassword {
        #[arg(long)]
        password: Option<String>,

        /// bcrypt cost factor.
        #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u32).range(4..=31))]
        cost: u32,
    },

    /// Delete refresh-token records that expired before the retention window.
    PurgeTokens {
        #[command(flatten)]
        db: DbArgs,

        /// Keep expired records for this many days (audit trail).
        #[arg(long, default_value_t = 7)]
        retention_days: u32,
    },

    /// Revoke every live session of one subject.
    RevokeSessions {
        #[command(flatten)]
        db: DbArgs,

        /// `backoffice` or `citizen`.
        #[arg(long)]
        audience: Audience,

        /// Identity id.
        #[arg(long)]
        subject: Uuid,

        /// Redis URL of the revocation cache. Without it only durable records are revoked.
        #[arg(long, env = "REDIS_URL")]
        redis_url: Option<String>,
    },
}

#[derive(Args, Debug)]
pub struct DbArgs {
    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/civica"
    )]
    pub database_url: String,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 2)]
    pub max_connections: u32,
}
