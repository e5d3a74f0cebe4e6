use civica_core::auth::AuthError;
use civica_core::cache::CacheError;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{}", .0)]
    Custom(String),

    #[error("IO::{:?}: {}", .0, .0)]
    Io(#[from] std::io::Error),

    #[error("Database: {}", .0)]
    Database(#[from] sqlx::Error),

    #[error("Migrate: {}", .0)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Auth: {}", .0)]
    Auth(#[from] AuthError),

    #[error("Cache: {}", .0)]
    Cache(#[from] CacheError),

    #[error("Logging: {}", .0)]
    Logging(String),
}
