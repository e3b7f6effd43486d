// Copyright 2023 Remi Bernotavicius

use diesel::prelude::Connection as _;
use diesel::r2d2::ConnectionManager;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::error::Error;
use std::path::Path;

pub mod models;
pub mod schema;

pub type Connection = diesel::sqlite::SqliteConnection;
pub type Pool = diesel::r2d2::Pool<ConnectionManager<Connection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

type BoxError = Box<dyn Error + Send + Sync + 'static>;

pub fn establish_connection(path: impl AsRef<Path>) -> Result<Connection, BoxError> {
    let url = path
        .as_ref()
        .to_str()
        .ok_or("database path is not valid UTF-8")?;
    let mut connection = Connection::establish(url)?;
    connection.run_pending_migrations(MIGRATIONS)?;
    Ok(connection)
}

/// Pool for the HTTP server. Migrations run once before the pool is handed
/// out; SQLite tolerates only one writer so the pool stays small.
pub fn establish_pool(path: impl AsRef<Path>) -> Result<Pool, BoxError> {
    let url = path
        .as_ref()
        .to_str()
        .ok_or("database path is not valid UTF-8")?;

    let mut connection = Connection::establish(url)?;
    connection.run_pending_migrations(MIGRATIONS)?;
    drop(connection);

    let manager = ConnectionManager::<Connection>::new(url);
    Ok(Pool::builder().max_size(4).build(manager)?)
}

/// In-memory pool for handler tests. Size one, so every checkout sees the
/// same SQLite database.
#[cfg(test)]
pub fn test_pool() -> Pool {
    let manager = ConnectionManager::<Connection>::new(":memory:");
    let pool = Pool::builder().max_size(1).build(manager).unwrap();
    pool.get().unwrap().run_pending_migrations(MIGRATIONS).unwrap();
    pool
}

#[test]
fn migrations() {
    let mut conn = Connection::establish(":memory:").unwrap();
    let applied = conn.run_pending_migrations(MIGRATIONS).unwrap();
    assert!(!applied.is_empty());
    conn.revert_all_migrations(MIGRATIONS).unwrap();
    assert!(conn.has_pending_migration(MIGRATIONS).unwrap());
}
