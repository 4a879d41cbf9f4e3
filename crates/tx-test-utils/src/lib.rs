//! Shared test utilities for `tx` integration tests.
//!
//! `tx` is local-first: there is no server to containerize, so each test
//! gets its own SQLite database file in a temporary directory with
//! migrations applied. No shared fixture or container lifecycle is needed.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tempfile::TempDir;

use tx_db::pool;

/// A throwaway SQLite database for a single test.
///
/// Keeps the backing [`TempDir`] alive for the lifetime of the pool; the
/// directory (and the `.db` file inside it) is removed on drop.
pub struct TestDb {
    pub pool: SqlitePool,
    _dir: TempDir,
}

/// Create a fresh SQLite database with migrations applied.
pub async fn create_test_db() -> TestDb {
    let dir = TempDir::new().expect("failed to create temp dir for test db");
    let db_path = dir.path().join("tx_test.db");
    let url = format!("sqlite://{}?mode=rwc", db_path.display());

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .unwrap_or_else(|e| panic!("failed to connect to temp database {url}: {e}"));

    pool::run_migrations(&pool)
        .await
        .expect("migrations should succeed");

    TestDb { pool, _dir: dir }
}

/// Create an in-memory SQLite database with migrations applied.
///
/// Faster than [`create_test_db`] for tests that don't need to inspect the
/// file on disk. Uses a private (non-shared-cache) in-memory connection, so
/// the pool must stay at one connection.
pub async fn create_memory_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("failed to open in-memory sqlite database");

    pool::run_migrations(&pool)
        .await
        .expect("migrations should succeed");

    pool
}
