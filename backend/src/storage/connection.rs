use anyhow::Result;
use log::info;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{migrate::MigrateDatabase, Sqlite, SqlitePool};
use std::sync::Arc;

use super::change_feed::ChangeFeed;

/// DbConnection owns the SQLite pool and the change feed every repository publishes to
#[derive(Clone)]
pub struct DbConnection {
    pool: Arc<SqlitePool>,
    feed: ChangeFeed,
}

impl DbConnection {
    /// Open (and create if needed) the database at `url`
    pub async fn init(url: &str) -> Result<Self> {
        if !Sqlite::database_exists(url).await.unwrap_or(false) {
            info!("Creating database at {}", url);
            Sqlite::create_database(url).await?
        }

        let pool = SqlitePool::connect(url).await?;
        Self::from_pool(pool).await
    }

    /// Private in-memory database, used by tests and local demos.
    ///
    /// A single never-recycled connection keeps the memory database alive.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        Self::setup_schema(&pool).await?;
        Ok(Self {
            pool: Arc::new(pool),
            feed: ChangeFeed::new(),
        })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Change notifications for rows written through this connection
    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    async fn setup_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS profiles (
                id TEXT PRIMARY KEY,
                full_name TEXT NOT NULL,
                nim TEXT NOT NULL,
                class_id TEXT,
                payment_status TEXT NOT NULL DEFAULT 'unpaid',
                payment_expires_at TEXT
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_profiles_class_id
            ON profiles(class_id);
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS weekly_dues (
                id TEXT PRIMARY KEY,
                student_id TEXT NOT NULL,
                week_number INTEGER NOT NULL,
                month INTEGER NOT NULL,
                year INTEGER NOT NULL,
                amount INTEGER NOT NULL DEFAULT 5000,
                status TEXT NOT NULL DEFAULT 'unpaid',
                paid_at TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (student_id, month, week_number, year)
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_weekly_dues_student_status
            ON weekly_dues(student_id, status);
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS global_configs (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                access_token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}
