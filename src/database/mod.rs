use crate::assets::MigrationAssets;
use crate::config::DatabaseConfig;
use crate::feeds::cache::{CacheInvalidationSender, InvalidationEvent};
use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{migrate::MigrateDatabase, Pool, Sqlite};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub mod channels;
pub mod episodes;
pub mod queue;

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
    /// Serializes claim-next transactions so the select-then-update pair is
    /// linearizable across workers.
    claim_lock: Arc<Mutex<()>>,
    invalidation_tx: CacheInvalidationSender,
}

impl Database {
    pub async fn new(
        config: &DatabaseConfig,
        invalidation_tx: CacheInvalidationSender,
    ) -> Result<Self> {
        // Create database if it doesn't exist (for SQLite)
        if !Sqlite::database_exists(&config.url).await? {
            Sqlite::create_database(&config.url).await?;
        }

        // Cascade deletes rely on foreign keys being enforced on every
        // pooled connection
        let options = SqliteConnectOptions::from_str(&config.url)?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.unwrap_or(10))
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            claim_lock: Arc::new(Mutex::new(())),
            invalidation_tx,
        })
    }

    pub async fn migrate(&self) -> Result<()> {
        self.run_embedded_migrations().await?;
        Ok(())
    }

    async fn run_embedded_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _sqlx_migrations (
                version BIGINT PRIMARY KEY,
                description TEXT NOT NULL,
                installed_on TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                success BOOLEAN NOT NULL,
                checksum BLOB NOT NULL,
                execution_time BIGINT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let migrations = MigrationAssets::get_migrations();

        for (name, content) in migrations {
            // Extract version from filename (e.g., "001_initial_schema.sql" -> 1)
            let version: i64 = name
                .split('_')
                .next()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(|| {
                    use std::collections::hash_map::DefaultHasher;
                    use std::hash::{Hash, Hasher};
                    let mut hasher = DefaultHasher::new();
                    name.hash(&mut hasher);
                    hasher.finish() as i64
                });

            let existing = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM _sqlx_migrations WHERE version = ? AND success = true",
            )
            .bind(version)
            .fetch_one(&self.pool)
            .await?;

            if existing > 0 {
                continue;
            }

            let start = std::time::Instant::now();
            let mut transaction = self.pool.begin().await?;

            match sqlx::raw_sql(&content).execute(&mut *transaction).await {
                Ok(_) => {
                    let execution_time = start.elapsed().as_millis() as i64;
                    let checksum = Self::calculate_checksum(&content);

                    sqlx::query(
                        r#"
                        INSERT INTO _sqlx_migrations (version, description, success, checksum, execution_time)
                        VALUES (?, ?, true, ?, ?)
                        "#,
                    )
                    .bind(version)
                    .bind(&name)
                    .bind(&checksum)
                    .bind(execution_time)
                    .execute(&mut *transaction)
                    .await?;

                    transaction.commit().await?;
                    tracing::info!("Applied migration: {} ({}ms)", name, execution_time);
                }
                Err(e) => {
                    transaction.rollback().await?;
                    return Err(anyhow::anyhow!("Migration {} failed: {}", name, e));
                }
            }
        }

        Ok(())
    }

    fn calculate_checksum(content: &str) -> Vec<u8> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        content.hash(&mut hasher);
        hasher.finish().to_be_bytes().to_vec()
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub(crate) async fn acquire_claim_lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.claim_lock.lock().await
    }

    /// Signal the feed cache after a committed write. Ordering contract:
    /// callers invoke this only once the transaction has committed.
    pub(crate) fn invalidate_channel(&self, channel_id: Uuid) {
        let _ = self.invalidation_tx.send(InvalidationEvent::Channel(channel_id));
    }

    pub(crate) fn invalidate_all(&self) {
        let _ = self.invalidation_tx.send(InvalidationEvent::All);
    }
}
