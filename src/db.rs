use crate::error::{Result, TranslationError};
use crate::item::{Item, ItemId, ItemStore, TranslationFields};
use crate::locale::Locale;
use crate::provider::SourceContent;
use crate::tracker::{RequestStatus, RequestStore, TranslationRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, warn};

const IN_FLIGHT: &str = "('submitted', 'polling')";

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect and create tables if they don't exist
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let db = Self { pool };
        db.create_tables().await?;
        info!("✓ Database ready");
        Ok(db)
    }

    async fn create_tables(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS posts (
                id BIGSERIAL PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT ''
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS post_translations (
                post_id BIGINT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
                locale TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (post_id, locale)
            )",
        )
        .execute(&self.pool)
        .await?;

        // No foreign key to posts: a request outlives nothing, it only points
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS translation_requests (
                request_id TEXT PRIMARY KEY,
                post_id BIGINT NOT NULL,
                source_title TEXT NOT NULL,
                source_description TEXT NOT NULL,
                target_locales TEXT[] NOT NULL,
                status TEXT NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL,
                failure_reason TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_translation_requests_in_flight
             ON translation_requests (created_at) WHERE status IN {}",
            IN_FLIGHT
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn item_store(&self) -> PgItemStore {
        PgItemStore {
            pool: self.pool.clone(),
        }
    }

    pub fn request_store(&self) -> PgRequestStore {
        PgRequestStore {
            pool: self.pool.clone(),
        }
    }
}

// ==================== Posts ====================

#[derive(Clone)]
pub struct PgItemStore {
    pool: PgPool,
}

impl PgItemStore {
    /// Insert a post and return its id
    pub async fn create(&self, title: &str, description: &str) -> Result<ItemId> {
        let (id,): (i64,) =
            sqlx::query_as("INSERT INTO posts (title, description) VALUES ($1, $2) RETURNING id")
                .bind(title)
                .bind(description)
                .fetch_one(&self.pool)
                .await?;
        Ok(id)
    }
}

#[async_trait]
impl ItemStore for PgItemStore {
    async fn find(&self, id: ItemId) -> Result<Item> {
        let post: Option<(String, String)> =
            sqlx::query_as("SELECT title, description FROM posts WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        let (title, description) = post.ok_or(TranslationError::ItemNotFound(id))?;

        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT locale, title, description FROM post_translations WHERE post_id = $1",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let translations = rows.into_iter().filter_map(|(locale, title, description)| {
            match Locale::parse(&locale) {
                Ok(locale) => Some((locale, TranslationFields { title, description })),
                Err(_) => {
                    warn!("Post {} has a translation with invalid locale '{}'", id, locale);
                    None
                }
            }
        });

        Ok(Item::new(id, title, description).with_translations(translations))
    }

    async fn save(&self, item: &Item) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM posts WHERE id = $1)")
            .bind(item.id)
            .fetch_one(&mut *tx)
            .await?;
        if !exists {
            return Err(TranslationError::ItemNotFound(item.id));
        }

        // Upsert keyed by (post_id, locale): rewriting the same text is a no-op
        for (locale, fields) in item.translations() {
            sqlx::query(
                "INSERT INTO post_translations (post_id, locale, title, description)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (post_id, locale) DO UPDATE
                 SET title = EXCLUDED.title,
                     description = EXCLUDED.description,
                     updated_at = NOW()
                 WHERE post_translations.title IS DISTINCT FROM EXCLUDED.title
                    OR post_translations.description IS DISTINCT FROM EXCLUDED.description",
            )
            .bind(item.id)
            .bind(locale.code())
            .bind(&fields.title)
            .bind(&fields.description)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

// ==================== Translation requests ====================

#[derive(Clone)]
pub struct PgRequestStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct RequestRow {
    request_id: String,
    post_id: i64,
    source_title: String,
    source_description: String,
    target_locales: Vec<String>,
    status: String,
    attempt_count: i32,
    max_attempts: i32,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RequestRow> for TranslationRequest {
    type Error = TranslationError;

    fn try_from(row: RequestRow) -> Result<Self> {
        let target_locales = row
            .target_locales
            .iter()
            .map(|code| Locale::parse(code))
            .collect::<Result<Vec<_>>>()?;

        Ok(TranslationRequest {
            request_id: row.request_id,
            item_id: row.post_id,
            source_text: SourceContent {
                title: row.source_title,
                description: row.source_description,
            },
            target_locales,
            status: row.status.parse()?,
            attempt_count: row.attempt_count.max(0) as u32,
            max_attempts: row.max_attempts.max(0) as u32,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_REQUEST: &str = "SELECT request_id, post_id, source_title, source_description,
        target_locales, status, attempt_count, max_attempts, failure_reason,
        created_at, updated_at
    FROM translation_requests";

impl PgRequestStore {
    async fn exists(&self, request_id: &str) -> Result<bool> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM translation_requests WHERE request_id = $1)")
                .bind(request_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    /// Turn "no row updated" into `false`, or `RequestNotFound` if the row is missing
    async fn updated(&self, request_id: &str, rows_affected: u64) -> Result<bool> {
        if rows_affected > 0 {
            return Ok(true);
        }
        if self.exists(request_id).await? {
            Ok(false)
        } else {
            Err(TranslationError::RequestNotFound(request_id.to_string()))
        }
    }
}

#[async_trait]
impl RequestStore for PgRequestStore {
    async fn insert(&self, request: &TranslationRequest) -> Result<()> {
        let locales: Vec<String> = request
            .target_locales
            .iter()
            .map(|l| l.code().to_string())
            .collect();

        sqlx::query(
            "INSERT INTO translation_requests
                (request_id, post_id, source_title, source_description, target_locales,
                 status, attempt_count, max_attempts, failure_reason, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (request_id) DO NOTHING",
        )
        .bind(&request.request_id)
        .bind(request.item_id)
        .bind(&request.source_text.title)
        .bind(&request.source_text.description)
        .bind(&locales)
        .bind(request.status.as_str())
        .bind(request.attempt_count as i32)
        .bind(request.max_attempts as i32)
        .bind(&request.failure_reason)
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, request_id: &str) -> Result<Option<TranslationRequest>> {
        let row: Option<RequestRow> =
            sqlx::query_as(&format!("{} WHERE request_id = $1", SELECT_REQUEST))
                .bind(request_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(TranslationRequest::try_from).transpose()
    }

    async fn start_attempt(&self, request_id: &str, attempt: u32) -> Result<RequestStatus> {
        let updated: Option<(String,)> = sqlx::query_as(&format!(
            "UPDATE translation_requests
             SET status = 'polling',
                 attempt_count = GREATEST(attempt_count, $2),
                 updated_at = NOW()
             WHERE request_id = $1 AND status IN {}
             RETURNING status",
            IN_FLIGHT
        ))
        .bind(request_id)
        .bind((attempt + 1) as i32)
        .fetch_optional(&self.pool)
        .await?;

        let status = match updated {
            Some((status,)) => status,
            None => {
                let current: Option<(String,)> =
                    sqlx::query_as("SELECT status FROM translation_requests WHERE request_id = $1")
                        .bind(request_id)
                        .fetch_optional(&self.pool)
                        .await?;
                current
                    .ok_or_else(|| TranslationError::RequestNotFound(request_id.to_string()))?
                    .0
            }
        };
        status.parse()
    }

    async fn try_complete(&self, request_id: &str) -> Result<bool> {
        // Single conditional UPDATE: only the first completion matches the row
        let result = sqlx::query(
            "UPDATE translation_requests
             SET status = 'completed', failure_reason = NULL, updated_at = NOW()
             WHERE request_id = $1 AND status <> 'completed'",
        )
        .bind(request_id)
        .execute(&self.pool)
        .await?;
        self.updated(request_id, result.rows_affected()).await
    }

    async fn mark_failed(&self, request_id: &str, reason: &str) -> Result<bool> {
        let result = sqlx::query(&format!(
            "UPDATE translation_requests
             SET status = 'failed', failure_reason = $2, updated_at = NOW()
             WHERE request_id = $1 AND status IN {}",
            IN_FLIGHT
        ))
        .bind(request_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        self.updated(request_id, result.rows_affected()).await
    }

    async fn in_flight(&self) -> Result<Vec<TranslationRequest>> {
        let rows: Vec<RequestRow> = sqlx::query_as(&format!(
            "{} WHERE status IN {} ORDER BY created_at",
            SELECT_REQUEST, IN_FLIGHT
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TranslationRequest::try_from).collect()
    }
}
