//! Relational access for the generation pipeline
//!
//! [`GenerationRepository`] is the seam the request handler, the worker and
//! the sweep depend on. Every method that writes more than one row does so
//! atomically; the terminal transitions are conditional on the row still
//! being `processing`, which is what makes duplicate deliveries harmless.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{error::DatabaseError, id::new_id};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use tracing::{info, warn};

use crate::{
    error::{GenerationError, GenerationResult},
    models::{
        DEBIT_REASON, FileRecord, GeneratedPhoto, GenerationStatus, NewFile, OriginalPhoto,
        REFUND_REASON, Theme, User,
    },
};

#[async_trait]
pub trait GenerationRepository: Send + Sync {
    /// Debit one credit and create the `processing` row, all or nothing
    ///
    /// Fails with `NotFound` for an unknown user or theme, for an original
    /// photo outside the user's albums, and with `InsufficientCredits` when
    /// the balance is not positive.
    async fn start_generation(
        &self,
        user_id: &str,
        original_photo_id: &str,
        theme_id: &str,
    ) -> GenerationResult<GeneratedPhoto>;

    async fn find_user(&self, user_id: &str) -> GenerationResult<Option<User>>;

    async fn find_generated_photo(&self, id: &str) -> GenerationResult<Option<GeneratedPhoto>>;

    /// Original photo with its file, excluding soft-deleted photos
    async fn find_original_photo(&self, id: &str) -> GenerationResult<Option<OriginalPhoto>>;

    async fn find_theme(&self, id: &str) -> GenerationResult<Option<Theme>>;

    async fn find_file(&self, id: &str) -> GenerationResult<Option<FileRecord>>;

    /// Create the file row and move the photo to `finished`
    ///
    /// Returns `false`, leaving no file row behind, when the photo is no
    /// longer `processing`.
    async fn finish_generation(&self, generated_id: &str, file: &NewFile)
    -> GenerationResult<bool>;

    /// Move the photo to `failed`, optionally refunding its credit
    ///
    /// Returns `false` when the photo is no longer `processing`; no refund is
    /// made in that case.
    async fn fail_generation(
        &self,
        generated_id: &str,
        message: &str,
        refund: bool,
    ) -> GenerationResult<bool>;

    /// Fail every `processing` photo started before `started_before`
    async fn fail_stale_generations(
        &self,
        started_before: DateTime<Utc>,
        message: &str,
        refund: bool,
    ) -> GenerationResult<Vec<String>>;
}

/// [`GenerationRepository`] on PostgreSQL
#[derive(Clone)]
pub struct PgGenerationRepository {
    pool: PgPool,
}

const GENERATED_PHOTO_COLUMNS: &str = "id, status, original_photo_id, theme_id, file_id, \
     requested_by, started_at, finished_at, error_message";

impl PgGenerationRepository {
    /// Create a new generation repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn generated_photo_from_row(row: &PgRow) -> GenerationResult<GeneratedPhoto> {
        let status: String = row.get("status");
        let status = status
            .parse::<GenerationStatus>()
            .map_err(|e| DatabaseError::Query(sqlx::Error::Decode(e.into())))?;

        Ok(GeneratedPhoto {
            id: row.get("id"),
            status,
            original_photo_id: row.get("original_photo_id"),
            theme_id: row.get("theme_id"),
            file_id: row.get("file_id"),
            requested_by: row.get("requested_by"),
            started_at: row.get("started_at"),
            finished_at: row.get("finished_at"),
            error_message: row.get("error_message"),
        })
    }

    /// Conditional transition to `failed` plus optional refund, on an open transaction
    async fn fail_on(
        conn: &mut PgConnection,
        generated_id: &str,
        message: &str,
        refund: bool,
    ) -> GenerationResult<bool> {
        let row = sqlx::query(
            r#"
            UPDATE generated_photos
            SET status = 'failed', error_message = $2, finished_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            RETURNING requested_by
            "#,
        )
        .bind(generated_id)
        .bind(message)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            return Ok(false);
        };

        if refund {
            let user_id: String = row.get("requested_by");
            Self::refund_on(conn, &user_id, generated_id).await?;
        }

        Ok(true)
    }

    async fn refund_on(
        conn: &mut PgConnection,
        user_id: &str,
        generated_id: &str,
    ) -> GenerationResult<()> {
        sqlx::query("UPDATE users SET credits = credits + 1, updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .execute(&mut *conn)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO credit_usages (id, user_id, generated_photo_id, amount, reason)
            VALUES ($1, $2, $3, -1, $4)
            "#,
        )
        .bind(new_id())
        .bind(user_id)
        .bind(generated_id)
        .bind(REFUND_REASON)
        .execute(&mut *conn)
        .await?;

        info!("Refunded 1 credit to user {} for {}", user_id, generated_id);
        Ok(())
    }
}

#[async_trait]
impl GenerationRepository for PgGenerationRepository {
    async fn start_generation(
        &self,
        user_id: &str,
        original_photo_id: &str,
        theme_id: &str,
    ) -> GenerationResult<GeneratedPhoto> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes concurrent debits of the same user
        let credits: Option<i32> =
            sqlx::query_scalar("SELECT credits FROM users WHERE id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;

        match credits {
            None => return Err(GenerationError::NotFound(format!("user {}", user_id))),
            Some(credits) if credits <= 0 => return Err(GenerationError::InsufficientCredits),
            Some(_) => {}
        }

        let original_exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM original_photos p
                JOIN albums a ON a.id = p.album_id
                WHERE p.id = $1 AND p.deleted_at IS NULL AND a.deleted_at IS NULL
                  AND (a.owner_id = $2 OR EXISTS (
                      SELECT 1 FROM album_users au
                      WHERE au.album_id = a.id AND au.user_id = $2
                  ))
            )
            "#,
        )
        .bind(original_photo_id)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        if !original_exists {
            return Err(GenerationError::NotFound(format!(
                "original photo {}",
                original_photo_id
            )));
        }

        let theme_exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM themes WHERE id = $1)")
                .bind(theme_id)
                .fetch_one(&mut *tx)
                .await?;

        if !theme_exists {
            return Err(GenerationError::NotFound(format!("theme {}", theme_id)));
        }

        let generated_id = new_id();
        let query = format!(
            r#"
            INSERT INTO generated_photos (id, status, original_photo_id, theme_id, requested_by, started_at)
            VALUES ($1, 'processing', $2, $3, $4, NOW())
            RETURNING {}
            "#,
            GENERATED_PHOTO_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(&generated_id)
            .bind(original_photo_id)
            .bind(theme_id)
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;
        let generated = Self::generated_photo_from_row(&row)?;

        let debited = sqlx::query(
            "UPDATE users SET credits = credits - 1, updated_at = NOW() WHERE id = $1 AND credits > 0",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        if debited.rows_affected() != 1 {
            return Err(GenerationError::InsufficientCredits);
        }

        sqlx::query(
            r#"
            INSERT INTO credit_usages (id, user_id, generated_photo_id, amount, reason)
            VALUES ($1, $2, $3, 1, $4)
            "#,
        )
        .bind(new_id())
        .bind(user_id)
        .bind(&generated_id)
        .bind(DEBIT_REASON)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            "Debited 1 credit from user {} for generated photo {}",
            user_id, generated_id
        );
        Ok(generated)
    }

    async fn find_user(&self, user_id: &str) -> GenerationResult<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, email, credits, plan, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| User {
            id: row.get("id"),
            email: row.get("email"),
            credits: row.get("credits"),
            plan: row.get("plan"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }))
    }

    async fn find_generated_photo(&self, id: &str) -> GenerationResult<Option<GeneratedPhoto>> {
        let query = format!(
            "SELECT {} FROM generated_photos WHERE id = $1 AND deleted_at IS NULL",
            GENERATED_PHOTO_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::generated_photo_from_row).transpose()
    }

    async fn find_original_photo(&self, id: &str) -> GenerationResult<Option<OriginalPhoto>> {
        let row = sqlx::query(
            r#"
            SELECT p.id, p.album_id, p.uploaded_by, p.deleted_at,
                   f.id AS file_id, f.storage_key, f.content_type, f.size_bytes
            FROM original_photos p
            LEFT JOIN files f ON f.id = p.file_id
            WHERE p.id = $1 AND p.deleted_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let file_id: Option<String> = row.get("file_id");
            let file = file_id.map(|file_id| FileRecord {
                id: file_id,
                storage_key: row.get("storage_key"),
                content_type: row.get("content_type"),
                size_bytes: row.get("size_bytes"),
            });

            OriginalPhoto {
                id: row.get("id"),
                album_id: row.get("album_id"),
                uploaded_by: row.get("uploaded_by"),
                file,
                deleted_at: row.get("deleted_at"),
            }
        }))
    }

    async fn find_theme(&self, id: &str) -> GenerationResult<Option<Theme>> {
        let row = sqlx::query("SELECT id, name, prompt FROM themes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| Theme {
            id: row.get("id"),
            name: row.get("name"),
            prompt: row.get("prompt"),
        }))
    }

    async fn find_file(&self, id: &str) -> GenerationResult<Option<FileRecord>> {
        let row = sqlx::query(
            "SELECT id, storage_key, content_type, size_bytes FROM files WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| FileRecord {
            id: row.get("id"),
            storage_key: row.get("storage_key"),
            content_type: row.get("content_type"),
            size_bytes: row.get("size_bytes"),
        }))
    }

    async fn finish_generation(
        &self,
        generated_id: &str,
        file: &NewFile,
    ) -> GenerationResult<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO files (id, storage_key, content_type, size_bytes)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&file.id)
        .bind(&file.storage_key)
        .bind(&file.content_type)
        .bind(file.size_bytes)
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query(
            r#"
            UPDATE generated_photos
            SET status = 'finished', file_id = $2, finished_at = NOW(),
                error_message = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(generated_id)
        .bind(&file.id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            warn!(
                "Generated photo {} left processing before it could be finished",
                generated_id
            );
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn fail_generation(
        &self,
        generated_id: &str,
        message: &str,
        refund: bool,
    ) -> GenerationResult<bool> {
        let mut tx = self.pool.begin().await?;
        let transitioned = Self::fail_on(&mut *tx, generated_id, message, refund).await?;
        tx.commit().await?;
        Ok(transitioned)
    }

    async fn fail_stale_generations(
        &self,
        started_before: DateTime<Utc>,
        message: &str,
        refund: bool,
    ) -> GenerationResult<Vec<String>> {
        let stale: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM generated_photos WHERE status = 'processing' AND started_at < $1",
        )
        .bind(started_before)
        .fetch_all(&self.pool)
        .await?;

        let mut failed = Vec::with_capacity(stale.len());
        for generated_id in stale {
            let mut tx = self.pool.begin().await?;
            if Self::fail_on(&mut *tx, &generated_id, message, refund).await? {
                failed.push(generated_id);
            }
            tx.commit().await?;
        }

        Ok(failed)
    }
}
