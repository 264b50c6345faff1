//! Postgres-backed wallpaper store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres};

use wallpaperdb_core::{
    AppError, ContentHash, Lifecycle, StatePatch, UploadState, Wallpaper, WallpaperId,
};

use crate::store::WallpaperStore;

#[derive(Clone)]
pub struct PostgresWallpaperStore {
    pool: PgPool,
}

impl PostgresWallpaperStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("Migration failed: {}", e)))
    }
}

#[async_trait]
impl WallpaperStore for PostgresWallpaperStore {
    async fn insert_intent(&self, wallpaper: &Wallpaper) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO wallpapers (
                id, user_id, content_hash, upload_state, state_changed_at,
                upload_attempts, uploaded_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&wallpaper.id)
        .bind(&wallpaper.user_id)
        .bind(&wallpaper.content_hash)
        .bind(wallpaper.upload_state)
        .bind(wallpaper.state_changed_at)
        .bind(wallpaper.upload_attempts)
        .bind(wallpaper.uploaded_at)
        .bind(wallpaper.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &WallpaperId) -> Result<Option<Wallpaper>, AppError> {
        let wallpaper = sqlx::query_as::<Postgres, Wallpaper>(
            "SELECT * FROM wallpapers WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(wallpaper)
    }

    async fn find_duplicate(
        &self,
        user_id: &str,
        content_hash: &ContentHash,
    ) -> Result<Option<Wallpaper>, AppError> {
        let wallpaper = sqlx::query_as::<Postgres, Wallpaper>(
            r#"
            SELECT * FROM wallpapers
            WHERE user_id = $1
              AND content_hash = $2
              AND upload_state IN ('stored', 'processing', 'completed')
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(wallpaper)
    }

    async fn update_transition(
        &self,
        id: &WallpaperId,
        expected: UploadState,
        new_state: UploadState,
        patch: &StatePatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Wallpaper>, AppError> {
        // The `upload_state = $2` guard makes this a single-row CAS: the
        // losing concurrent writer matches zero rows and gets None back.
        let updated = sqlx::query_as::<Postgres, Wallpaper>(
            r#"
            UPDATE wallpapers SET
                upload_state = $3,
                state_changed_at = $4,
                updated_at = $4,
                file_type = COALESCE($5, file_type),
                mime_type = COALESCE($6, mime_type),
                file_size_bytes = COALESCE($7, file_size_bytes),
                width = COALESCE($8, width),
                height = COALESCE($9, height),
                aspect_ratio = COALESCE($10, aspect_ratio),
                storage_key = COALESCE($11, storage_key),
                storage_bucket = COALESCE($12, storage_bucket),
                original_filename = COALESCE($13, original_filename),
                processing_error = COALESCE($14, processing_error),
                upload_attempts = upload_attempts + $15
            WHERE id = $1 AND upload_state = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(new_state)
        .bind(now)
        .bind(patch.file_type)
        .bind(patch.mime_type.as_deref())
        .bind(patch.file_size_bytes)
        .bind(patch.width)
        .bind(patch.height)
        .bind(patch.aspect_ratio)
        .bind(patch.storage_key.as_deref())
        .bind(patch.storage_bucket.as_deref())
        .bind(patch.original_filename.as_deref())
        .bind(patch.processing_error.as_deref())
        .bind(if patch.bump_attempts { 1i32 } else { 0i32 })
        .fetch_optional(&self.pool)
        .await?;
        Ok(updated)
    }

    async fn delete_in_state(
        &self,
        id: &WallpaperId,
        expected: UploadState,
    ) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM wallpapers WHERE id = $1 AND upload_state = $2")
            .bind(id)
            .bind(expected)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_in_state_older_than(
        &self,
        state: UploadState,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Wallpaper>, AppError> {
        let wallpapers = sqlx::query_as::<Postgres, Wallpaper>(
            r#"
            SELECT * FROM wallpapers
            WHERE upload_state = $1 AND state_changed_at < $2
            ORDER BY state_changed_at ASC
            LIMIT $3
            "#,
        )
        .bind(state)
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(wallpapers)
    }

    async fn storage_key_referenced(&self, key: &str) -> Result<bool, AppError> {
        let referenced: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM wallpapers WHERE storage_key = $1)")
                .bind(key)
                .fetch_one(&self.pool)
                .await?;
        Ok(referenced)
    }

    async fn count_in_state(&self, state: UploadState) -> Result<i64, AppError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM wallpapers WHERE upload_state = $1")
                .bind(state)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

#[async_trait]
impl Lifecycle for PostgresWallpaperStore {
    fn name(&self) -> &'static str {
        "metadata-store"
    }

    async fn init(&self) -> Result<(), AppError> {
        self.migrate().await
    }

    async fn health(&self) -> Result<(), AppError> {
        sqlx::query_scalar::<Postgres, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), AppError> {
        self.pool.close().await;
        Ok(())
    }
}
