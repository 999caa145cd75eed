use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use herald_core::error::AppError;
use herald_core::item::{ItemStatus, NewItem, NewsItem, StatusUpdate};
use herald_core::traits::ItemStore;

/// PostgreSQL-backed item store. Reservation uses `FOR UPDATE SKIP LOCKED`
/// so concurrent schedulers (in one process or many) never share an item.
/// Item URLs are unique (`uq_news_items_url`).
#[derive(Clone)]
pub struct ItemRepository {
    pool: Pool<Postgres>,
}

impl ItemRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct NewsItemRow {
    id: Uuid,
    source: String,
    url: String,
    title: String,
    published_at: Option<DateTime<Utc>>,
    status: String,
    retry_count: i32,
    scraped_content: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<NewsItemRow> for NewsItem {
    type Error = AppError;

    fn try_from(row: NewsItemRow) -> Result<Self, Self::Error> {
        let status: ItemStatus = row
            .status
            .parse()
            .map_err(|e: String| AppError::DatabaseError(format!("Item {}: {e}", row.id)))?;

        Ok(NewsItem {
            id: row.id,
            source: row.source,
            url: row.url,
            title: row.title,
            published_at: row.published_at,
            status,
            retry_count: u32::try_from(row.retry_count).unwrap_or_default(),
            scraped_content: row.scraped_content,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_items(rows: Vec<NewsItemRow>) -> Result<Vec<NewsItem>, AppError> {
    rows.into_iter().map(NewsItem::try_from).collect()
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

impl ItemStore for ItemRepository {
    async fn reserve_eligible(&self, batch_size: usize) -> Result<Vec<NewsItem>, AppError> {
        let rows = sqlx::query_as::<_, NewsItemRow>(
            r#"
            UPDATE news_items
            SET status = 'in_queue', updated_at = NOW()
            WHERE id IN (
                SELECT id FROM news_items
                WHERE status IN ('pending', 'retry')
                ORDER BY created_at DESC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(sql_limit(batch_size))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        // RETURNING carries no ordering guarantee.
        let mut items = into_items(rows)?;
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        if !items.is_empty() {
            tracing::debug!(count = items.len(), "Reserved items for scraping");
        }
        Ok(items)
    }

    async fn list_by_status(
        &self,
        status: ItemStatus,
        limit: usize,
    ) -> Result<Vec<NewsItem>, AppError> {
        let rows = sqlx::query_as::<_, NewsItemRow>(
            r#"
            SELECT * FROM news_items
            WHERE status = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(status.as_str())
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        into_items(rows)
    }

    async fn update_status(&self, id: Uuid, update: StatusUpdate) -> Result<(), AppError> {
        let allowed_from: Vec<&str> = ItemStatus::sources_of(update.status)
            .iter()
            .map(ItemStatus::as_str)
            .collect();

        let result = sqlx::query(
            r#"
            UPDATE news_items
            SET
                status = $2::varchar,
                retry_count = CASE WHEN $2::varchar = 'retry' THEN retry_count + 1 ELSE retry_count END,
                scraped_content = COALESCE($3, scraped_content),
                error_message = CASE
                    WHEN $4::text IS NOT NULL THEN $4
                    WHEN $2::varchar = 'scraped' THEN NULL
                    ELSE error_message
                END,
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($5)
            "#,
        )
        .bind(id)
        .bind(update.status.as_str())
        .bind(update.content.as_deref())
        .bind(update.error.as_deref())
        .bind(&allowed_from)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return match self.get_item(id).await? {
                Some(item) => item.status.ensure_transition(id, update.status),
                None => Err(AppError::NotFound(format!("News item {id}"))),
            };
        }

        tracing::debug!(item_id = %id, status = %update.status, "Updated item status");
        Ok(())
    }

    async fn create_item(&self, item: NewItem) -> Result<NewsItem, AppError> {
        let row = sqlx::query_as::<_, NewsItemRow>(
            r#"
            INSERT INTO news_items (source, url, title, published_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (url) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(&item.source)
        .bind(&item.url)
        .bind(&item.title)
        .bind(item.published_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        match row {
            Some(row) => row.try_into(),
            None => Err(AppError::AlreadyExists(format!(
                "News item with URL {}",
                item.url
            ))),
        }
    }

    async fn add_items(&self, items: Vec<NewItem>) -> Result<usize, AppError> {
        let mut seen = HashSet::new();
        let unique: Vec<NewItem> = items
            .into_iter()
            .filter(|item| seen.insert(item.url.clone()))
            .collect();
        if unique.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let mut added = 0;
        for item in &unique {
            let result = sqlx::query(
                r#"
                INSERT INTO news_items (source, url, title, published_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (url) DO NOTHING
                "#,
            )
            .bind(&item.source)
            .bind(&item.url)
            .bind(&item.title)
            .bind(item.published_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
            added += result.rows_affected() as usize;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tracing::debug!(offered = unique.len(), added, "Inserted item batch");
        Ok(added)
    }

    async fn latest_published_at(&self, source: &str) -> Result<Option<DateTime<Utc>>, AppError> {
        let latest: Option<DateTime<Utc>> =
            sqlx::query_scalar(r#"SELECT MAX(published_at) FROM news_items WHERE source = $1"#)
                .bind(source)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(latest)
    }

    async fn get_item(&self, id: Uuid) -> Result<Option<NewsItem>, AppError> {
        let row = sqlx::query_as::<_, NewsItemRow>(r#"SELECT * FROM news_items WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(NewsItem::try_from).transpose()
    }

    async fn count_by_status(&self, status: ItemStatus) -> Result<i64, AppError> {
        let count: i64 =
            sqlx::query_scalar(r#"SELECT COUNT(*) FROM news_items WHERE status = $1"#)
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(count)
    }
}
