use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use herald_core::error::AppError;
use herald_core::source::{NewSource, Source};
use herald_core::traits::SourceStore;

/// PostgreSQL registry of news feeds. Names and URLs are both unique.
#[derive(Clone)]
pub struct SourceRepository {
    pool: Pool<Postgres>,
}

impl SourceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SourceRow {
    id: Uuid,
    name: String,
    url: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<SourceRow> for Source {
    fn from(row: SourceRow) -> Self {
        Source {
            id: row.id,
            name: row.name,
            url: row.url,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl SourceStore for SourceRepository {
    async fn list_sources(&self) -> Result<Vec<Source>, AppError> {
        let rows = sqlx::query_as::<_, SourceRow>(r#"SELECT * FROM sources ORDER BY name"#)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn add_sources(&self, sources: Vec<NewSource>) -> Result<usize, AppError> {
        if sources.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        // A bare ON CONFLICT covers both unique constraints.
        let mut added = 0;
        for source in &sources {
            let result = sqlx::query(
                r#"
                INSERT INTO sources (name, url)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(&source.name)
            .bind(&source.url)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
            added += result.rows_affected() as usize;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tracing::debug!(offered = sources.len(), added, "Registered sources");
        Ok(added)
    }
}
