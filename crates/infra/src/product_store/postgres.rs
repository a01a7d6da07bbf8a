//! Postgres-backed product store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Duplicate id or `(created_by, name)` |
//! | RowNotFound | N/A | `NotFound` | No row matched id (and owner, for writes) |
//! | Anything else | Any other | `Backend` | Connection failures, timeouts, pool closed |
//!
//! Writes filter on `created_by`, so a row owned by someone else is reported as
//! not found. All statements are parameterized.
//!
//! ## Command keys
//!
//! `last_command_key` holds the key of the last create/update applied to a row.
//! An update skips rows already written by its key; when the write matches
//! nothing (or a create hits a unique violation) the row written by the same key
//! is looked up and returned as the result of the earlier delivery.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Row};
use tracing::instrument;

use auction_product_catalog::{ProductStore, StoreError};
use auction_product_core::{Product, ProductId, ProductPatch, UserId};

const COLUMNS: &str = "id, name, description, media, created_at, updated_at, created_by";

/// Append-merge keeping the first position of every distinct value.
const MEDIA_MERGE: &str = "array(SELECT m FROM unnest(media || ";
const MEDIA_MERGE_TAIL: &str =
    "::text[]) WITH ORDINALITY AS t(m, i) GROUP BY m ORDER BY min(i))";

#[derive(Debug, Clone)]
pub struct PostgresProductStore {
    pool: Arc<PgPool>,
}

impl PostgresProductStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a connection pool against `dsn`.
    pub async fn connect(dsn: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(dsn)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `products` table if it does not exist.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS products (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                media TEXT[] NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NULL,
                created_by TEXT NOT NULL,
                last_command_key TEXT NULL,
                UNIQUE (created_by, name)
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_schema", e))?;

        sqlx::query("ALTER TABLE products ADD COLUMN IF NOT EXISTS last_command_key TEXT NULL")
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;

        Ok(())
    }

    /// Row owned by `owner` whose last write carried `command_key`.
    async fn written_by(
        &self,
        owner: &UserId,
        id: Option<&ProductId>,
        command_key: &str,
    ) -> Result<Option<Product>, StoreError> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT ");
        query
            .push(COLUMNS)
            .push(" FROM products WHERE created_by = ")
            .push_bind(owner.as_str())
            .push(" AND last_command_key = ")
            .push_bind(command_key);
        if let Some(id) = id {
            query.push(" AND id = ").push_bind(id.as_str());
        }

        let row = query
            .build()
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("written_by", e))?;

        row.as_ref().map(decode_row).transpose()
    }
}

#[async_trait]
impl ProductStore for PostgresProductStore {
    #[instrument(skip(self, product), fields(product_id = %product.id, owner = %product.owner), err)]
    async fn create(
        &self,
        product: Product,
        command_key: Option<&str>,
    ) -> Result<Product, StoreError> {
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO products (id, name, description, media, created_at, updated_at, created_by, last_command_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(product.id.as_str())
        .bind(&product.name)
        .bind(&product.description)
        .bind(&product.media)
        .bind(product.created_at)
        .bind(product.updated_at)
        .bind(product.owner.as_str())
        .bind(command_key)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create", e));

        match (inserted, command_key) {
            (Ok(row), _) => decode_row(&row),
            (Err(err), Some(key)) if err.is_conflict() => self
                .written_by(&product.owner, None, key)
                .await?
                .ok_or(err),
            (Err(err), _) => Err(err),
        }
    }

    #[instrument(skip(self, patch), fields(product_id = %id, owner = %owner), err)]
    async fn update(
        &self,
        id: &ProductId,
        owner: &UserId,
        patch: ProductPatch,
        command_key: Option<&str>,
    ) -> Result<Product, StoreError> {
        let updated = update_query(id, owner, patch, command_key)
            .build()
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("update", e));

        match (updated, command_key) {
            (Ok(row), _) => decode_row(&row),
            (Err(err), Some(key)) if err.is_not_found() => self
                .written_by(owner, Some(id), key)
                .await?
                .ok_or(err),
            (Err(err), _) => Err(err),
        }
    }

    #[instrument(skip(self), fields(product_id = %id, owner = %owner), err)]
    async fn delete(&self, id: &ProductId, owner: &UserId) -> Result<Product, StoreError> {
        let row = sqlx::query(&format!(
            "DELETE FROM products WHERE id = $1 AND created_by = $2 RETURNING {COLUMNS}"
        ))
        .bind(id.as_str())
        .bind(owner.as_str())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete", e))?;

        decode_row(&row)
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn find_one(&self, id: &ProductId) -> Result<Product, StoreError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM products WHERE id = $1"))
            .bind(id.as_str())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_one", e))?;

        decode_row(&row)
    }

    #[instrument(skip(self), err)]
    async fn find_all(&self, limit: u32) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM products ORDER BY created_at ASC, id ASC LIMIT $1"
        ))
        .bind(i64::from(limit))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_all", e))?;

        rows.iter().map(decode_row).collect()
    }
}

/// Partial update touching only the present fields plus `updated_at`.
fn update_query<'a>(
    id: &'a ProductId,
    owner: &'a UserId,
    patch: ProductPatch,
    command_key: Option<&'a str>,
) -> QueryBuilder<'a, Postgres> {
    let mut query = QueryBuilder::<Postgres>::new("UPDATE products SET updated_at = ");
    query.push_bind(patch.updated_at);
    if let Some(name) = patch.name {
        query.push(", name = ").push_bind(name);
    }
    if let Some(description) = patch.description {
        query.push(", description = ").push_bind(description);
    }
    if let Some(media) = patch.media {
        query
            .push(", media = ")
            .push(MEDIA_MERGE)
            .push_bind(media)
            .push(MEDIA_MERGE_TAIL);
    }
    query
        .push(", last_command_key = ")
        .push_bind(command_key)
        .push(" WHERE id = ")
        .push_bind(id.as_str())
        .push(" AND created_by = ")
        .push_bind(owner.as_str());
    if let Some(key) = command_key {
        query
            .push(" AND last_command_key IS DISTINCT FROM ")
            .push_bind(key);
    }
    query.push(" RETURNING ").push(COLUMNS);
    query
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code() {
                Some(code) if code.as_ref() == "23505" => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::RowNotFound => StoreError::NotFound(format!("no matching product in {operation}")),
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

fn decode_row(row: &PgRow) -> Result<Product, StoreError> {
    ProductRow::from_row(row)
        .map(Product::from)
        .map_err(|e| StoreError::Backend(format!("failed to decode product row: {e}")))
}

// SQLx row types

#[derive(Debug)]
struct ProductRow {
    id: String,
    name: String,
    description: String,
    media: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
    created_by: String,
}

impl<'r> FromRow<'r, PgRow> for ProductRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ProductRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            media: row.try_get("media")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            created_by: row.try_get("created_by")?,
        })
    }
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product {
            id: ProductId::from(row.id),
            name: row.name,
            description: row.description,
            media: row.media,
            created_at: row.created_at,
            updated_at: row.updated_at,
            owner: UserId::from(row.created_by),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err = map_sqlx_error("update", sqlx::Error::RowNotFound);
        assert!(err.is_not_found());
    }

    fn patch(media: Option<Vec<String>>) -> ProductPatch {
        ProductPatch::new(Some("NewLamp".into()), None, media, Utc::now())
    }

    #[test]
    fn update_touches_only_present_fields() {
        let id = ProductId::from("p1");
        let owner = UserId::from("u1");

        let query = update_query(&id, &owner, patch(None), None);
        let sql = query.sql();

        assert!(sql.starts_with("UPDATE products SET updated_at = $1, name = $2"));
        assert!(!sql.contains("description ="));
        assert!(!sql.contains("media ="));
        assert!(sql.contains("WHERE id = $4 AND created_by = $5 RETURNING"));
        assert!(!sql.contains("IS DISTINCT FROM"));
    }

    #[test]
    fn media_merge_keeps_first_positions() {
        let id = ProductId::from("p1");
        let owner = UserId::from("u1");

        let query = update_query(&id, &owner, patch(Some(vec!["m.png".into()])), None);
        let sql = query.sql();

        assert!(sql.contains(
            "media = array(SELECT m FROM unnest(media || $3::text[]) WITH ORDINALITY AS t(m, i) GROUP BY m ORDER BY min(i))"
        ));
        assert!(!sql.contains("DISTINCT unnest"));
    }

    #[test]
    fn keyed_update_skips_rows_written_by_the_same_key() {
        let id = ProductId::from("p1");
        let owner = UserId::from("u1");

        let query = update_query(&id, &owner, patch(None), Some("cmd-1"));

        assert!(
            query
                .sql()
                .ends_with(&format!("AND last_command_key IS DISTINCT FROM $6 RETURNING {COLUMNS}"))
        );
    }

    #[test]
    fn closed_pool_is_a_backend_error() {
        let err = map_sqlx_error("create", sqlx::Error::PoolClosed);
        assert!(!err.is_conflict());
        assert!(!err.is_not_found());
    }
}
