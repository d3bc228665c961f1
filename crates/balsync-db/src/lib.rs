use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use balsync_config::DatabaseSettings;
use balsync_core::{Entity, EntityId, RemoteStore, StoreError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{info, warn};
use uuid::Uuid;

pub const ENV_DB_URL: &str = "BALSYNC_DATABASE_URL";

/// Connect using BALSYNC_DATABASE_URL and default pool sizing.
pub async fn connect_from_env() -> Result<PgPool> {
    connect(&DatabaseSettings::default()).await
}

/// Connect using the URL held in the env var named by `settings.url_env`.
pub async fn connect(settings: &DatabaseSettings) -> Result<PgPool> {
    let url = std::env::var(&settings.url_env)
        .with_context(|| format!("missing env var {}", settings.url_env))?;

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(settings.acquire_timeout())
        .idle_timeout(settings.idle_timeout())
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    info!(
        max_connections = settings.max_connections,
        min_connections = settings.min_connections,
        "connected to Postgres"
    );
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    info!("db migrations applied");
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='balances'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_balances_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_balances_table: bool,
}

/// Full row of the `balances` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRecord {
    pub entity_id: EntityId,
    pub name: String,
    pub balance: Decimal,
    pub updated_at: DateTime<Utc>,
}

fn store_err(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Decode(_) | sqlx::Error::ColumnDecode { .. } | sqlx::Error::TypeNotFound { .. } => {
            // Schema drift, not an outage.
            warn!(error = %e, "balances row failed to decode");
            StoreError::Decode(e.to_string())
        }
        other => StoreError::Unavailable(other.to_string()),
    }
}

/// [`RemoteStore`] over the `balances` table. Every mutation is one statement.
#[derive(Clone, Debug)]
pub struct PgBalanceStore {
    pool: PgPool,
}

impl PgBalanceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Whole record including name and `updated_at`.
    pub async fn fetch_record(&self, id: EntityId) -> Result<Option<RemoteRecord>> {
        let row = sqlx::query_as::<_, (Uuid, String, Decimal, DateTime<Utc>)>(
            r#"
            select entity_id, name, balance, updated_at
            from balances
            where entity_id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .context("fetch_record failed")?;

        Ok(row.map(|(entity_id, name, balance, updated_at)| RemoteRecord {
            entity_id: EntityId(entity_id),
            name,
            balance,
            updated_at,
        }))
    }

    /// Drop the record for one entity. Test cleanup and CLI use only.
    pub async fn delete(&self, id: EntityId) -> Result<bool> {
        let res = sqlx::query("delete from balances where entity_id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .context("delete balance failed")?;
        Ok(res.rows_affected() > 0)
    }
}

#[async_trait]
impl RemoteStore for PgBalanceStore {
    async fn read(&self, id: EntityId) -> Result<Option<Decimal>, StoreError> {
        let row = sqlx::query_as::<_, (Decimal,)>("select balance from balances where entity_id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(row.map(|(b,)| b))
    }

    async fn read_batch(&self, ids: &[EntityId]) -> Result<HashMap<EntityId, Decimal>, StoreError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let uuids: Vec<Uuid> = ids.iter().map(|id| id.0).collect();
        let rows = sqlx::query_as::<_, (Uuid, Decimal)>(
            "select entity_id, balance from balances where entity_id = any($1)",
        )
        .bind(&uuids)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows
            .into_iter()
            .map(|(id, balance)| (EntityId(id), balance))
            .collect())
    }

    async fn write_absolute(&self, entity: &Entity, balance: Decimal) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            insert into balances (entity_id, name, balance)
            values ($1, $2, $3)
            on conflict (entity_id) do update
              set name = excluded.name,
                  balance = excluded.balance,
                  updated_at = now()
            "#,
        )
        .bind(entity.id.0)
        .bind(&entity.name)
        .bind(balance)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn apply_delta(
        &self,
        entity: &Entity,
        delta: Decimal,
        starting_balance: Decimal,
    ) -> Result<Decimal, StoreError> {
        let (balance,): (Decimal,) = sqlx::query_as::<_, (Decimal,)>(
            r#"
            insert into balances (entity_id, name, balance)
            values ($1, $2, $4 + $3)
            on conflict (entity_id) do update
              set balance = balances.balance + $3,
                  name = excluded.name,
                  updated_at = now()
            returning balance
            "#,
        )
        .bind(entity.id.0)
        .bind(&entity.name)
        .bind(delta)
        .bind(starting_balance)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_maps_to_unavailable_and_decode_to_decode() {
        assert!(matches!(
            store_err(sqlx::Error::RowNotFound),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            store_err(sqlx::Error::Decode("bad numeric".into())),
            StoreError::Decode(_)
        ));
    }
}
