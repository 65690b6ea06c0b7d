use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::connector::models::Connector;
use crate::connector::repositories::ConnectorRepository;
use lodestone_common::error::{LodestoneError, LodestoneResult};

#[derive(Clone)]
pub struct PgConnectorRepository {
    pool: PgPool,
}

impl PgConnectorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: sqlx::postgres::PgRow) -> LodestoneResult<Connector> {
        Ok(Connector {
            id: row.get("id"),
            source_type: row.get("source_type"),
            user_id: row.get("user_id"),
            scope: row.get("scope"),
            scope_id: row.get("scope_id"),
            config: row.get("config"),
            state: row.get("state"),
            status: row.get("status"),
            status_message: row.get("status_message"),
            last_sync_at: row.get("last_sync_at"),
            refresh_interval_mins: row.get("refresh_interval_mins"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl ConnectorRepository for PgConnectorRepository {
    async fn get_by_id(&self, id: i64) -> LodestoneResult<Option<Connector>> {
        let row = sqlx::query(
            "select id, source_type, user_id, scope, scope_id, config, state, status, status_message, last_sync_at, refresh_interval_mins, created_at, updated_at
             from connectors where id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LodestoneError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::map_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get_due_for_sync(&self) -> LodestoneResult<Vec<Connector>> {
        let rows = sqlx::query(
            "select id, source_type, user_id, scope, scope_id, config, state, status, status_message, last_sync_at, refresh_interval_mins, created_at, updated_at
             from connectors
             where status not in ('pending', 'syncing', 'disabled')
               and (last_sync_at is null
                    or last_sync_at + make_interval(mins => refresh_interval_mins) <= now())
             order by last_sync_at asc nulls first",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LodestoneError::Database(e.to_string()))?;

        rows.into_iter().map(Self::map_row).collect()
    }

    async fn get_by_status(&self, status: &str) -> LodestoneResult<Vec<Connector>> {
        let rows = sqlx::query(
            "select id, source_type, user_id, scope, scope_id, config, state, status, status_message, last_sync_at, refresh_interval_mins, created_at, updated_at
             from connectors where status = $1 order by id",
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LodestoneError::Database(e.to_string()))?;

        rows.into_iter().map(Self::map_row).collect()
    }

    async fn claim_for_sync(
        &self,
        id: i64,
        status_message: &str,
    ) -> LodestoneResult<Option<Connector>> {
        let row = sqlx::query(
            "update connectors
             set status = 'pending', status_message = $2, updated_at = now()
             where id = $1 and status not in ('pending', 'syncing', 'disabled')
             returning id, source_type, user_id, scope, scope_id, config, state, status, status_message, last_sync_at, refresh_interval_mins, created_at, updated_at",
        )
        .bind(id)
        .bind(status_message)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LodestoneError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::map_row(r)?)),
            None => Ok(None),
        }
    }

    async fn mark_syncing(&self, id: i64) -> LodestoneResult<Option<Connector>> {
        let row = sqlx::query(
            "update connectors
             set status = 'syncing', updated_at = now()
             where id = $1 and status = 'pending'
             returning id, source_type, user_id, scope, scope_id, config, state, status, status_message, last_sync_at, refresh_interval_mins, created_at, updated_at",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LodestoneError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::map_row(r)?)),
            None => Ok(None),
        }
    }

    async fn finish_sync(
        &self,
        id: i64,
        state: &serde_json::Value,
        status: &str,
        status_message: &str,
    ) -> LodestoneResult<Connector> {
        let row = sqlx::query(
            "update connectors
             set status = $2, status_message = $3, state = $4,
                 last_sync_at = now(), updated_at = now()
             where id = $1
             returning id, source_type, user_id, scope, scope_id, config, state, status, status_message, last_sync_at, refresh_interval_mins, created_at, updated_at",
        )
        .bind(id)
        .bind(status)
        .bind(status_message)
        .bind(state)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| LodestoneError::Database(e.to_string()))?;

        Self::map_row(row)
    }
}
