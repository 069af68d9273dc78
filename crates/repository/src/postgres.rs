use anyhow::{Context, Result};
use async_trait::async_trait;
use relayer_core::error::RepoError;
use relayer_core::event::{BridgeTask, Event, EventName, TaskStatus};
use relayer_core::traits::Repository;
use sqlx::{postgres::PgPoolOptions, Acquire, Executor, PgPool, Postgres};
use std::str::FromStr;

const MIGRATION_LOCK_KEY: i64 = 0x52454C41_5945525F; // "RELAYER_"

const MIGRATIONS: &[(i32, &str)] = &[(1, include_str!("../migrations/0001_schema.sql"))];

/// Postgres-backed `Repository`, storing each domain record as a CBOR blob
/// alongside queryable key columns.
#[derive(Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("connect to relayer database")?;
        Ok(Self { pool })
    }

    /// Runs pending migrations under a Postgres advisory lock, so multiple
    /// scanner/consumer processes starting concurrently don't race.
    pub async fn migrate(&self) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("acquire connection for repository migrations")?;

        sqlx::query("select pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *conn)
            .await
            .context("acquire repository migration lock")?;

        let res: Result<()> = async {
            exec_sql_batch(&mut *conn, MIGRATIONS[0].1)
                .await
                .context("apply repository schema bootstrap (v1)")?;

            sqlx::query(
                "create table if not exists relayer.schema_migrations (version int primary key)",
            )
            .execute(&mut *conn)
            .await
            .context("create relayer.schema_migrations")?;

            sqlx::query("insert into relayer.schema_migrations(version) values ($1) on conflict do nothing")
                .bind(MIGRATIONS[0].0)
                .execute(&mut *conn)
                .await
                .context("record migration v1")?;

            for (version, sql) in &MIGRATIONS[1..] {
                let applied: Option<i32> =
                    sqlx::query_scalar("select version from relayer.schema_migrations where version = $1")
                        .bind(*version)
                        .fetch_optional(&mut *conn)
                        .await
                        .context("read relayer.schema_migrations")?;
                if applied.is_some() {
                    continue;
                }
                let mut tx = conn.begin().await.context("begin migration tx")?;
                exec_sql_batch(&mut *tx, sql)
                    .await
                    .with_context(|| format!("apply repository migration v{version}"))?;
                sqlx::query("insert into relayer.schema_migrations(version) values ($1)")
                    .bind(*version)
                    .execute(&mut *tx)
                    .await
                    .context("insert relayer.schema_migrations")?;
                tx.commit().await.context("commit migration tx")?;
            }
            Ok(())
        }
        .await;

        let _ = sqlx::query("select pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *conn)
            .await;

        res
    }
}

async fn exec_sql_batch<E>(exec: &mut E, sql: &str) -> Result<()>
where
    for<'c> &'c mut E: Executor<'c, Database = Postgres>,
{
    for stmt in sql.split(';') {
        let s = stmt.trim();
        if s.is_empty() {
            continue;
        }
        sqlx::query(s).execute(&mut *exec).await.with_context(|| {
            format!("execute migration statement: {}", s.lines().next().unwrap_or(""))
        })?;
    }
    Ok(())
}

fn parse_event_id(id: &str) -> Option<(i64, String, i64)> {
    let mut parts = id.splitn(3, '-');
    let block_number = parts.next()?.parse().ok()?;
    let tx_hash = parts.next()?.to_string();
    let log_index = parts.next()?.parse().ok()?;
    Some((block_number, tx_hash, log_index))
}

fn parse_task_id(id: &str) -> Option<(String, String)> {
    let idx = id.rfind('-')?;
    Some((id[..idx].to_string(), id[idx + 1..].to_string()))
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn save_event(&self, event: &Event) -> Result<(), RepoError> {
        let payload =
            relayer_core::wire::to_bytes(event).map_err(|e| RepoError::Save(e.to_string()))?;
        sqlx::query(
            "insert into relayer.events \
             (chain_id, block_number, tx_hash, log_index, event_name, operation_hash, block_datetime, handled, payload) \
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             on conflict (block_number, tx_hash, log_index) do update set \
               handled = excluded.handled, payload = excluded.payload",
        )
        .bind(event.chain_id as i64)
        .bind(event.block_number as i64)
        .bind(&event.tx_hash)
        .bind(event.log_index as i64)
        .bind(event.event_name.as_str())
        .bind(&event.data.operation_hash_hex)
        .bind(event.block_datetime)
        .bind(event.handled.as_deref())
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::Save(e.to_string()))?;
        Ok(())
    }

    async fn get_event(&self, id: &str) -> Result<Event, RepoError> {
        let (block_number, tx_hash, log_index) =
            parse_event_id(id).ok_or_else(|| RepoError::Get(format!("malformed event id: {id}")))?;
        let payload: Vec<u8> = sqlx::query_scalar(
            "select payload from relayer.events where block_number = $1 and tx_hash = $2 and log_index = $3",
        )
        .bind(block_number)
        .bind(&tx_hash)
        .bind(log_index)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepoError::Get(e.to_string()))?
        .ok_or_else(|| RepoError::Get(format!("event not found: {id}")))?;
        relayer_core::wire::from_bytes(&payload).map_err(|e| RepoError::Get(e.to_string()))
    }

    async fn get_events(&self) -> Result<Vec<Event>, RepoError> {
        let rows: Vec<Vec<u8>> = sqlx::query_scalar("select payload from relayer.events order by block_number, log_index")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepoError::Get(e.to_string()))?;
        rows.iter()
            .map(|p| relayer_core::wire::from_bytes(p).map_err(|e| RepoError::Get(e.to_string())))
            .collect()
    }

    async fn delete_event(&self, id: &str) -> Result<(), RepoError> {
        let (block_number, tx_hash, log_index) =
            parse_event_id(id).ok_or_else(|| RepoError::Delete(format!("malformed event id: {id}")))?;
        sqlx::query("delete from relayer.events where block_number = $1 and tx_hash = $2 and log_index = $3")
            .bind(block_number)
            .bind(&tx_hash)
            .bind(log_index)
            .execute(&self.pool)
            .await
            .map_err(|e| RepoError::Delete(e.to_string()))?;
        Ok(())
    }

    async fn save_bridge_task(&self, task: &BridgeTask) -> Result<(), RepoError> {
        sqlx::query(
            "insert into relayer.bridge_tasks \
             (operation_hash, event_name, chain_id, block_number, tx_hash, log_index, status, datetime) \
             values ($1, $2, $3, $4, $5, $6, $7, $8) \
             on conflict (operation_hash, event_name) do update set \
               status = excluded.status, datetime = excluded.datetime",
        )
        .bind(&task.operation_hash)
        .bind(task.event_name.as_str())
        .bind(task.chain_id as i64)
        .bind(task.block_number as i64)
        .bind(&task.tx_hash)
        .bind(task.log_index as i64)
        .bind(task.status.as_str())
        .bind(task.datetime)
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::Save(e.to_string()))?;
        Ok(())
    }

    async fn get_bridge_task(&self, id: &str) -> Result<BridgeTask, RepoError> {
        let (operation_hash, event_name) =
            parse_task_id(id).ok_or_else(|| RepoError::Get(format!("malformed bridge task id: {id}")))?;
        let event_name = EventName::from_str(&event_name).map_err(|e| RepoError::Get(e.to_string()))?;

        let row: Option<(i64, i64, String, i64, String, chrono::DateTime<chrono::Utc>)> = sqlx::query_as(
            "select chain_id, block_number, tx_hash, log_index, status, datetime \
             from relayer.bridge_tasks where operation_hash = $1 and event_name = $2",
        )
        .bind(&operation_hash)
        .bind(event_name.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepoError::Get(e.to_string()))?;

        let (chain_id, block_number, tx_hash, log_index, status, datetime) =
            row.ok_or_else(|| RepoError::Get(format!("bridge task not found: {id}")))?;

        Ok(BridgeTask {
            chain_id: chain_id as u64,
            block_number: block_number as u64,
            tx_hash,
            log_index: log_index as u64,
            operation_hash,
            event_name,
            status: parse_status(&status).map_err(RepoError::Get)?,
            datetime,
        })
    }

    async fn get_bridge_tasks(&self) -> Result<Vec<BridgeTask>, RepoError> {
        let rows: Vec<(String, String, i64, i64, String, i64, String, chrono::DateTime<chrono::Utc>)> = sqlx::query_as(
            "select operation_hash, event_name, chain_id, block_number, tx_hash, log_index, status, datetime \
             from relayer.bridge_tasks",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepoError::Get(e.to_string()))?;

        rows.into_iter()
            .map(
                |(operation_hash, event_name, chain_id, block_number, tx_hash, log_index, status, datetime)| {
                    Ok(BridgeTask {
                        chain_id: chain_id as u64,
                        block_number: block_number as u64,
                        tx_hash,
                        log_index: log_index as u64,
                        operation_hash,
                        event_name: EventName::from_str(&event_name).map_err(|e| RepoError::Get(e.to_string()))?,
                        status: parse_status(&status).map_err(RepoError::Get)?,
                        datetime,
                    })
                },
            )
            .collect()
    }

    async fn set_last_scanned_block(&self, chain_id: u64, block_number: u64) -> Result<(), RepoError> {
        sqlx::query(
            "insert into relayer.last_scanned_block (chain_id, block_number) values ($1, $2) \
             on conflict (chain_id) do update set block_number = excluded.block_number",
        )
        .bind(chain_id as i64)
        .bind(block_number as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::Save(e.to_string()))?;
        Ok(())
    }

    async fn get_last_scanned_block(&self, chain_id: u64) -> Result<u64, RepoError> {
        let block_number: Option<i64> =
            sqlx::query_scalar("select block_number from relayer.last_scanned_block where chain_id = $1")
                .bind(chain_id as i64)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| RepoError::Get(e.to_string()))?;
        Ok(block_number.unwrap_or(0) as u64)
    }
}

fn parse_status(s: &str) -> Result<TaskStatus, String> {
    match s {
        "PROCESSING" => Ok(TaskStatus::Processing),
        "SUCCESS" => Ok(TaskStatus::Success),
        "FAILED" => Ok(TaskStatus::Failed),
        other => Err(format!("unknown bridge task status: {other}")),
    }
}
