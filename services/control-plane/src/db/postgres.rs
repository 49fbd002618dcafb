//! Postgres-backed store.
//!
//! Every transaction runs at SERIALIZABLE isolation. Account rows are
//! additionally locked with `FOR UPDATE` so that admission and metering on
//! the same account queue behind each other instead of failing late.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_events::{WorkloadEventKind, WorkloadStatus};
use fleet_id::{AccountId, NodeId, TierId, WorkloadId};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};

use super::store::{Store, StoreTx};
use super::DbError;
use crate::models::{Account, Node, Reserved, Resources, Tier, Workload, WorkloadEvent, WorkloadSpec};

/// A [`Store`] over a Postgres connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, DbError> {
        let mut tx = self.pool.begin().await.map_err(DbError::from_sqlx)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(DbError::from_sqlx)?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn health_check(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;
        Ok(())
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

// =============================================================================
// Row mapping
// =============================================================================

fn parse_column<T>(column: &str, value: &str) -> Result<T, DbError>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .parse()
        .map_err(|e| DbError::Decode(format!("{column}: {e}")))
}

fn to_u32(column: &str, value: i64) -> Result<u32, DbError> {
    u32::try_from(value).map_err(|_| DbError::Decode(format!("{column}: {value} out of range")))
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, DbError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column).map_err(DbError::Query)
}

fn resources_from_row(row: &PgRow) -> Result<Resources, DbError> {
    Ok(Resources {
        cpus: to_u32("cpus", get(row, "cpus")?)?,
        memory_mb: to_u32("memory_mb", get(row, "memory_mb")?)?,
        disk_gb: to_u32("disk_gb", get(row, "disk_gb")?)?,
        gpus: to_u32("gpus", get(row, "gpus")?)?,
    })
}

fn account_from_row(row: &PgRow) -> Result<Account, DbError> {
    let id: String = get(row, "account_id")?;
    Ok(Account {
        id: parse_column("account_id", &id)?,
        name: get(row, "name")?,
        token_hash: get(row, "token_hash")?,
        credits: get(row, "credits")?,
        created_at: get(row, "created_at")?,
    })
}

fn tier_from_row(row: &PgRow) -> Result<Tier, DbError> {
    let id: String = get(row, "tier_id")?;
    Ok(Tier {
        id: parse_column("tier_id", &id)?,
        name: get(row, "name")?,
        resources: resources_from_row(row)?,
        cost: get(row, "cost")?,
        created_at: get(row, "created_at")?,
    })
}

fn node_from_row(row: &PgRow) -> Result<Node, DbError> {
    let id: String = get(row, "node_id")?;
    Ok(Node {
        id: parse_column("node_id", &id)?,
        hostname: get(row, "hostname")?,
        public_ip: get(row, "public_ip")?,
        token: get(row, "token")?,
        agent_version: get(row, "agent_version")?,
        resources: resources_from_row(row)?,
        reserved: Reserved {
            cpus: to_u32("reserved_cpus", get(row, "reserved_cpus")?)?,
            memory_mb: to_u32("reserved_memory_mb", get(row, "reserved_memory_mb")?)?,
            disk_gb: to_u32("reserved_disk_gb", get(row, "reserved_disk_gb")?)?,
        },
        gpu_model: get(row, "gpu_model")?,
        last_seen_at: get(row, "last_seen_at")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn workload_from_row(row: &PgRow) -> Result<Workload, DbError> {
    let id: String = get(row, "workload_id")?;
    let account_id: String = get(row, "account_id")?;
    let node_id: String = get(row, "node_id")?;
    let status: String = get(row, "status")?;
    let spec: serde_json::Value = get(row, "spec")?;
    Ok(Workload {
        id: parse_column("workload_id", &id)?,
        account_id: parse_column("account_id", &account_id)?,
        node_id: parse_column("node_id", &node_id)?,
        name: get(row, "name")?,
        resources: resources_from_row(row)?,
        credit_rate: get(row, "credit_rate")?,
        status: parse_column("status", &status)?,
        domain: get(row, "domain")?,
        spec: serde_json::from_value::<WorkloadSpec>(spec)?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn event_from_row(row: &PgRow) -> Result<WorkloadEvent, DbError> {
    let id: String = get(row, "event_id")?;
    let workload_id: String = get(row, "workload_id")?;
    let kind: String = get(row, "kind")?;
    let detail: Option<String> = get(row, "detail")?;
    Ok(WorkloadEvent {
        id: parse_column("event_id", &id)?,
        workload_id: parse_column("workload_id", &workload_id)?,
        kind: WorkloadEventKind::from_parts(&kind, detail)
            .map_err(|e| DbError::Decode(format!("kind: {e}")))?,
        timestamp: get(row, "occurred_at")?,
    })
}

fn collect<T>(rows: &[PgRow], f: fn(&PgRow) -> Result<T, DbError>) -> Result<Vec<T>, DbError> {
    rows.iter().map(f).collect()
}

const ACCOUNT_COLUMNS: &str = "account_id, name, token_hash, credits, created_at";
const TIER_COLUMNS: &str = "tier_id, name, cpus, memory_mb, disk_gb, gpus, cost, created_at";
const NODE_COLUMNS: &str = "node_id, hostname, public_ip, token, agent_version, \
    cpus, memory_mb, disk_gb, gpus, gpu_model, \
    reserved_cpus, reserved_memory_mb, reserved_disk_gb, \
    last_seen_at, created_at, updated_at";
const WORKLOAD_COLUMNS: &str = "workload_id, account_id, node_id, name, \
    cpus, memory_mb, disk_gb, gpus, credit_rate, status, domain, spec, \
    created_at, updated_at";

#[async_trait]
impl StoreTx for PgTx {
    // -------------------------------------------------------------------------
    // Accounts
    // -------------------------------------------------------------------------

    async fn insert_account(&mut self, account: &Account) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO accounts (account_id, name, token_hash, credits, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(account.id.to_string())
        .bind(&account.name)
        .bind(&account.token_hash)
        .bind(account.credits)
        .bind(account.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(DbError::from_sqlx)?;
        Ok(())
    }

    async fn get_account(&mut self, id: &AccountId) -> Result<Option<Account>, DbError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE account_id = $1");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(DbError::from_sqlx)?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn lock_account(&mut self, id: &AccountId) -> Result<Option<Account>, DbError> {
        let sql =
            format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE account_id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(DbError::from_sqlx)?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_account_by_token_hash(
        &mut self,
        token_hash: &str,
    ) -> Result<Option<Account>, DbError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE token_hash = $1");
        let row = sqlx::query(&sql)
            .bind(token_hash)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(DbError::from_sqlx)?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn list_accounts(&mut self) -> Result<Vec<Account>, DbError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY account_id");
        let rows = sqlx::query(&sql)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(DbError::from_sqlx)?;
        collect(&rows, account_from_row)
    }

    async fn set_account_credits(
        &mut self,
        id: &AccountId,
        credits: i64,
    ) -> Result<bool, DbError> {
        let result = sqlx::query("UPDATE accounts SET credits = $2 WHERE account_id = $1")
            .bind(id.to_string())
            .bind(credits)
            .execute(&mut *self.tx)
            .await
            .map_err(DbError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    // -------------------------------------------------------------------------
    // Tiers
    // -------------------------------------------------------------------------

    async fn insert_tier(&mut self, tier: &Tier) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO tiers (tier_id, name, cpus, memory_mb, disk_gb, gpus, cost, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(tier.id.to_string())
        .bind(&tier.name)
        .bind(i64::from(tier.resources.cpus))
        .bind(i64::from(tier.resources.memory_mb))
        .bind(i64::from(tier.resources.disk_gb))
        .bind(i64::from(tier.resources.gpus))
        .bind(tier.cost)
        .bind(tier.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(DbError::from_sqlx)?;
        Ok(())
    }

    async fn list_tiers(&mut self) -> Result<Vec<Tier>, DbError> {
        let sql = format!("SELECT {TIER_COLUMNS} FROM tiers ORDER BY tier_id");
        let rows = sqlx::query(&sql)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(DbError::from_sqlx)?;
        collect(&rows, tier_from_row)
    }

    async fn find_tier_by_resources(
        &mut self,
        resources: &Resources,
    ) -> Result<Option<Tier>, DbError> {
        let sql = format!(
            "SELECT {TIER_COLUMNS} FROM tiers \
             WHERE cpus = $1 AND memory_mb = $2 AND disk_gb = $3 AND gpus = $4"
        );
        let row = sqlx::query(&sql)
            .bind(i64::from(resources.cpus))
            .bind(i64::from(resources.memory_mb))
            .bind(i64::from(resources.disk_gb))
            .bind(i64::from(resources.gpus))
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(DbError::from_sqlx)?;
        row.as_ref().map(tier_from_row).transpose()
    }

    async fn delete_tier(&mut self, id: &TierId) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM tiers WHERE tier_id = $1")
            .bind(id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(DbError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    // -------------------------------------------------------------------------
    // Nodes
    // -------------------------------------------------------------------------

    async fn insert_node(&mut self, node: &Node) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO nodes (node_id, hostname, public_ip, token, agent_version, \
             cpus, memory_mb, disk_gb, gpus, gpu_model, \
             reserved_cpus, reserved_memory_mb, reserved_disk_gb, \
             last_seen_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(node.id.to_string())
        .bind(&node.hostname)
        .bind(&node.public_ip)
        .bind(&node.token)
        .bind(&node.agent_version)
        .bind(i64::from(node.resources.cpus))
        .bind(i64::from(node.resources.memory_mb))
        .bind(i64::from(node.resources.disk_gb))
        .bind(i64::from(node.resources.gpus))
        .bind(&node.gpu_model)
        .bind(i64::from(node.reserved.cpus))
        .bind(i64::from(node.reserved.memory_mb))
        .bind(i64::from(node.reserved.disk_gb))
        .bind(node.last_seen_at)
        .bind(node.created_at)
        .bind(node.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(DbError::from_sqlx)?;
        Ok(())
    }

    async fn update_node(&mut self, node: &Node) -> Result<bool, DbError> {
        let result = sqlx::query(
            "UPDATE nodes SET hostname = $2, public_ip = $3, token = $4, agent_version = $5, \
             cpus = $6, memory_mb = $7, disk_gb = $8, gpus = $9, gpu_model = $10, \
             reserved_cpus = $11, reserved_memory_mb = $12, reserved_disk_gb = $13, \
             last_seen_at = $14, updated_at = $15 \
             WHERE node_id = $1",
        )
        .bind(node.id.to_string())
        .bind(&node.hostname)
        .bind(&node.public_ip)
        .bind(&node.token)
        .bind(&node.agent_version)
        .bind(i64::from(node.resources.cpus))
        .bind(i64::from(node.resources.memory_mb))
        .bind(i64::from(node.resources.disk_gb))
        .bind(i64::from(node.resources.gpus))
        .bind(&node.gpu_model)
        .bind(i64::from(node.reserved.cpus))
        .bind(i64::from(node.reserved.memory_mb))
        .bind(i64::from(node.reserved.disk_gb))
        .bind(node.last_seen_at)
        .bind(node.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(DbError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_node(&mut self, id: &NodeId) -> Result<Option<Node>, DbError> {
        let sql = format!("SELECT {NODE_COLUMNS} FROM nodes WHERE node_id = $1");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(DbError::from_sqlx)?;
        row.as_ref().map(node_from_row).transpose()
    }

    async fn list_nodes(&mut self) -> Result<Vec<Node>, DbError> {
        let sql = format!("SELECT {NODE_COLUMNS} FROM nodes ORDER BY node_id");
        let rows = sqlx::query(&sql)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(DbError::from_sqlx)?;
        collect(&rows, node_from_row)
    }

    async fn list_nodes_seen_since(
        &mut self,
        seen_since: DateTime<Utc>,
    ) -> Result<Vec<Node>, DbError> {
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE last_seen_at >= $1 ORDER BY node_id"
        );
        let rows = sqlx::query(&sql)
            .bind(seen_since)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(DbError::from_sqlx)?;
        collect(&rows, node_from_row)
    }

    async fn touch_node(&mut self, id: &NodeId, seen_at: DateTime<Utc>) -> Result<bool, DbError> {
        let result = sqlx::query("UPDATE nodes SET last_seen_at = $2 WHERE node_id = $1")
            .bind(id.to_string())
            .bind(seen_at)
            .execute(&mut *self.tx)
            .await
            .map_err(DbError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_node(&mut self, id: &NodeId) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM nodes WHERE node_id = $1")
            .bind(id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(DbError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn active_usage_by_node(&mut self) -> Result<HashMap<NodeId, Resources>, DbError> {
        let rows = sqlx::query(
            "SELECT node_id, \
                    COALESCE(SUM(cpus), 0)::BIGINT AS cpus, \
                    COALESCE(SUM(memory_mb), 0)::BIGINT AS memory_mb, \
                    COALESCE(SUM(disk_gb), 0)::BIGINT AS disk_gb, \
                    COALESCE(SUM(gpus), 0)::BIGINT AS gpus \
             FROM workloads \
             WHERE status <> 'stopped' \
             GROUP BY node_id",
        )
        .fetch_all(&mut *self.tx)
        .await
        .map_err(DbError::from_sqlx)?;

        let mut usage = HashMap::with_capacity(rows.len());
        for row in &rows {
            let node_id: String = get(row, "node_id")?;
            usage.insert(parse_column("node_id", &node_id)?, resources_from_row(row)?);
        }
        Ok(usage)
    }

    async fn count_node_workloads(&mut self, id: &NodeId) -> Result<u64, DbError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM workloads WHERE node_id = $1")
            .bind(id.to_string())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(DbError::from_sqlx)?;
        Ok(count.max(0) as u64)
    }

    // -------------------------------------------------------------------------
    // Workloads
    // -------------------------------------------------------------------------

    async fn insert_workload(&mut self, workload: &Workload) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO workloads (workload_id, account_id, node_id, name, \
             cpus, memory_mb, disk_gb, gpus, credit_rate, status, domain, spec, \
             created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(workload.id.to_string())
        .bind(workload.account_id.to_string())
        .bind(workload.node_id.to_string())
        .bind(&workload.name)
        .bind(i64::from(workload.resources.cpus))
        .bind(i64::from(workload.resources.memory_mb))
        .bind(i64::from(workload.resources.disk_gb))
        .bind(i64::from(workload.resources.gpus))
        .bind(workload.credit_rate)
        .bind(workload.status.as_str())
        .bind(&workload.domain)
        .bind(serde_json::to_value(&workload.spec)?)
        .bind(workload.created_at)
        .bind(workload.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(DbError::from_sqlx)?;
        Ok(())
    }

    async fn get_workload(&mut self, id: &WorkloadId) -> Result<Option<Workload>, DbError> {
        let sql = format!("SELECT {WORKLOAD_COLUMNS} FROM workloads WHERE workload_id = $1");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(DbError::from_sqlx)?;
        row.as_ref().map(workload_from_row).transpose()
    }

    async fn list_account_workloads(
        &mut self,
        account_id: &AccountId,
    ) -> Result<Vec<Workload>, DbError> {
        let sql = format!(
            "SELECT {WORKLOAD_COLUMNS} FROM workloads WHERE account_id = $1 ORDER BY workload_id"
        );
        let rows = sqlx::query(&sql)
            .bind(account_id.to_string())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(DbError::from_sqlx)?;
        collect(&rows, workload_from_row)
    }

    async fn list_active_workloads(&mut self) -> Result<Vec<Workload>, DbError> {
        let sql = format!(
            "SELECT {WORKLOAD_COLUMNS} FROM workloads WHERE status <> 'stopped' ORDER BY workload_id"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(DbError::from_sqlx)?;
        collect(&rows, workload_from_row)
    }

    async fn set_workload_status(
        &mut self,
        id: &WorkloadId,
        status: WorkloadStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let result =
            sqlx::query("UPDATE workloads SET status = $2, updated_at = $3 WHERE workload_id = $1")
                .bind(id.to_string())
                .bind(status.as_str())
                .bind(updated_at)
                .execute(&mut *self.tx)
                .await
                .map_err(DbError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_workload(&mut self, id: &WorkloadId) -> Result<bool, DbError> {
        // Events go with the row through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM workloads WHERE workload_id = $1")
            .bind(id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(DbError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn account_spend_rate(&mut self, account_id: &AccountId) -> Result<i64, DbError> {
        let rate: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(credit_rate), 0)::BIGINT FROM workloads \
             WHERE account_id = $1 AND status <> 'stopped'",
        )
        .bind(account_id.to_string())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(DbError::from_sqlx)?;
        Ok(rate)
    }

    // -------------------------------------------------------------------------
    // Workload Events
    // -------------------------------------------------------------------------

    async fn insert_event(&mut self, event: &WorkloadEvent) -> Result<bool, DbError> {
        let result = sqlx::query(
            "INSERT INTO workload_events (event_id, workload_id, kind, detail, occurred_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT ON CONSTRAINT workload_events_dedup_key DO NOTHING",
        )
        .bind(event.id.to_string())
        .bind(event.workload_id.to_string())
        .bind(event.kind.name())
        .bind(event.kind.detail())
        .bind(event.timestamp)
        .execute(&mut *self.tx)
        .await
        .map_err(DbError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_events(
        &mut self,
        workload_id: &WorkloadId,
    ) -> Result<Vec<WorkloadEvent>, DbError> {
        let rows = sqlx::query(
            "SELECT event_id, workload_id, kind, detail, occurred_at \
             FROM workload_events WHERE workload_id = $1 \
             ORDER BY occurred_at, seq",
        )
        .bind(workload_id.to_string())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(DbError::from_sqlx)?;
        collect(&rows, event_from_row)
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        self.tx.commit().await.map_err(DbError::from_sqlx)
    }
}
