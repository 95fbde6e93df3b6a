//! SQLite-backed pod store.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info};

use crate::pod::{CreatePodRequest, PodRecord, PodUpdate};
use crate::worker::WorkerId;

use super::error::{Result, StoreError};
use super::event::PodEvent;
use super::traits::PodStore;

const POD_COLUMNS: &str = "id, name, pod_type, zone, pool, power_parameters, ip_address, \
     architectures, cores, cpu_speed, memory, local_storage, hints, storage_pools, \
     version, created_at, updated_at";

/// Pod store persisted in a SQLite database.
///
/// Writes are serialized in-process and every write runs in a single
/// transaction, so a pod's discovered fields and its worker routes always
/// change together.
pub struct SqlitePodStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
    events: broadcast::Sender<PodEvent>,
}

impl SqlitePodStore {
    /// Open (or create) the database in `data_dir`.
    pub async fn new(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .map_err(|e| StoreError::Internal(format!("create {}: {e}", data_dir.display())))?;
        let db_path = data_dir.join("podsync.db");
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        info!("Opened pod database at {}", db_path.display());
        Self::from_pool(pool).await
    }

    /// Open a private in-memory database.
    pub async fn in_memory() -> Result<Self> {
        // Every connection to :memory: is a separate database, so keep exactly one alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let (events, _) = broadcast::channel(256);
        let store = Self {
            pool,
            write_lock: Mutex::new(()),
            events,
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pods (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                pod_type TEXT NOT NULL,
                zone TEXT NOT NULL,
                pool TEXT NOT NULL,
                power_parameters TEXT NOT NULL,
                ip_address TEXT,
                architectures TEXT NOT NULL,
                cores INTEGER NOT NULL,
                cpu_speed INTEGER NOT NULL,
                memory INTEGER NOT NULL,
                local_storage INTEGER NOT NULL,
                hints TEXT NOT NULL,
                storage_pools TEXT NOT NULL,
                version INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pod_routes (
                pod_id TEXT NOT NULL REFERENCES pods(id) ON DELETE CASCADE,
                worker_id TEXT NOT NULL,
                routable INTEGER NOT NULL,
                PRIMARY KEY (pod_id, worker_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl PodStore for SqlitePodStore {
    async fn list_pods(&self) -> Result<Vec<PodRecord>> {
        let mut conn = self.pool.acquire().await?;
        query_pods(&mut conn, "", None).await
    }

    async fn get_pod(&self, id: &str) -> Result<Option<PodRecord>> {
        let mut conn = self.pool.acquire().await?;
        load_pod(&mut conn, id).await
    }

    async fn get_pod_by_name(&self, name: &str) -> Result<Option<PodRecord>> {
        let mut conn = self.pool.acquire().await?;
        let pods = query_pods(&mut conn, "WHERE pods.name = ?", Some(name)).await?;
        Ok(pods.into_iter().next())
    }

    async fn create_pod(&self, req: CreatePodRequest) -> Result<PodRecord> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT 1 FROM pods WHERE name = ?")
            .bind(&req.name)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_some() {
            return Err(StoreError::Conflict(format!(
                "pod '{}' already exists",
                req.name
            )));
        }

        let pod = PodRecord::new(
            uuid::Uuid::new_v4().to_string(),
            req,
            Utc::now().to_rfc3339(),
        );

        sqlx::query(&format!(
            "INSERT INTO pods ({POD_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&pod.id)
        .bind(&pod.name)
        .bind(&pod.pod_type)
        .bind(&pod.zone)
        .bind(&pod.pool)
        .bind(serde_json::to_string(&pod.power_parameters)?)
        .bind(pod.ip_address.map(|ip| ip.to_string()))
        .bind(serde_json::to_string(&pod.architectures)?)
        .bind(pod.cores as i64)
        .bind(pod.cpu_speed as i64)
        .bind(pod.memory as i64)
        .bind(pod.local_storage as i64)
        .bind(serde_json::to_string(&pod.hints)?)
        .bind(serde_json::to_string(&pod.storage_pools)?)
        .bind(pod.version as i64)
        .bind(&pod.created_at)
        .bind(&pod.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        let _ = self.events.send(PodEvent::Created(pod.clone()));
        Ok(pod)
    }

    async fn apply_update(&self, id: &str, update: &PodUpdate) -> Result<PodRecord> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let old = load_pod(&mut tx, id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("pod {id}")))?;

        let mut new = old.clone();
        if !new.apply(update, Utc::now().to_rfc3339()) {
            debug!("Pod {} unchanged, nothing to write", id);
            return Ok(old);
        }

        sqlx::query(
            r#"
            UPDATE pods SET architectures = ?, cores = ?, cpu_speed = ?, memory = ?,
                local_storage = ?, hints = ?, storage_pools = ?, version = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(serde_json::to_string(&new.architectures)?)
        .bind(new.cores as i64)
        .bind(new.cpu_speed as i64)
        .bind(new.memory as i64)
        .bind(new.local_storage as i64)
        .bind(serde_json::to_string(&new.hints)?)
        .bind(serde_json::to_string(&new.storage_pools)?)
        .bind(new.version as i64)
        .bind(&new.updated_at)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM pod_routes WHERE pod_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        for (worker_id, routable) in &new.routable {
            sqlx::query("INSERT INTO pod_routes (pod_id, worker_id, routable) VALUES (?, ?, ?)")
                .bind(id)
                .bind(worker_id.as_str())
                .bind(*routable)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        let _ = self.events.send(PodEvent::Synced {
            old,
            new: new.clone(),
        });
        Ok(new)
    }

    async fn delete_pod(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM pod_routes WHERE pod_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM pods WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("pod {id}")));
        }

        tx.commit().await?;
        let _ = self.events.send(PodEvent::Deleted { id: id.to_string() });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PodEvent> {
        self.events.subscribe()
    }
}

async fn load_pod(conn: &mut SqliteConnection, id: &str) -> Result<Option<PodRecord>> {
    let pods = query_pods(conn, "WHERE pods.id = ?", Some(id)).await?;
    Ok(pods.into_iter().next())
}

/// Load pods together with their routes.
///
/// Fields and routes are read by a single statement, so they always come
/// from the same commit even while a reconciliation is being written.
async fn query_pods(
    conn: &mut SqliteConnection,
    filter: &str,
    value: Option<&str>,
) -> Result<Vec<PodRecord>> {
    let sql = format!(
        "SELECT {POD_COLUMNS}, pod_routes.worker_id, pod_routes.routable \
         FROM pods LEFT JOIN pod_routes ON pod_routes.pod_id = pods.id \
         {filter} ORDER BY pods.name, pods.id, pod_routes.worker_id"
    );
    let mut query = sqlx::query(&sql);
    if let Some(value) = value {
        query = query.bind(value);
    }
    let rows = query.fetch_all(&mut *conn).await?;

    let mut pods: Vec<PodRecord> = Vec::new();
    for row in &rows {
        let id: &str = row.get("id");
        if pods.last().is_none_or(|pod| pod.id != id) {
            pods.push(row_to_pod(row)?);
        }

        let worker_id: Option<String> = row.get("worker_id");
        let routable: Option<bool> = row.get("routable");
        if let (Some(worker_id), Some(routable), Some(pod)) = (worker_id, routable, pods.last_mut())
        {
            pod.routable.insert(WorkerId::new(worker_id), routable);
        }
    }
    Ok(pods)
}

fn row_to_pod(row: &SqliteRow) -> Result<PodRecord> {
    let ip_address = row
        .get::<Option<String>, _>("ip_address")
        .map(|ip| {
            ip.parse()
                .map_err(|e| StoreError::Internal(format!("bad ip address '{ip}': {e}")))
        })
        .transpose()?;

    Ok(PodRecord {
        id: row.get("id"),
        name: row.get("name"),
        pod_type: row.get("pod_type"),
        zone: row.get("zone"),
        pool: row.get("pool"),
        power_parameters: serde_json::from_str(row.get("power_parameters"))?,
        ip_address,
        architectures: serde_json::from_str(row.get("architectures"))?,
        cores: row.get::<i64, _>("cores") as u32,
        cpu_speed: row.get::<i64, _>("cpu_speed") as u32,
        memory: row.get::<i64, _>("memory") as u64,
        local_storage: row.get::<i64, _>("local_storage") as u64,
        hints: serde_json::from_str(row.get("hints"))?,
        storage_pools: serde_json::from_str(row.get("storage_pools"))?,
        routable: Default::default(),
        version: row.get::<i64, _>("version") as u64,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
