//! Pool persistence. Pools are written once — pool row plus member rows in
//! a single transaction — and only ever read afterwards.

use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, TransactionBehavior};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::ComplianceError;
use crate::models::{Pool, PoolMember};

pub struct PoolStore {
    conn: Arc<Mutex<Connection>>,
}

impl PoolStore {
    pub fn new(db_path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(db_path).context("open pool db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS pools (
                id TEXT PRIMARY KEY,
                year INTEGER NOT NULL,
                total_cb REAL NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS pool_members (
                pool_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                ship_id TEXT NOT NULL,
                cb_before REAL NOT NULL,
                cb_after REAL NOT NULL,
                PRIMARY KEY (pool_id, position)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_pools_year ON pools(year, created_at)",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn insert_pool(&self, pool: &Pool) -> Result<(), ComplianceError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT INTO pools (id, year, total_cb, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                &pool.id,
                pool.year,
                pool.total_cb,
                pool.created_at.to_rfc3339()
            ],
        )?;
        for (position, member) in pool.members.iter().enumerate() {
            tx.execute(
                "INSERT INTO pool_members (pool_id, position, ship_id, cb_before, cb_after)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    &pool.id,
                    position as i64,
                    &member.ship_id,
                    member.cb_before,
                    member.cb_after
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Pools, most recent first, optionally restricted to a year.
    pub async fn list_pools(&self, year: Option<i32>) -> Result<Vec<Pool>, ComplianceError> {
        let conn = self.conn.lock().await;

        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<Pool> {
            let created_raw: String = row.get(3)?;
            Ok(Pool {
                id: row.get(0)?,
                year: row.get(1)?,
                total_cb: row.get(2)?,
                members: Vec::new(),
                created_at: DateTime::parse_from_rfc3339(&created_raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            })
        };
        let mut pools: Vec<Pool> = match year {
            Some(y) => {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, year, total_cb, created_at FROM pools
                     WHERE year = ?1 ORDER BY created_at DESC, id DESC",
                )?;
                let rows = stmt.query_map(params![y], map_row)?;
                rows.collect::<Result<_, _>>()?
            }
            None => {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, year, total_cb, created_at FROM pools
                     ORDER BY created_at DESC, id DESC",
                )?;
                let rows = stmt.query_map([], map_row)?;
                rows.collect::<Result<_, _>>()?
            }
        };

        let mut stmt = conn.prepare_cached(
            "SELECT ship_id, cb_before, cb_after FROM pool_members
             WHERE pool_id = ?1 ORDER BY position ASC",
        )?;
        for pool in &mut pools {
            let members = stmt.query_map(params![&pool.id], |row| {
                Ok(PoolMember {
                    ship_id: row.get(0)?,
                    cb_before: row.get(1)?,
                    cb_after: row.get(2)?,
                })
            })?;
            pool.members = members.collect::<Result<Vec<_>, _>>()?;
        }

        Ok(pools)
    }
}
