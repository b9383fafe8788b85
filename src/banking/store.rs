//! Ledger persistence.
//!
//! The ledger service talks to an injectable store interface so the engine
//! never depends on the persistence technology. The sqlite implementation
//! is append-only: rows are inserted in commit order and never updated.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, TransactionBehavior};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::ComplianceError;
use crate::models::{BankingTransaction, ShipYearKey, TransactionKind};

/// Per-key sums over the ledger, enough to answer every balance question
/// without materializing the rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct KindSums {
    pub banked: f64,
    pub applied_out: f64,
    pub applied_in: f64,
}

impl KindSums {
    /// Banked surplus not yet applied elsewhere. Never negative after a
    /// committed transaction (enforced at apply time).
    pub fn available_banked(&self) -> f64 {
        self.banked - self.applied_out
    }

    /// The resolver's fold: Σ APPLY_IN − Σ APPLY_OUT.
    pub fn net_transferred(&self) -> f64 {
        self.applied_in - self.applied_out
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append a single transaction.
    async fn append(&self, tx: &BankingTransaction) -> Result<(), ComplianceError>;

    /// Append the two legs of an apply atomically: both rows or neither.
    async fn append_pair(
        &self,
        out_leg: &BankingTransaction,
        in_leg: &BankingTransaction,
    ) -> Result<(), ComplianceError>;

    /// Chronological (append-order) transactions for a key.
    async fn records_for(&self, key: &ShipYearKey)
        -> Result<Vec<BankingTransaction>, ComplianceError>;

    /// Per-kind sums for a key.
    async fn kind_sums(&self, key: &ShipYearKey) -> Result<KindSums, ComplianceError>;

    /// Monotonic append counter; advances on every committed row. Used by
    /// the pool engine to detect concurrent ledger mutation.
    async fn revision(&self) -> Result<u64, ComplianceError>;
}

pub struct SqliteLedgerStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLedgerStore {
    pub fn new(db_path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(db_path).context("open ledger db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS banking_transactions (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT UNIQUE NOT NULL,
                ship_id TEXT NOT NULL,
                year INTEGER NOT NULL,
                kind TEXT NOT NULL,
                amount_gco2eq REAL NOT NULL CHECK (amount_gco2eq >= 0),
                counterparty_ship_id TEXT,
                transfer_id TEXT,
                timestamp TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_banking_key
             ON banking_transactions(ship_id, year, seq)",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn insert(conn: &Connection, tx: &BankingTransaction) -> Result<(), ComplianceError> {
        conn.execute(
            "INSERT INTO banking_transactions
             (id, ship_id, year, kind, amount_gco2eq, counterparty_ship_id, transfer_id, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                &tx.id,
                &tx.ship_id,
                tx.year,
                tx.kind.as_str(),
                tx.amount_gco2eq,
                tx.counterparty_ship_id.as_deref(),
                tx.transfer_id.as_deref(),
                tx.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn row_to_tx(row: &rusqlite::Row<'_>) -> rusqlite::Result<BankingTransaction> {
        let kind_raw: String = row.get(3)?;
        let ts_raw: String = row.get(7)?;
        Ok(BankingTransaction {
            id: row.get(0)?,
            ship_id: row.get(1)?,
            year: row.get(2)?,
            kind: TransactionKind::parse(&kind_raw).unwrap_or(TransactionKind::Bank),
            amount_gco2eq: row.get(4)?,
            counterparty_ship_id: row.get(5)?,
            transfer_id: row.get(6)?,
            timestamp: DateTime::parse_from_rfc3339(&ts_raw)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn append(&self, tx: &BankingTransaction) -> Result<(), ComplianceError> {
        let conn = self.conn.lock().await;
        Self::insert(&conn, tx)
    }

    async fn append_pair(
        &self,
        out_leg: &BankingTransaction,
        in_leg: &BankingTransaction,
    ) -> Result<(), ComplianceError> {
        let mut conn = self.conn.lock().await;
        let db_tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        Self::insert(&db_tx, out_leg)?;
        Self::insert(&db_tx, in_leg)?;
        db_tx.commit()?;
        Ok(())
    }

    async fn records_for(
        &self,
        key: &ShipYearKey,
    ) -> Result<Vec<BankingTransaction>, ComplianceError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, ship_id, year, kind, amount_gco2eq, counterparty_ship_id, transfer_id, timestamp
             FROM banking_transactions WHERE ship_id = ?1 AND year = ?2 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![&key.ship_id, key.year], Self::row_to_tx)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    async fn kind_sums(&self, key: &ShipYearKey) -> Result<KindSums, ComplianceError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT kind, COALESCE(SUM(amount_gco2eq), 0)
             FROM banking_transactions WHERE ship_id = ?1 AND year = ?2 GROUP BY kind",
        )?;
        let rows = stmt.query_map(params![&key.ship_id, key.year], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;

        let mut sums = KindSums::default();
        for row in rows {
            let (kind, total) = row?;
            match TransactionKind::parse(&kind) {
                Some(TransactionKind::Bank) => sums.banked = total,
                Some(TransactionKind::ApplyOut) => sums.applied_out = total,
                Some(TransactionKind::ApplyIn) => sums.applied_in = total,
                None => {}
            }
        }
        Ok(sums)
    }

    async fn revision(&self) -> Result<u64, ComplianceError> {
        let conn = self.conn.lock().await;
        let max: i64 = conn.query_row(
            "SELECT COALESCE(MAX(seq), 0) FROM banking_transactions",
            [],
            |row| row.get(0),
        )?;
        Ok(max as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(ship: &str, kind: TransactionKind, amount: f64) -> BankingTransaction {
        BankingTransaction {
            id: uuid::Uuid::new_v4().to_string(),
            ship_id: ship.to_string(),
            year: 2024,
            kind,
            amount_gco2eq: amount,
            counterparty_ship_id: None,
            transfer_id: None,
            timestamp: Utc::now(),
        }
    }

    fn store() -> (tempfile::TempDir, SqliteLedgerStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ledger.db");
        let store = SqliteLedgerStore::new(path.to_str().unwrap()).expect("open store");
        (dir, store)
    }

    #[tokio::test]
    async fn sums_split_by_kind_and_revision_advances() {
        let (_dir, store) = store();
        let key = ShipYearKey::new("R002", 2024);

        store
            .append(&tx("R002", TransactionKind::Bank, 2_000_000.0))
            .await
            .unwrap();
        store
            .append(&tx("R002", TransactionKind::ApplyOut, 500_000.0))
            .await
            .unwrap();

        let sums = store.kind_sums(&key).await.unwrap();
        assert!((sums.banked - 2_000_000.0).abs() < 1e-6);
        assert!((sums.available_banked() - 1_500_000.0).abs() < 1e-6);
        assert!((sums.net_transferred() + 500_000.0).abs() < 1e-6);

        assert_eq!(store.revision().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn records_come_back_in_append_order() {
        let (_dir, store) = store();
        let key = ShipYearKey::new("R002", 2024);

        for amount in [1.0, 2.0, 3.0] {
            store
                .append(&tx("R002", TransactionKind::Bank, amount))
                .await
                .unwrap();
        }

        let records = store.records_for(&key).await.unwrap();
        let amounts: Vec<f64> = records.iter().map(|r| r.amount_gco2eq).collect();
        assert_eq!(amounts, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn pair_append_is_atomic() {
        let (_dir, store) = store();
        let out_leg = tx("R002", TransactionKind::ApplyOut, 100.0);
        let mut in_leg = tx("R001", TransactionKind::ApplyIn, 100.0);
        // Force a unique-constraint failure on the second insert.
        in_leg.id = out_leg.id.clone();

        let err = store.append_pair(&out_leg, &in_leg).await;
        assert!(err.is_err());

        let sums = store
            .kind_sums(&ShipYearKey::new("R002", 2024))
            .await
            .unwrap();
        assert_eq!(sums.applied_out, 0.0);
        assert_eq!(store.revision().await.unwrap(), 0);
    }
}
