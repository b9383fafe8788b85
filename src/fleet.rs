//! Route store and baseline registry.
//!
//! Routes are the raw material every balance is recomputed from. The store
//! also owns the baseline flag: exactly one route per comparison scope (a
//! route's year) may be the baseline, and switching it is atomic.

use anyhow::Context;
use rusqlite::{params, Connection, TransactionBehavior};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::ComplianceError;
use crate::models::{normalize_ship_id, Route, RouteComparison};

pub struct RouteStore {
    conn: Arc<Mutex<Connection>>,
}

impl RouteStore {
    pub fn new(db_path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(db_path).context("open route db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS routes (
                route_id TEXT NOT NULL,
                vessel_type TEXT NOT NULL,
                fuel_type TEXT NOT NULL,
                year INTEGER NOT NULL,
                ghg_intensity REAL NOT NULL,
                fuel_consumption REAL NOT NULL,
                distance REAL NOT NULL,
                total_emissions REAL NOT NULL,
                is_baseline INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (route_id, year)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_routes_year ON routes(year, route_id)",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert the demo fleet when the table is empty so a fresh install has
    /// something to show. Returns the number of routes inserted.
    pub async fn seed_demo_fleet(&self) -> Result<usize, ComplianceError> {
        let demo = [
            ("R001", "Container", "HFO", 2024, 91.0, 5000.0, 12000.0, 4500.0, false),
            ("R002", "BulkCarrier", "LNG", 2024, 88.0, 4800.0, 11500.0, 4200.0, true),
            ("R003", "Tanker", "MGO", 2024, 93.5, 5100.0, 12500.0, 4700.0, false),
            ("R004", "RoRo", "HFO", 2025, 89.2, 4900.0, 11800.0, 4300.0, false),
            ("R005", "Container", "LNG", 2025, 90.5, 4950.0, 11900.0, 4400.0, false),
        ];

        let mut conn = self.conn.lock().await;
        let existing: i64 = conn.query_row("SELECT COUNT(*) FROM routes", [], |row| row.get(0))?;
        if existing > 0 {
            return Ok(0);
        }

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for (route_id, vessel, fuel, year, ghg, consumption, distance, emissions, baseline) in demo
        {
            tx.execute(
                "INSERT INTO routes
                 (route_id, vessel_type, fuel_type, year, ghg_intensity, fuel_consumption, distance, total_emissions, is_baseline)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    route_id,
                    vessel,
                    fuel,
                    year,
                    ghg,
                    consumption,
                    distance,
                    emissions,
                    baseline as i64
                ],
            )?;
        }
        tx.commit()?;

        info!(routes = demo.len(), "Seeded demo fleet");
        Ok(demo.len())
    }

    pub async fn all_routes(&self) -> Result<Vec<Route>, ComplianceError> {
        let conn = self.conn.lock().await;
        Self::query_all(&conn)
    }

    /// Every route for a ship in a year. Ship ids are route ids; lookups are
    /// case-insensitive through normalization.
    pub async fn routes_for(
        &self,
        ship_id: &str,
        year: i32,
    ) -> Result<Vec<Route>, ComplianceError> {
        let ship = normalize_ship_id(ship_id);
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT route_id, vessel_type, fuel_type, year, ghg_intensity, fuel_consumption, distance, total_emissions, is_baseline
             FROM routes WHERE UPPER(route_id) = ?1 AND year = ?2 ORDER BY route_id ASC",
        )?;
        let rows = stmt.query_map(params![ship, year], Self::row_to_route)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Distinct ship (route) ids with data in a year, ordered.
    pub async fn ships_for_year(&self, year: i32) -> Result<Vec<String>, ComplianceError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT UPPER(route_id) FROM routes WHERE year = ?1 ORDER BY 1 ASC",
        )?;
        let rows = stmt.query_map(params![year], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Atomically move the baseline flag to `route_id` within its year
    /// scope and return the updated route set.
    pub async fn set_baseline(&self, route_id: &str) -> Result<Vec<Route>, ComplianceError> {
        let target = normalize_ship_id(route_id);
        let mut conn = self.conn.lock().await;

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let year: Option<i32> = tx
            .query_row(
                "SELECT year FROM routes WHERE UPPER(route_id) = ?1 LIMIT 1",
                params![target],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let Some(year) = year else {
            return Err(ComplianceError::UnknownRoute(target));
        };

        tx.execute(
            "UPDATE routes SET is_baseline = 0 WHERE year = ?1",
            params![year],
        )?;
        tx.execute(
            "UPDATE routes SET is_baseline = 1 WHERE UPPER(route_id) = ?1 AND year = ?2",
            params![target, year],
        )?;
        tx.commit()?;

        info!(route = %target, year, "Baseline switched");
        Self::query_all(&conn)
    }

    /// Per-route comparison against the baseline of the route's year scope.
    /// A scope with no flagged baseline falls back to its first route.
    pub async fn comparison(&self) -> Result<Vec<RouteComparison>, ComplianceError> {
        let routes = self.all_routes().await?;

        let mut baseline_by_year: BTreeMap<i32, f64> = BTreeMap::new();
        for route in &routes {
            if route.is_baseline {
                baseline_by_year.insert(route.year, route.ghg_intensity);
            } else {
                baseline_by_year
                    .entry(route.year)
                    .or_insert(route.ghg_intensity);
            }
        }

        Ok(routes
            .iter()
            .map(|route| {
                let base = baseline_by_year
                    .get(&route.year)
                    .copied()
                    .unwrap_or(route.ghg_intensity);
                let percent_diff = if base != 0.0 {
                    (route.ghg_intensity - base) / base * 100.0
                } else {
                    0.0
                };
                RouteComparison {
                    route_id: route.route_id.clone(),
                    ghg_intensity: route.ghg_intensity,
                    baseline_intensity: base,
                    percent_diff,
                    compliant: route.ghg_intensity <= base,
                }
            })
            .collect())
    }

    fn query_all(conn: &Connection) -> Result<Vec<Route>, ComplianceError> {
        let mut stmt = conn.prepare_cached(
            "SELECT route_id, vessel_type, fuel_type, year, ghg_intensity, fuel_consumption, distance, total_emissions, is_baseline
             FROM routes ORDER BY year ASC, route_id ASC",
        )?;
        let rows = stmt.query_map([], Self::row_to_route)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn row_to_route(row: &rusqlite::Row<'_>) -> rusqlite::Result<Route> {
        Ok(Route {
            route_id: row.get(0)?,
            vessel_type: row.get(1)?,
            fuel_type: row.get(2)?,
            year: row.get(3)?,
            ghg_intensity: row.get(4)?,
            fuel_consumption: row.get(5)?,
            distance: row.get(6)?,
            total_emissions: row.get(7)?,
            is_baseline: row.get::<_, i64>(8)? != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, RouteStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fleet.db");
        let store = RouteStore::new(path.to_str().unwrap()).expect("open store");
        (dir, store)
    }

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let (_dir, store) = store();
        assert_eq!(store.seed_demo_fleet().await.unwrap(), 5);
        assert_eq!(store.seed_demo_fleet().await.unwrap(), 0);
        assert_eq!(store.all_routes().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn lookups_are_case_insensitive() {
        let (_dir, store) = store();
        store.seed_demo_fleet().await.unwrap();
        let routes = store.routes_for(" r002 ", 2024).await.unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].route_id, "R002");
    }

    #[tokio::test]
    async fn baseline_switch_is_exclusive_within_scope() {
        let (_dir, store) = store();
        store.seed_demo_fleet().await.unwrap();

        let routes = store.set_baseline("r003").await.unwrap();
        let flagged: Vec<_> = routes
            .iter()
            .filter(|r| r.year == 2024 && r.is_baseline)
            .collect();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].route_id, "R003");
    }

    #[tokio::test]
    async fn unknown_route_is_rejected() {
        let (_dir, store) = store();
        store.seed_demo_fleet().await.unwrap();
        let err = store.set_baseline("R999").await.unwrap_err();
        assert!(matches!(err, ComplianceError::UnknownRoute(_)));
    }

    #[tokio::test]
    async fn comparison_uses_scope_baseline_and_flags_compliance() {
        let (_dir, store) = store();
        store.seed_demo_fleet().await.unwrap();

        let comparisons = store.comparison().await.unwrap();
        let r001 = comparisons.iter().find(|c| c.route_id == "R001").unwrap();
        // 2024 baseline is R002 at 88.0.
        assert!((r001.baseline_intensity - 88.0).abs() < 1e-9);
        assert!(r001.percent_diff > 0.0);
        assert!(!r001.compliant);

        let r002 = comparisons.iter().find(|c| c.route_id == "R002").unwrap();
        assert!(r002.compliant);
        assert!(r002.percent_diff.abs() < 1e-9);

        // 2025 has no flagged baseline; falls back to its first route R004.
        let r005 = comparisons.iter().find(|c| c.route_id == "R005").unwrap();
        assert!((r005.baseline_intensity - 89.2).abs() < 1e-9);
        assert!(!r005.compliant);
    }
}
