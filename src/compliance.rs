//! Compliance balance derivation.
//!
//! The raw balance is recomputed from route data on every call — never
//! cached across route changes — and the adjusted balance folds the
//! banking ledger on top. Both are pure reads.

use std::sync::Arc;

use crate::banking::store::LedgerStore;
use crate::error::ComplianceError;
use crate::fleet::RouteStore;
use crate::models::{AdjustedBalance, ComplianceBalanceRecord, Config, ShipYearKey};

/// Computes a ship's raw compliance balance against the target intensity.
pub struct IntensityAggregator {
    routes: Arc<RouteStore>,
    target_intensity: f64,
    energy_per_tonne_mj: f64,
    year_min: i32,
    year_max: i32,
}

impl IntensityAggregator {
    pub fn new(routes: Arc<RouteStore>, cfg: &Config) -> Self {
        Self {
            routes,
            target_intensity: cfg.target_intensity,
            energy_per_tonne_mj: cfg.energy_per_tonne_mj,
            year_min: cfg.year_min,
            year_max: cfg.year_max,
        }
    }

    /// Aggregate a ship's routes for a year into a raw compliance balance.
    ///
    /// Intensity is weighted by each route's energy share, so the balance
    /// of a multi-route year equals the sum of per-route balances.
    pub async fn compute_cb(
        &self,
        ship_id: &str,
        year: i32,
    ) -> Result<ComplianceBalanceRecord, ComplianceError> {
        if !(self.year_min..=self.year_max).contains(&year) {
            return Err(ComplianceError::InvalidPeriod {
                year,
                min: self.year_min,
                max: self.year_max,
            });
        }

        let key = ShipYearKey::new(ship_id, year);
        let routes = self.routes.routes_for(&key.ship_id, year).await?;

        let total_energy_mj: f64 = routes
            .iter()
            .map(|r| r.fuel_consumption * self.energy_per_tonne_mj)
            .sum();
        if routes.is_empty() || total_energy_mj <= 0.0 {
            return Err(ComplianceError::NoRouteData {
                ship_id: key.ship_id,
                year,
            });
        }

        let actual_intensity = routes
            .iter()
            .map(|r| r.ghg_intensity * r.fuel_consumption * self.energy_per_tonne_mj)
            .sum::<f64>()
            / total_energy_mj;

        Ok(ComplianceBalanceRecord {
            ship_id: key.ship_id,
            year,
            actual_intensity,
            target_intensity: self.target_intensity,
            energy_mj: total_energy_mj,
            cb_gco2eq: (self.target_intensity - actual_intensity) * total_energy_mj,
        })
    }
}

/// Folds ledger effects over the raw balance.
pub struct BalanceResolver {
    aggregator: Arc<IntensityAggregator>,
    routes: Arc<RouteStore>,
    ledger: Arc<dyn LedgerStore>,
}

impl BalanceResolver {
    pub fn new(
        aggregator: Arc<IntensityAggregator>,
        routes: Arc<RouteStore>,
        ledger: Arc<dyn LedgerStore>,
    ) -> Self {
        Self {
            aggregator,
            routes,
            ledger,
        }
    }

    /// Current adjusted balance for a ship: raw CB plus net transfers.
    ///
    /// BANK entries are deliberately absent from the fold — they earmark
    /// surplus for outgoing transfer without moving it.
    pub async fn adjusted_cb(
        &self,
        ship_id: &str,
        year: i32,
    ) -> Result<AdjustedBalance, ComplianceError> {
        let record = self
            .aggregator
            .compute_cb(ship_id, year)
            .await
            .map_err(|err| match err {
                ComplianceError::NoRouteData { ship_id, year } => {
                    ComplianceError::UnknownShip { ship_id, year }
                }
                other => other,
            })?;

        let key = ShipYearKey::new(&record.ship_id, year);
        let sums = self.ledger.kind_sums(&key).await?;
        let net_banked = sums.net_transferred();

        Ok(AdjustedBalance {
            adjusted_cb: record.cb_gco2eq + net_banked,
            record,
            net_banked,
        })
    }

    /// Adjusted balances for every ship with route data in a year, ordered
    /// by ship id. Feeds the dashboard's pool member pre-fill.
    pub async fn adjusted_for_year(
        &self,
        year: i32,
    ) -> Result<Vec<AdjustedBalance>, ComplianceError> {
        let ships = self.routes.ships_for_year(year).await?;
        let mut balances = Vec::with_capacity(ships.len());
        for ship in ships {
            balances.push(self.adjusted_cb(&ship, year).await?);
        }
        Ok(balances)
    }
}
