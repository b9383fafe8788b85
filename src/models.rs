//! Core domain types for the compliance ledger.
//!
//! Field names serialize in camelCase: that is the canonical wire schema
//! consumed by the dashboard. Any other external spelling is an adapter
//! concern at the boundary, not something the engine knows about.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalize a caller-supplied ship identifier for lookups and storage keys.
pub fn normalize_ship_id(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Identity for all per-ship, per-year computations.
///
/// Construction normalizes the ship id (trim + uppercase); the raw caller
/// spelling is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipYearKey {
    pub ship_id: String,
    pub year: i32,
}

impl ShipYearKey {
    pub fn new(ship_id: &str, year: i32) -> Self {
        Self {
            ship_id: normalize_ship_id(ship_id),
            year,
        }
    }
}

impl std::fmt::Display for ShipYearKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.ship_id, self.year)
    }
}

/// A vessel voyage record. Ships are identified by their route ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub route_id: String,
    pub vessel_type: String,
    pub fuel_type: String,
    pub year: i32,
    /// Well-to-wake intensity, gCO₂e/MJ.
    pub ghg_intensity: f64,
    /// Fuel burned over the route, tonnes.
    pub fuel_consumption: f64,
    /// Nautical miles.
    pub distance: f64,
    /// Tonnes CO₂e.
    pub total_emissions: f64,
    pub is_baseline: bool,
}

/// Ledger transaction kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Bank,
    ApplyOut,
    ApplyIn,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Bank => "BANK",
            TransactionKind::ApplyOut => "APPLY_OUT",
            TransactionKind::ApplyIn => "APPLY_IN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BANK" => Some(TransactionKind::Bank),
            "APPLY_OUT" => Some(TransactionKind::ApplyOut),
            "APPLY_IN" => Some(TransactionKind::ApplyIn),
            _ => None,
        }
    }
}

/// One immutable entry in the banking ledger. Corrections are new
/// offsetting entries, never edits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankingTransaction {
    pub id: String,
    pub ship_id: String,
    pub year: i32,
    pub kind: TransactionKind,
    /// Non-negative magnitude; the kind carries the direction.
    pub amount_gco2eq: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterparty_ship_id: Option<String>,
    /// Shared by the two legs of an apply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl BankingTransaction {
    pub fn key(&self) -> ShipYearKey {
        ShipYearKey {
            ship_id: self.ship_id.clone(),
            year: self.year,
        }
    }
}

/// Raw compliance balance against the regulatory target, derived on demand
/// from route data and never persisted as the sole truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceBalanceRecord {
    pub ship_id: String,
    pub year: i32,
    /// Energy-weighted actual intensity, gCO₂e/MJ.
    pub actual_intensity: f64,
    pub target_intensity: f64,
    /// Energy basis in MJ used to scale the intensity gap into mass.
    pub energy_mj: f64,
    /// (target − actual) × energy basis; positive is surplus.
    pub cb_gco2eq: f64,
}

/// Derived view of a ship's balance after ledger effects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustedBalance {
    #[serde(flatten)]
    pub record: ComplianceBalanceRecord,
    /// Σ APPLY_IN − Σ APPLY_OUT. BANK entries do not appear in the fold:
    /// banking earmarks surplus for transfer without moving it.
    pub net_banked: f64,
    pub adjusted_cb: f64,
}

/// A pool member's before/after allocation, frozen at pool creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolMember {
    pub ship_id: String,
    pub cb_before: f64,
    pub cb_after: f64,
}

/// An immutable pool settlement. A new pool supersedes, never mutates, a
/// prior one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool {
    pub id: String,
    pub year: i32,
    pub total_cb: f64,
    pub members: Vec<PoolMember>,
    pub created_at: DateTime<Utc>,
}

/// Per-route comparison against the scope baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteComparison {
    pub route_id: String,
    pub ghg_intensity: f64,
    pub baseline_intensity: f64,
    pub percent_diff: f64,
    pub compliant: bool,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    /// Regulatory target intensity, gCO₂e/MJ.
    pub target_intensity: f64,
    /// Lower heating value used to turn tonnes of fuel into MJ.
    pub energy_per_tonne_mj: f64,
    /// Inclusive reporting window.
    pub year_min: i32,
    pub year_max: i32,
    /// Upper bound on per-key lock waits before failing fast.
    pub lock_wait_ms: u64,
}

impl Config {
    pub fn from_env() -> Self {
        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./fueleu.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "5000".to_string())
            .parse()
            .unwrap_or(5000);

        let target_intensity = std::env::var("TARGET_INTENSITY")
            .unwrap_or_else(|_| "89.3368".to_string())
            .parse()
            .unwrap_or(89.3368);

        let energy_per_tonne_mj = std::env::var("ENERGY_PER_TONNE_MJ")
            .unwrap_or_else(|_| "41000".to_string())
            .parse()
            .unwrap_or(41000.0);

        let year_min = std::env::var("REPORTING_YEAR_MIN")
            .unwrap_or_else(|_| "2024".to_string())
            .parse()
            .unwrap_or(2024);

        let year_max = std::env::var("REPORTING_YEAR_MAX")
            .unwrap_or_else(|_| "2025".to_string())
            .parse()
            .unwrap_or(2025);

        let lock_wait_ms = std::env::var("LOCK_WAIT_MS")
            .unwrap_or_else(|_| "2000".to_string())
            .parse()
            .unwrap_or(2000);

        Self {
            database_path,
            port,
            target_intensity,
            energy_per_tonne_mj,
            year_min,
            year_max,
            lock_wait_ms,
        }
    }

    pub fn year_in_window(&self, year: i32) -> bool {
        (self.year_min..=self.year_max).contains(&year)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "./fueleu.db".to_string(),
            port: 5000,
            target_intensity: 89.3368,
            energy_per_tonne_mj: 41000.0,
            year_min: 2024,
            year_max: 2025,
            lock_wait_ms: 2000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ship_ids_normalize_to_uppercase() {
        let key = ShipYearKey::new("  r002 ", 2024);
        assert_eq!(key.ship_id, "R002");
        assert_eq!(key.year, 2024);
    }

    #[test]
    fn transaction_kind_round_trips_through_storage_form() {
        for kind in [
            TransactionKind::Bank,
            TransactionKind::ApplyOut,
            TransactionKind::ApplyIn,
        ] {
            assert_eq!(TransactionKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(TransactionKind::parse("SETTLE"), None);
    }

    #[test]
    fn wire_schema_is_camel_case() {
        let tx = BankingTransaction {
            id: "t1".to_string(),
            ship_id: "R002".to_string(),
            year: 2024,
            kind: TransactionKind::Bank,
            amount_gco2eq: 1_000_000.0,
            counterparty_ship_id: None,
            transfer_id: None,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["shipId"], "R002");
        assert_eq!(json["kind"], "BANK");
        assert!(json.get("counterpartyShipId").is_none());
        assert!(json["amountGco2eq"].as_f64().unwrap() > 0.0);
    }
}
