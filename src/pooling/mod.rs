//! Pool allocation engine.
//!
//! A pool nets the compliance balances of its members for one year: every
//! deficit member is lifted to zero and the leftover surplus is split
//! pro-rata among the surplus members. A pool with a net deficit cannot be
//! formed — pooling never creates compliance out of nothing.

pub mod store;

use chrono::Utc;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::banking::store::LedgerStore;
use crate::error::ComplianceError;
use crate::models::{normalize_ship_id, Config, Pool, PoolMember};
use store::PoolStore;

/// Caller-submitted member snapshot.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolMemberInput {
    pub ship_id: String,
    #[serde(default)]
    pub cb_before: f64,
}

/// Quantization step for allocated amounts: 3 decimal places of a gram.
const AMOUNT_STEP: f64 = 1e-3;
const SUM_EPSILON: f64 = 1e-6;

fn round_amount(value: f64) -> f64 {
    (value / AMOUNT_STEP).round() * AMOUNT_STEP
}

/// Compute the per-member allocation for a prospective pool.
///
/// Pure: validates the member set, zeroes every deficit member, splits the
/// remaining surplus pro-rata, and repairs the rounding remainder so that
/// Σ cb_after equals Σ cb_before exactly. The remainder lands on the
/// largest-magnitude surplus member, ties broken by smallest ship id.
pub fn allocate(members: &[PoolMemberInput]) -> Result<Vec<PoolMember>, ComplianceError> {
    if members.is_empty() {
        return Err(ComplianceError::InvalidPool);
    }

    let mut seen = HashSet::new();
    let mut normalized: Vec<PoolMember> = Vec::with_capacity(members.len());
    for member in members {
        let ship_id = normalize_ship_id(&member.ship_id);
        if ship_id.is_empty() {
            return Err(ComplianceError::InvalidMember);
        }
        if !seen.insert(ship_id.clone()) {
            return Err(ComplianceError::DuplicateMember(ship_id));
        }
        if !member.cb_before.is_finite() {
            return Err(ComplianceError::InvalidMember);
        }
        normalized.push(PoolMember {
            ship_id,
            cb_before: member.cb_before,
            cb_after: 0.0,
        });
    }

    let total: f64 = normalized.iter().map(|m| m.cb_before).sum();
    if total < -SUM_EPSILON {
        return Err(ComplianceError::InvalidPool);
    }

    let total_surplus: f64 = normalized
        .iter()
        .map(|m| m.cb_before)
        .filter(|cb| *cb > 0.0)
        .sum();
    let total_deficit: f64 = normalized
        .iter()
        .map(|m| m.cb_before)
        .filter(|cb| *cb < 0.0)
        .map(f64::abs)
        .sum();

    // Unreachable when the total is non-negative; if it fires, the inputs
    // were corrupted after validation.
    if total_surplus + SUM_EPSILON < total_deficit {
        return Err(ComplianceError::AllocationInvariant(format!(
            "surplus {total_surplus} cannot cover deficit {total_deficit}"
        )));
    }

    let remaining = total_surplus - total_deficit;
    for member in &mut normalized {
        member.cb_after = if member.cb_before > 0.0 && total_surplus > 0.0 {
            round_amount(member.cb_before / total_surplus * remaining)
        } else {
            0.0
        };
    }

    // Rounding repair: conservation must hold exactly.
    let allocated: f64 = normalized.iter().map(|m| m.cb_after).sum();
    let remainder = total - allocated;
    if remainder.abs() > 0.0 {
        let target = normalized
            .iter_mut()
            .filter(|m| m.cb_before > 0.0)
            .max_by(|a, b| {
                a.cb_before
                    .partial_cmp(&b.cb_before)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.ship_id.cmp(&a.ship_id))
            });
        match target {
            Some(member) => member.cb_after += remainder,
            None if remainder.abs() <= SUM_EPSILON => {}
            None => {
                return Err(ComplianceError::AllocationInvariant(format!(
                    "remainder {remainder} with no surplus member to absorb it"
                )))
            }
        }
    }

    Ok(normalized)
}

/// Creates and persists immutable pool settlements.
pub struct PoolEngine {
    store: PoolStore,
    ledger: Arc<dyn LedgerStore>,
    year_min: i32,
    year_max: i32,
}

impl PoolEngine {
    pub fn new(store: PoolStore, ledger: Arc<dyn LedgerStore>, cfg: &Config) -> Self {
        Self {
            store,
            ledger,
            year_min: cfg.year_min,
            year_max: cfg.year_max,
        }
    }

    /// Validate, allocate, and persist a pool.
    ///
    /// The submitted cb_before values are a snapshot of adjusted balances;
    /// if the ledger advances between allocation and commit the snapshot is
    /// stale and the call fails — the caller re-reads and retries. We never
    /// re-snapshot silently: that would commit numbers the caller never saw.
    pub async fn create_pool(
        &self,
        year: i32,
        members: &[PoolMemberInput],
    ) -> Result<Pool, ComplianceError> {
        if !(self.year_min..=self.year_max).contains(&year) {
            return Err(ComplianceError::InvalidPeriod {
                year,
                min: self.year_min,
                max: self.year_max,
            });
        }

        let revision = self.ledger.revision().await?;
        let allocated = allocate(members)?;
        let total_cb = allocated.iter().map(|m| m.cb_before).sum();

        if self.ledger.revision().await? != revision {
            return Err(ComplianceError::StalePoolInput);
        }

        let pool = Pool {
            id: Uuid::new_v4().to_string(),
            year,
            total_cb,
            members: allocated,
            created_at: Utc::now(),
        };
        self.store.insert_pool(&pool).await?;

        info!(
            pool = %pool.id,
            year,
            members = pool.members.len(),
            total_cb,
            "Pool created"
        );
        Ok(pool)
    }

    pub async fn pools_for(&self, year: Option<i32>) -> Result<Vec<Pool>, ComplianceError> {
        self.store.list_pools(year).await
    }
}
