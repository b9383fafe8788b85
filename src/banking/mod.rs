//! Banking ledger: earmark surplus, transfer it between ships, audit it.
//!
//! Banking follows the earmark model: a BANK entry reserves surplus for a
//! later cross-ship transfer and does not change the banking ship's own
//! adjusted balance. An apply moves previously banked surplus as a paired
//! APPLY_OUT/APPLY_IN, committed together or not at all.

pub mod locks;
pub mod store;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::compliance::BalanceResolver;
use crate::error::ComplianceError;
use crate::models::{BankingTransaction, Config, ShipYearKey, TransactionKind};
use locks::KeyLocks;
use store::LedgerStore;

/// Slack for float comparisons: a millionth of a gram, comfortably above
/// f64 rounding noise at fleet-scale balances (~1e8 g).
const AMOUNT_EPSILON: f64 = 1e-6;

pub struct BankingLedger {
    store: Arc<dyn LedgerStore>,
    resolver: Arc<BalanceResolver>,
    locks: KeyLocks,
    year_min: i32,
    year_max: i32,
}

impl BankingLedger {
    pub fn new(store: Arc<dyn LedgerStore>, resolver: Arc<BalanceResolver>, cfg: &Config) -> Self {
        Self {
            store,
            resolver,
            locks: KeyLocks::new(Duration::from_millis(cfg.lock_wait_ms)),
            year_min: cfg.year_min,
            year_max: cfg.year_max,
        }
    }

    fn check_amount(amount: f64) -> Result<(), ComplianceError> {
        if !(amount.is_finite() && amount > 0.0) {
            return Err(ComplianceError::InvalidAmount);
        }
        Ok(())
    }

    fn check_year(&self, year: i32) -> Result<(), ComplianceError> {
        if !(self.year_min..=self.year_max).contains(&year) {
            return Err(ComplianceError::InvalidPeriod {
                year,
                min: self.year_min,
                max: self.year_max,
            });
        }
        Ok(())
    }

    /// Earmark part of a ship's surplus for later transfer.
    ///
    /// The bankable capacity is the current adjusted balance minus what is
    /// already banked and unapplied, so the same surplus can never be
    /// earmarked twice.
    pub async fn bank(
        &self,
        ship_id: &str,
        year: i32,
        amount: f64,
    ) -> Result<BankingTransaction, ComplianceError> {
        Self::check_amount(amount)?;
        self.check_year(year)?;

        let key = ShipYearKey::new(ship_id, year);
        let _guard = self.locks.acquire(&key).await?;

        let balance = self.resolver.adjusted_cb(&key.ship_id, year).await?;
        let sums = self.store.kind_sums(&key).await?;
        let bankable = balance.adjusted_cb - sums.available_banked();

        if balance.adjusted_cb <= 0.0 || amount > bankable + AMOUNT_EPSILON {
            return Err(ComplianceError::InsufficientSurplus {
                available: bankable.max(0.0),
                requested: amount,
            });
        }

        let tx = BankingTransaction {
            id: Uuid::new_v4().to_string(),
            ship_id: key.ship_id.clone(),
            year,
            kind: TransactionKind::Bank,
            amount_gco2eq: amount,
            counterparty_ship_id: None,
            transfer_id: None,
            timestamp: Utc::now(),
        };
        self.store.append(&tx).await?;

        info!(ship = %key.ship_id, year, amount, "Banked surplus");
        Ok(tx)
    }

    /// Transfer previously banked surplus from one ship to another.
    ///
    /// Emits an APPLY_OUT/APPLY_IN pair with equal magnitude and a shared
    /// transfer id; the pair commits atomically.
    pub async fn apply(
        &self,
        from_ship_id: &str,
        to_ship_id: &str,
        year: i32,
        amount: f64,
    ) -> Result<(BankingTransaction, BankingTransaction), ComplianceError> {
        Self::check_amount(amount)?;
        self.check_year(year)?;

        let from_key = ShipYearKey::new(from_ship_id, year);
        let to_key = ShipYearKey::new(to_ship_id, year);
        if from_key == to_key {
            return Err(ComplianceError::SelfTransfer);
        }

        // Both ships must be known for the year before anything is locked.
        self.resolver.adjusted_cb(&from_key.ship_id, year).await?;
        self.resolver.adjusted_cb(&to_key.ship_id, year).await?;

        let _guards = self.locks.acquire_pair(&from_key, &to_key).await?;

        let available = self.store.kind_sums(&from_key).await?.available_banked();
        if available + AMOUNT_EPSILON < amount {
            return Err(ComplianceError::InsufficientBankedBalance {
                available: available.max(0.0),
                requested: amount,
            });
        }

        let transfer_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let out_leg = BankingTransaction {
            id: Uuid::new_v4().to_string(),
            ship_id: from_key.ship_id.clone(),
            year,
            kind: TransactionKind::ApplyOut,
            amount_gco2eq: amount,
            counterparty_ship_id: Some(to_key.ship_id.clone()),
            transfer_id: Some(transfer_id.clone()),
            timestamp: now,
        };
        let in_leg = BankingTransaction {
            id: Uuid::new_v4().to_string(),
            ship_id: to_key.ship_id.clone(),
            year,
            kind: TransactionKind::ApplyIn,
            amount_gco2eq: amount,
            counterparty_ship_id: Some(from_key.ship_id.clone()),
            transfer_id: Some(transfer_id),
            timestamp: now,
        };
        self.store.append_pair(&out_leg, &in_leg).await?;

        info!(
            from = %from_key.ship_id,
            to = %to_key.ship_id,
            year,
            amount,
            "Applied banked surplus"
        );
        Ok((out_leg, in_leg))
    }

    /// Chronological audit trail for a key.
    pub async fn records_for(
        &self,
        ship_id: &str,
        year: i32,
    ) -> Result<Vec<BankingTransaction>, ComplianceError> {
        let key = ShipYearKey::new(ship_id, year);
        self.store.records_for(&key).await
    }

    /// Banked surplus not yet applied elsewhere.
    pub async fn available_banked(
        &self,
        ship_id: &str,
        year: i32,
    ) -> Result<f64, ComplianceError> {
        let key = ShipYearKey::new(ship_id, year);
        Ok(self.store.kind_sums(&key).await?.available_banked())
    }
}
