//! Domain error taxonomy.
//!
//! Every mutation failure leaves the stores exactly as they were; the API
//! layer maps `ErrorClass` to an HTTP status.

use thiserror::Error;

/// Coarse classification the HTTP adapter keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed or out-of-range input, rejected before touching state.
    Validation,
    /// Business-rule rejection; state unchanged.
    Conflict,
    /// Caller should retry with fresh data.
    Concurrency,
    NotFound,
    Internal,
}

#[derive(Debug, Error)]
pub enum ComplianceError {
    #[error("amount must be a positive quantity of gCO₂eq")]
    InvalidAmount,

    #[error("year {year} is outside the reporting window {min}..={max}")]
    InvalidPeriod { year: i32, min: i32, max: i32 },

    #[error("source and destination ship must differ")]
    SelfTransfer,

    #[error("pool member ship id must not be empty")]
    InvalidMember,

    #[error("duplicate pool member {0}")]
    DuplicateMember(String),

    #[error("pool total compliance balance must be non-negative")]
    InvalidPool,

    #[error("no route data for {ship_id} in {year}")]
    NoRouteData { ship_id: String, year: i32 },

    #[error("unknown ship {ship_id} for {year}")]
    UnknownShip { ship_id: String, year: i32 },

    #[error("unknown route {0}")]
    UnknownRoute(String),

    #[error("insufficient surplus: {available:.3} gCO₂eq available, {requested:.3} requested")]
    InsufficientSurplus { available: f64, requested: f64 },

    #[error(
        "insufficient banked balance: {available:.3} gCO₂eq available, {requested:.3} requested"
    )]
    InsufficientBankedBalance { available: f64, requested: f64 },

    #[error("ledger is being modified concurrently, retry")]
    ConcurrentModification,

    #[error("pool inputs are stale, re-read adjusted balances and retry")]
    StalePoolInput,

    #[error("allocation invariant violated: {0}")]
    AllocationInvariant(String),

    #[error("storage failure")]
    Storage(#[from] anyhow::Error),
}

impl ComplianceError {
    pub fn class(&self) -> ErrorClass {
        use ComplianceError::*;
        match self {
            InvalidAmount | InvalidPeriod { .. } | SelfTransfer | InvalidMember => {
                ErrorClass::Validation
            }
            InsufficientSurplus { .. }
            | InsufficientBankedBalance { .. }
            | InvalidPool
            | DuplicateMember(_) => ErrorClass::Conflict,
            ConcurrentModification | StalePoolInput => ErrorClass::Concurrency,
            NoRouteData { .. } | UnknownShip { .. } | UnknownRoute(_) => ErrorClass::NotFound,
            AllocationInvariant(_) | Storage(_) => ErrorClass::Internal,
        }
    }

    /// Stable machine-readable label surfaced next to the human message.
    pub fn code(&self) -> &'static str {
        use ComplianceError::*;
        match self {
            InvalidAmount => "InvalidAmount",
            InvalidPeriod { .. } => "InvalidPeriod",
            SelfTransfer => "SelfTransfer",
            InvalidMember => "InvalidMember",
            DuplicateMember(_) => "DuplicateMember",
            InvalidPool => "InvalidPool",
            NoRouteData { .. } => "NoRouteData",
            UnknownShip { .. } => "UnknownShip",
            UnknownRoute(_) => "UnknownRoute",
            InsufficientSurplus { .. } => "InsufficientSurplus",
            InsufficientBankedBalance { .. } => "InsufficientBankedBalance",
            ConcurrentModification => "ConcurrentModification",
            StalePoolInput => "StalePoolInput",
            AllocationInvariant(_) => "AllocationInvariant",
            Storage(_) => "Storage",
        }
    }
}

impl From<rusqlite::Error> for ComplianceError {
    fn from(err: rusqlite::Error) -> Self {
        ComplianceError::Storage(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_match_the_taxonomy() {
        assert_eq!(
            ComplianceError::InvalidAmount.class(),
            ErrorClass::Validation
        );
        assert_eq!(ComplianceError::InvalidPool.class(), ErrorClass::Conflict);
        assert_eq!(
            ComplianceError::StalePoolInput.class(),
            ErrorClass::Concurrency
        );
        assert_eq!(
            ComplianceError::UnknownRoute("R999".to_string()).class(),
            ErrorClass::NotFound
        );
        assert_eq!(
            ComplianceError::AllocationInvariant("test".to_string()).class(),
            ErrorClass::Internal
        );
    }
}
