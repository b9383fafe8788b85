//! End-to-end exercises of the compliance core: raw balances, the banking
//! round-trip, pool settlement, and the conservation properties that hold
//! across all of them.
//!
//! Fixtures are throwaway sqlite databases seeded with the demo fleet.

use std::sync::Arc;

use fueleu_backend::{
    banking::{
        store::{LedgerStore, SqliteLedgerStore},
        BankingLedger,
    },
    compliance::{BalanceResolver, IntensityAggregator},
    error::ComplianceError,
    fleet::RouteStore,
    models::Config,
    pooling::{store::PoolStore, PoolEngine, PoolMemberInput},
};

struct Backend {
    _dir: tempfile::TempDir,
    routes: Arc<RouteStore>,
    resolver: Arc<BalanceResolver>,
    banking: BankingLedger,
    pools: PoolEngine,
}

async fn backend() -> Backend {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("fueleu_test.db");
    let path = path.to_str().unwrap();
    let cfg = Config::default();

    let routes = Arc::new(RouteStore::new(path).expect("route store"));
    routes.seed_demo_fleet().await.expect("seed");

    let ledger_store: Arc<dyn LedgerStore> =
        Arc::new(SqliteLedgerStore::new(path).expect("ledger store"));
    let aggregator = Arc::new(IntensityAggregator::new(routes.clone(), &cfg));
    let resolver = Arc::new(BalanceResolver::new(
        aggregator,
        routes.clone(),
        ledger_store.clone(),
    ));
    let banking = BankingLedger::new(ledger_store.clone(), resolver.clone(), &cfg);
    let pools = PoolEngine::new(
        PoolStore::new(path).expect("pool store"),
        ledger_store,
        &cfg,
    );

    Backend {
        _dir: dir,
        routes,
        resolver,
        banking,
        pools,
    }
}

fn member(ship_id: &str, cb_before: f64) -> PoolMemberInput {
    PoolMemberInput {
        ship_id: ship_id.to_string(),
        cb_before,
    }
}

#[tokio::test]
async fn net_banked_sums_to_zero_across_the_fleet_after_transfers() {
    let be = backend().await;

    be.banking.bank("R002", 2024, 2_000_000.0).await.unwrap();
    be.banking
        .apply("R002", "R001", 2024, 1_200_000.0)
        .await
        .unwrap();
    be.banking
        .apply("R002", "R003", 2024, 500_000.0)
        .await
        .unwrap();

    let mut total_net = 0.0;
    for ship in ["R001", "R002", "R003"] {
        total_net += be.resolver.adjusted_cb(ship, 2024).await.unwrap().net_banked;
    }
    assert!(
        total_net.abs() < 1e-6,
        "fleet-wide net transfers must cancel, got {total_net}"
    );
}

#[tokio::test]
async fn banked_balance_never_goes_negative() {
    let be = backend().await;

    be.banking.bank("R002", 2024, 1_000_000.0).await.unwrap();
    be.banking
        .apply("R002", "R001", 2024, 999_999.5)
        .await
        .unwrap();

    let available = be.banking.available_banked("R002", 2024).await.unwrap();
    assert!(available >= 0.0);

    // Whatever remains is less than the next request; it must be refused
    // rather than driven negative.
    let err = be
        .banking
        .apply("R002", "R003", 2024, 1.0)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ComplianceError::InsufficientBankedBalance { .. }
    ));
    assert!(be.banking.available_banked("R002", 2024).await.unwrap() >= 0.0);
}

#[tokio::test]
async fn banking_round_trip_exhausts_the_earmark() {
    let be = backend().await;

    be.banking.bank("R002", 2024, 1_000_000.0).await.unwrap();
    be.banking
        .apply("R002", "R001", 2024, 1_000_000.0)
        .await
        .unwrap();

    assert_eq!(be.banking.available_banked("R002", 2024).await.unwrap(), 0.0);
    let err = be
        .banking
        .apply("R002", "R001", 2024, 1_000_000.0)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ComplianceError::InsufficientBankedBalance { .. }
    ));
}

#[tokio::test]
async fn audit_trail_shows_both_legs_in_order() {
    let be = backend().await;

    be.banking.bank("R002", 2024, 500_000.0).await.unwrap();
    be.banking
        .apply("R002", "R001", 2024, 300_000.0)
        .await
        .unwrap();

    let source = be.banking.records_for("r002", 2024).await.unwrap();
    assert_eq!(source.len(), 2);
    assert_eq!(source[0].kind.as_str(), "BANK");
    assert_eq!(source[1].kind.as_str(), "APPLY_OUT");

    let destination = be.banking.records_for("R001", 2024).await.unwrap();
    assert_eq!(destination.len(), 1);
    assert_eq!(destination[0].kind.as_str(), "APPLY_IN");
    assert_eq!(destination[0].transfer_id, source[1].transfer_id);
}

#[tokio::test]
async fn pool_settlement_conserves_and_persists() {
    let be = backend().await;

    let pool = be
        .pools
        .create_pool(
            2024,
            &[member("R001", 5_000_000.0), member("R002", -3_000_000.0)],
        )
        .await
        .unwrap();

    assert!((pool.total_cb - 2_000_000.0).abs() < 1e-6);
    assert_eq!(pool.members[0].cb_after, 2_000_000.0);
    assert_eq!(pool.members[1].cb_after, 0.0);

    let before: f64 = pool.members.iter().map(|m| m.cb_before).sum();
    let after: f64 = pool.members.iter().map(|m| m.cb_after).sum();
    assert!((before - after).abs() < 1e-9);

    // The settlement is readable afterwards, unchanged.
    let listed = be.pools.pools_for(Some(2024)).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, pool.id);
    assert_eq!(listed[0].members.len(), 2);
    assert_eq!(listed[0].members[0].cb_after, 2_000_000.0);
}

#[tokio::test]
async fn net_deficit_pool_is_refused() {
    let be = backend().await;

    let err = be
        .pools
        .create_pool(
            2024,
            &[member("R001", 1_000_000.0), member("R002", -3_000_000.0)],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ComplianceError::InvalidPool));
    assert!(be.pools.pools_for(Some(2024)).await.unwrap().is_empty());
}

#[tokio::test]
async fn pools_are_superseded_not_mutated() {
    let be = backend().await;

    let first = be
        .pools
        .create_pool(2024, &[member("R001", 1_000_000.0)])
        .await
        .unwrap();
    let second = be
        .pools
        .create_pool(
            2024,
            &[member("R001", 2_000_000.0), member("R003", -500_000.0)],
        )
        .await
        .unwrap();

    let listed = be.pools.pools_for(Some(2024)).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_ne!(first.id, second.id);

    let oldest = listed.iter().find(|p| p.id == first.id).unwrap();
    assert_eq!(oldest.members[0].cb_before, 1_000_000.0);
}

#[tokio::test]
async fn mixed_case_ship_ids_resolve_to_one_ledger_key() {
    let be = backend().await;

    be.banking.bank(" r002 ", 2024, 400_000.0).await.unwrap();
    be.banking.bank("R002", 2024, 100_000.0).await.unwrap();

    assert_eq!(
        be.banking.records_for("R002", 2024).await.unwrap().len(),
        2
    );
    assert!(
        (be.banking.available_banked("r002", 2024).await.unwrap() - 500_000.0).abs() < 1e-6
    );
}

#[tokio::test]
async fn baseline_switch_is_visible_to_the_comparison_view() {
    let be = backend().await;

    be.routes.set_baseline("R001").await.unwrap();
    let comparisons = be.routes.comparison().await.unwrap();

    let flagged: Vec<_> = be
        .routes
        .all_routes()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.year == 2024 && r.is_baseline)
        .collect();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].route_id, "R001");

    let r001 = comparisons.iter().find(|c| c.route_id == "R001").unwrap();
    assert!(r001.compliant);
    let r002 = comparisons.iter().find(|c| c.route_id == "R002").unwrap();
    assert!(r002.compliant, "R002 at 88.0 beats the 91.0 baseline");
    let r003 = comparisons.iter().find(|c| c.route_id == "R003").unwrap();
    assert!(!r003.compliant, "R003 at 93.5 exceeds the 91.0 baseline");
}

#[tokio::test]
async fn adjusted_balances_reflect_pool_inputs_only_through_the_ledger() {
    let be = backend().await;

    let before = be.resolver.adjusted_cb("R002", 2024).await.unwrap();
    be.pools
        .create_pool(
            2024,
            &[member("R002", before.adjusted_cb), member("R001", 0.0)],
        )
        .await
        .unwrap();

    // Pool settlement is its own immutable record; it does not rewrite the
    // banking ledger or the adjusted balance derivation.
    let after = be.resolver.adjusted_cb("R002", 2024).await.unwrap();
    assert_eq!(before.adjusted_cb, after.adjusted_cb);
}
