//! FuelEU compliance backend server.
//!
//! Request/response service behind the fleet dashboard: computes per-ship
//! compliance balances, maintains the banking ledger, and settles pools.

use anyhow::{Context, Result};
use dotenv::dotenv;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fueleu_backend::{
    api::{create_router, AppState},
    banking::{
        store::{LedgerStore, SqliteLedgerStore},
        BankingLedger,
    },
    compliance::{BalanceResolver, IntensityAggregator},
    fleet::RouteStore,
    models::Config,
    pooling::{store::PoolStore, PoolEngine},
};

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let cfg = Config::from_env();
    let db_path = resolve_data_path(&cfg.database_path);
    info!("Compliance backend starting, database at {}", db_path);

    let routes = Arc::new(RouteStore::new(&db_path).context("open route store")?);
    let seeded = routes.seed_demo_fleet().await?;
    if seeded > 0 {
        info!("Route table was empty, seeded {} demo routes", seeded);
    }

    let ledger_store: Arc<dyn LedgerStore> =
        Arc::new(SqliteLedgerStore::new(&db_path).context("open ledger store")?);
    let pool_store = PoolStore::new(&db_path).context("open pool store")?;

    let aggregator = Arc::new(IntensityAggregator::new(routes.clone(), &cfg));
    let resolver = Arc::new(BalanceResolver::new(
        aggregator.clone(),
        routes.clone(),
        ledger_store.clone(),
    ));
    let banking = Arc::new(BankingLedger::new(
        ledger_store.clone(),
        resolver.clone(),
        &cfg,
    ));
    let pools = Arc::new(PoolEngine::new(pool_store, ledger_store, &cfg));

    let state = AppState {
        routes,
        aggregator,
        resolver,
        banking,
        pools,
    };

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", cfg.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!("API server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fueleu_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Anchor relative data paths to the crate directory so running from the
/// repo root does not create a stray database in a different cwd.
fn resolve_data_path(raw: &str) -> String {
    let p = PathBuf::from(raw.trim());
    if p.is_absolute() {
        return p.to_string_lossy().to_string();
    }
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join(p)
        .to_string_lossy()
        .to_string()
}

fn load_env() {
    // Standard dotenv search (cwd + parents), then the crate directory for
    // runs started with --manifest-path from elsewhere.
    let _ = dotenv();
    let candidate = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if candidate.exists() {
        let _ = dotenv::from_path(&candidate);
    }
}
