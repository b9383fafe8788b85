use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::{
    banking::BankingLedger,
    compliance::{BalanceResolver, IntensityAggregator},
    error::{ComplianceError, ErrorClass},
    fleet::RouteStore,
    models::{AdjustedBalance, BankingTransaction, ComplianceBalanceRecord, Pool, Route,
        RouteComparison},
    pooling::{PoolEngine, PoolMemberInput},
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<RouteStore>,
    pub aggregator: Arc<IntensityAggregator>,
    pub resolver: Arc<BalanceResolver>,
    pub banking: Arc<BankingLedger>,
    pub pools: Arc<PoolEngine>,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/routes", get(get_routes))
        .route("/routes/comparison", get(get_route_comparison))
        .route("/routes/:route_id/baseline", post(post_set_baseline))
        .route("/compliance/cb", get(get_compliance_balance))
        .route("/compliance/adjusted-cb", get(get_adjusted_balance))
        .route("/banking/bank", post(post_bank_surplus))
        .route("/banking/apply", post(post_apply_banked))
        .route("/banking/records", get(get_banking_records))
        .route("/pools", post(post_create_pool).get(get_pools))
        .with_state(state)
}

// ===== Route Handlers =====

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// All routes, for the dashboard's routes tab
async fn get_routes(State(state): State<AppState>) -> Result<Json<Vec<Route>>, ApiError> {
    Ok(Json(state.routes.all_routes().await?))
}

/// Per-route GHG intensity vs the scope baseline
async fn get_route_comparison(
    State(state): State<AppState>,
) -> Result<Json<Vec<RouteComparison>>, ApiError> {
    Ok(Json(state.routes.comparison().await?))
}

/// Move the baseline flag and return the updated route set
async fn post_set_baseline(
    State(state): State<AppState>,
    Path(route_id): Path<String>,
) -> Result<Json<Vec<Route>>, ApiError> {
    Ok(Json(state.routes.set_baseline(&route_id).await?))
}

/// Raw compliance balance for one ship/year
async fn get_compliance_balance(
    State(state): State<AppState>,
    Query(params): Query<ShipYearQuery>,
) -> Result<Json<ComplianceBalanceRecord>, ApiError> {
    let record = state
        .aggregator
        .compute_cb(&params.ship_id, params.year)
        .await?;
    Ok(Json(record))
}

/// Adjusted balance after ledger effects. With `shipId` omitted, returns
/// every ship with route data in the year (pool member pre-fill).
async fn get_adjusted_balance(
    State(state): State<AppState>,
    Query(params): Query<AdjustedQuery>,
) -> Result<Response, ApiError> {
    match params.ship_id {
        Some(ship_id) => {
            let balance = state.resolver.adjusted_cb(&ship_id, params.year).await?;
            Ok(Json(balance).into_response())
        }
        None => {
            let balances: Vec<AdjustedBalance> =
                state.resolver.adjusted_for_year(params.year).await?;
            Ok(Json(balances).into_response())
        }
    }
}

/// Earmark surplus for later transfer
async fn post_bank_surplus(
    State(state): State<AppState>,
    Json(req): Json<BankRequest>,
) -> Result<(StatusCode, Json<BankingTransaction>), ApiError> {
    let tx = state
        .banking
        .bank(&req.ship_id, req.year, req.amount)
        .await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

/// Transfer banked surplus between two ships
async fn post_apply_banked(
    State(state): State<AppState>,
    Json(req): Json<ApplyRequest>,
) -> Result<(StatusCode, Json<ApplyResponse>), ApiError> {
    let (from_entry, to_entry) = state
        .banking
        .apply(&req.from_ship_id, &req.to_ship_id, req.year, req.amount)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ApplyResponse {
            from_entry,
            to_entry,
        }),
    ))
}

/// Chronological audit trail for one ship/year
async fn get_banking_records(
    State(state): State<AppState>,
    Query(params): Query<ShipYearQuery>,
) -> Result<Json<Vec<BankingTransaction>>, ApiError> {
    Ok(Json(
        state
            .banking
            .records_for(&params.ship_id, params.year)
            .await?,
    ))
}

/// Create an immutable pool settlement
async fn post_create_pool(
    State(state): State<AppState>,
    Json(req): Json<CreatePoolRequest>,
) -> Result<(StatusCode, Json<Pool>), ApiError> {
    let pool = state.pools.create_pool(req.year, &req.members).await?;
    Ok((StatusCode::CREATED, Json(pool)))
}

/// Pool history, most recent first
async fn get_pools(
    State(state): State<AppState>,
    Query(params): Query<PoolsQuery>,
) -> Result<Json<Vec<Pool>>, ApiError> {
    Ok(Json(state.pools.pools_for(params.year).await?))
}

// ===== Request/Response Types =====

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShipYearQuery {
    ship_id: String,
    year: i32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdjustedQuery {
    ship_id: Option<String>,
    year: i32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoolsQuery {
    year: Option<i32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BankRequest {
    ship_id: String,
    year: i32,
    amount: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplyRequest {
    from_ship_id: String,
    to_ship_id: String,
    year: i32,
    amount: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePoolRequest {
    year: i32,
    members: Vec<PoolMemberInput>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApplyResponse {
    from_entry: BankingTransaction,
    to_entry: BankingTransaction,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

// ===== Error Handling =====

/// Wrapper that maps the domain taxonomy onto HTTP statuses.
pub struct ApiError(ComplianceError);

impl From<ComplianceError> for ApiError {
    fn from(err: ComplianceError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self.0.class() {
            ErrorClass::Validation | ErrorClass::Conflict => {
                (StatusCode::BAD_REQUEST, self.0.to_string())
            }
            ErrorClass::Concurrency => (StatusCode::CONFLICT, self.0.to_string()),
            ErrorClass::NotFound => (StatusCode::NOT_FOUND, self.0.to_string()),
            ErrorClass::Internal => {
                tracing::error!("Internal error: {:#}", anyhow::anyhow!(self.0));
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_errors_map_to_bad_request() {
        let err: ApiError = ComplianceError::InvalidPool.into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn stale_pool_input_maps_to_conflict_status() {
        let err: ApiError = ComplianceError::StalePoolInput.into();
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn unknown_route_maps_to_not_found() {
        let err: ApiError = ComplianceError::UnknownRoute("R999".to_string()).into();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }
}
