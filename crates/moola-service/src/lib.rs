#![deny(unsafe_code)]

pub mod config;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use moola_adapters::MemoryRoleDirectory;
use moola_core::{
    BalanceReceipt, ErrorKind, JoinOutcome, LeaderboardPage, LeaderboardScope, LinkRequest,
    Member, MemberId, MoolaEngine, MoolaError, ReconcileReport, RoleDirectory, RoleThresholdSet,
    StandingsSnapshot, Team, TeamSelector, TeamTotals, TransferReceipt,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use config::ServiceConfig;

#[derive(Clone)]
pub struct ServiceState {
    pub engine: Arc<MoolaEngine>,
}

impl ServiceState {
    /// Bootstrap against an in-memory role directory seeded from the catalog.
    pub async fn bootstrap(config: ServiceConfig) -> Result<Self, ServiceError> {
        let directory = MemoryRoleDirectory::with_catalog(&config.engine.roles);
        if let Some(role) = config.engine.roles.operators.first() {
            for operator in &config.bootstrap_operators {
                directory.assign(operator.clone(), role.clone());
            }
        }
        Self::bootstrap_with_directory(config, Arc::new(directory)).await
    }

    pub async fn bootstrap_with_directory(
        config: ServiceConfig,
        directory: Arc<dyn RoleDirectory>,
    ) -> Result<Self, ServiceError> {
        let engine = MoolaEngine::bootstrap(config.engine, directory).await?;
        Ok(Self {
            engine: Arc::new(engine),
        })
    }

    /// One reconciliation pass over the leading team with the default thresholds.
    pub async fn reconcile_leading_team(&self) -> Result<ReconcileReport, MoolaError> {
        self.engine
            .reconcile_roles(TeamSelector::Winning, None)
            .await
    }
}

pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/links", post(request_link))
        .route("/v1/links/wallet", post(request_wallet_update))
        .route("/v1/links/claim", post(claim_link))
        .route("/v1/members/:member_id/balance", get(balance))
        .route("/v1/members/:member_id/team", post(join_team))
        .route("/v1/members/:member_id/welcome", post(welcome_member))
        .route("/v1/transfers", post(transfer))
        .route("/v1/fines", post(fine))
        .route("/v1/credits", post(credit))
        .route("/v1/roles/reconcile", post(reconcile_roles))
        .route("/v1/policy/thresholds", get(current_thresholds))
        .route("/v1/policy/whitelist-minimum", post(update_whitelist_minimum))
        .route("/v1/leaderboard", get(leaderboard))
        .route("/v1/teams/totals", get(team_totals))
        .route("/v1/snapshot", post(snapshot))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("core engine error: {0}")]
    Core(#[from] MoolaError),
    #[error("configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Http { status: StatusCode, message: String },
    #[error(transparent)]
    Core(#[from] MoolaError),
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InsufficientBalance => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::ExternalDependency => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Http { status, message } => {
                (status, Json(serde_json::json!({ "error": message }))).into_response()
            }
            ApiError::Core(err) => (
                status_for(err.kind()),
                Json(serde_json::json!({ "error": err.to_string() })),
            )
                .into_response(),
        }
    }
}

fn positive_amount(amount: i64) -> Result<u64, ApiError> {
    if amount <= 0 {
        return Err(ApiError::bad_request(format!(
            "amount must be a positive integer, got {amount}"
        )));
    }
    Ok(amount as u64)
}

fn parse_team(raw: &str) -> Result<Team, ApiError> {
    raw.parse::<Team>().map_err(ApiError::bad_request)
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    storage_backend: &'static str,
    role_directory: &'static str,
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "moola-service",
        storage_backend: state.engine.storage_label(),
        role_directory: state.engine.directory_id(),
    })
}

#[derive(Debug, Clone, Deserialize)]
struct LinkBody {
    member_id: MemberId,
}

async fn request_link(
    State(state): State<ServiceState>,
    Json(body): Json<LinkBody>,
) -> Result<Json<LinkRequest>, ApiError> {
    Ok(Json(state.engine.request_link(&body.member_id).await?))
}

async fn request_wallet_update(
    State(state): State<ServiceState>,
    Json(body): Json<LinkBody>,
) -> Result<Json<LinkRequest>, ApiError> {
    Ok(Json(state.engine.request_wallet_update(&body.member_id).await?))
}

#[derive(Debug, Clone, Deserialize)]
struct ClaimBody {
    token: String,
    member_id: MemberId,
    address: String,
}

async fn claim_link(
    State(state): State<ServiceState>,
    Json(body): Json<ClaimBody>,
) -> Result<Json<Member>, ApiError> {
    Ok(Json(
        state
            .engine
            .claim_link(&body.token, &body.member_id, &body.address)
            .await?,
    ))
}

#[derive(Debug, Clone, Serialize)]
struct BalanceResponse {
    member: MemberId,
    points: u64,
}

async fn balance(
    State(state): State<ServiceState>,
    Path(member_id): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let member = MemberId::new(member_id);
    let points = state.engine.balance(&member).await?;
    Ok(Json(BalanceResponse { member, points }))
}

#[derive(Debug, Clone, Deserialize)]
struct JoinBody {
    team: String,
}

async fn join_team(
    State(state): State<ServiceState>,
    Path(member_id): Path<String>,
    Json(body): Json<JoinBody>,
) -> Result<Json<JoinOutcome>, ApiError> {
    let team = parse_team(&body.team)?;
    Ok(Json(
        state
            .engine
            .join_team(&MemberId::new(member_id), team)
            .await?,
    ))
}

#[derive(Debug, Clone, Serialize)]
struct WelcomeResponse {
    member: MemberId,
    status: &'static str,
}

async fn welcome_member(
    State(state): State<ServiceState>,
    Path(member_id): Path<String>,
) -> Result<Json<WelcomeResponse>, ApiError> {
    let member = MemberId::new(member_id);
    state.engine.welcome_member(&member).await?;
    Ok(Json(WelcomeResponse {
        member,
        status: "welcomed",
    }))
}

#[derive(Debug, Clone, Deserialize)]
struct TransferBody {
    actor_id: MemberId,
    /// Defaults to the acting operator.
    from: Option<MemberId>,
    to: MemberId,
    amount: i64,
}

async fn transfer(
    State(state): State<ServiceState>,
    Json(body): Json<TransferBody>,
) -> Result<Json<TransferReceipt>, ApiError> {
    let amount = positive_amount(body.amount)?;
    state.engine.authorize_operator(&body.actor_id).await?;
    let from = body.from.unwrap_or_else(|| body.actor_id.clone());
    Ok(Json(state.engine.transfer(&from, &body.to, amount).await?))
}

#[derive(Debug, Clone, Deserialize)]
struct AdjustBody {
    actor_id: MemberId,
    target: MemberId,
    amount: i64,
}

async fn fine(
    State(state): State<ServiceState>,
    Json(body): Json<AdjustBody>,
) -> Result<Json<BalanceReceipt>, ApiError> {
    let amount = positive_amount(body.amount)?;
    state.engine.authorize_operator(&body.actor_id).await?;
    Ok(Json(state.engine.fine(&body.target, amount).await?))
}

async fn credit(
    State(state): State<ServiceState>,
    Json(body): Json<AdjustBody>,
) -> Result<Json<BalanceReceipt>, ApiError> {
    let amount = positive_amount(body.amount)?;
    state.engine.authorize_operator(&body.actor_id).await?;
    Ok(Json(state.engine.credit(&body.target, amount).await?))
}

#[derive(Debug, Clone, Deserialize)]
struct ReconcileBody {
    actor_id: MemberId,
    /// `winning`, `losing`, or a team name.
    team: String,
    thresholds: Option<RoleThresholdSet>,
}

async fn reconcile_roles(
    State(state): State<ServiceState>,
    Json(body): Json<ReconcileBody>,
) -> Result<Json<ReconcileReport>, ApiError> {
    let selector = body
        .team
        .parse::<TeamSelector>()
        .map_err(ApiError::bad_request)?;
    state.engine.authorize_operator(&body.actor_id).await?;
    let report = state.engine.reconcile_roles(selector, body.thresholds).await?;
    info!(
        actor = %body.actor_id,
        team = %report.team,
        updated = report.updated_count,
        "Reconciliation requested by operator"
    );
    Ok(Json(report))
}

async fn current_thresholds(State(state): State<ServiceState>) -> Json<RoleThresholdSet> {
    Json(state.engine.current_thresholds().await)
}

#[derive(Debug, Clone, Deserialize)]
struct WhitelistMinimumBody {
    actor_id: MemberId,
    minimum: i64,
}

#[derive(Debug, Clone, Serialize)]
struct WhitelistMinimumResponse {
    whitelist_minimum: u64,
    reconciliation: Option<ReconcileReport>,
}

async fn update_whitelist_minimum(
    State(state): State<ServiceState>,
    Json(body): Json<WhitelistMinimumBody>,
) -> Result<Json<WhitelistMinimumResponse>, ApiError> {
    let minimum = positive_amount(body.minimum)?;
    state.engine.authorize_operator(&body.actor_id).await?;
    let whitelist_minimum = state.engine.update_whitelist_minimum(minimum).await?;

    // The new minimum applies to the leading team straight away.
    let reconciliation = match state.reconcile_leading_team().await {
        Ok(report) => Some(report),
        Err(err) => {
            warn!(error = %err, "Reconciliation after whitelist minimum change failed");
            None
        }
    };
    Ok(Json(WhitelistMinimumResponse {
        whitelist_minimum,
        reconciliation,
    }))
}

#[derive(Debug, Clone, Deserialize)]
struct LeaderboardQuery {
    scope: Option<String>,
    page: Option<i64>,
    requester: Option<String>,
}

async fn leaderboard(
    State(state): State<ServiceState>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<LeaderboardPage>, ApiError> {
    let scope = match query.scope.as_deref() {
        None => LeaderboardScope::All,
        Some(raw) => raw
            .parse::<LeaderboardScope>()
            .map_err(ApiError::bad_request)?,
    };
    let requester = query.requester.map(MemberId::new);
    Ok(Json(
        state
            .engine
            .leaderboard_page(scope, query.page.unwrap_or(1), requester.as_ref())
            .await?,
    ))
}

#[derive(Debug, Clone, Serialize)]
struct TeamTotalsResponse {
    #[serde(flatten)]
    totals: TeamTotals,
    leading: Team,
}

async fn team_totals(State(state): State<ServiceState>) -> Result<Json<TeamTotalsResponse>, ApiError> {
    let totals = state.engine.team_totals().await?;
    Ok(Json(TeamTotalsResponse {
        leading: totals.leading(),
        totals,
    }))
}

#[derive(Debug, Clone, Deserialize)]
struct OperatorBody {
    actor_id: MemberId,
}

async fn snapshot(
    State(state): State<ServiceState>,
    Json(body): Json<OperatorBody>,
) -> Result<Json<StandingsSnapshot>, ApiError> {
    state.engine.authorize_operator(&body.actor_id).await?;
    Ok(Json(state.engine.snapshot().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use moola_adapters::AlwaysFailRoleDirectory;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn app_with_operator(operator: &str) -> Router {
        let state = ServiceState::bootstrap(ServiceConfig {
            bootstrap_operators: vec![MemberId::new(operator)],
            ..ServiceConfig::default()
        })
        .await
        .unwrap();
        build_router(state)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn link(app: &Router, member: &str, address: &str) {
        let (status, body) = call(
            app,
            "POST",
            "/v1/links",
            Some(serde_json::json!({ "member_id": member })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let token = body["token"].as_str().unwrap().to_string();

        let (status, _) = call(
            app,
            "POST",
            "/v1/links/claim",
            Some(serde_json::json!({ "token": token, "member_id": member, "address": address })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn health_reports_backends() {
        let app = app_with_operator("admin-1").await;
        let (status, body) = call(&app, "GET", "/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["storage_backend"], "memory");
        assert_eq!(body["role_directory"], "memory");
    }

    #[tokio::test]
    async fn link_claim_and_balance_flow() {
        let app = app_with_operator("admin-1").await;

        let (status, _) = call(&app, "GET", "/v1/members/42/balance", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        link(&app, "42", "0x1234567890abcdef").await;
        let (status, body) = call(&app, "GET", "/v1/members/42/balance", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["points"], 0);

        let (status, body) = call(
            &app,
            "POST",
            "/v1/links",
            Some(serde_json::json!({ "member_id": "42" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("0x...cdef"));
    }

    #[tokio::test]
    async fn operator_commands_require_operator_role() {
        let app = app_with_operator("admin-1").await;
        link(&app, "7", "0xseven-wallet").await;

        let (status, _) = call(
            &app,
            "POST",
            "/v1/credits",
            Some(serde_json::json!({ "actor_id": "7", "target": "7", "amount": 50 })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(
            &app,
            "POST",
            "/v1/credits",
            Some(serde_json::json!({ "actor_id": "admin-1", "target": "7", "amount": 50 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["new_balance"], 50);
    }

    #[tokio::test]
    async fn transfer_and_fine_map_error_taxonomy() {
        let app = app_with_operator("admin-1").await;
        link(&app, "a", "0xaaaaaaaa").await;
        link(&app, "b", "0xbbbbbbbb").await;
        call(
            &app,
            "POST",
            "/v1/credits",
            Some(serde_json::json!({ "actor_id": "admin-1", "target": "a", "amount": 100 })),
        )
        .await;

        let (status, body) = call(
            &app,
            "POST",
            "/v1/transfers",
            Some(serde_json::json!({ "actor_id": "admin-1", "from": "a", "to": "b", "amount": 40 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["from_balance"], 60);
        assert_eq!(body["to_balance"], 40);

        let (status, _) = call(
            &app,
            "POST",
            "/v1/transfers",
            Some(serde_json::json!({ "actor_id": "admin-1", "from": "a", "to": "b", "amount": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            "POST",
            "/v1/transfers",
            Some(serde_json::json!({ "actor_id": "admin-1", "from": "a", "to": "nobody", "amount": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            &app,
            "POST",
            "/v1/fines",
            Some(serde_json::json!({ "actor_id": "admin-1", "target": "b", "amount": 41 })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn leaderboard_rejects_unknown_scope_and_pages_members() {
        let app = app_with_operator("admin-1").await;
        link(&app, "a", "0xaaaaaaaa").await;
        call(&app, "POST", "/v1/members/a/team", Some(serde_json::json!({ "team": "beras" }))).await;

        let (status, _) = call(&app, "GET", "/v1/leaderboard?scope=wolves", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &app,
            "GET",
            "/v1/leaderboard?scope=beras&page=1&requester=a",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_pages"], 1);
        assert_eq!(body["requester"]["rank"], 1);
        assert_eq!(body["entries"][0]["glyph"], "🐻");
    }

    #[tokio::test]
    async fn whitelist_minimum_update_reconciles_leading_team() {
        let app = app_with_operator("admin-1").await;
        link(&app, "a", "0xaaaaaaaa").await;
        call(&app, "POST", "/v1/members/a/team", Some(serde_json::json!({ "team": "bullas" }))).await;
        call(
            &app,
            "POST",
            "/v1/credits",
            Some(serde_json::json!({ "actor_id": "admin-1", "target": "a", "amount": 80 })),
        )
        .await;

        let (status, body) = call(
            &app,
            "POST",
            "/v1/policy/whitelist-minimum",
            Some(serde_json::json!({ "actor_id": "admin-1", "minimum": 60 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["whitelist_minimum"], 60);
        assert_eq!(body["reconciliation"]["team"], "bullas");
        assert_eq!(body["reconciliation"]["updated_count"], 1);
        assert_eq!(body["reconciliation"]["grants"][0]["member"], "a");

        let (status, body) = call(
            &app,
            "POST",
            "/v1/policy/whitelist-minimum",
            Some(serde_json::json!({ "actor_id": "admin-1", "minimum": 250 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["whitelist_minimum"], 250);
        assert_eq!(body["reconciliation"]["updated_count"], 0);

        let (_, body) = call(&app, "GET", "/v1/policy/thresholds", None).await;
        assert_eq!(body["wl_threshold"], 250);
    }

    #[tokio::test]
    async fn failing_directory_surfaces_as_unavailable() {
        let state = ServiceState::bootstrap_with_directory(
            ServiceConfig::default(),
            Arc::new(AlwaysFailRoleDirectory::new("platform outage")),
        )
        .await
        .unwrap();
        let app = build_router(state);

        let (status, body) = call(
            &app,
            "POST",
            "/v1/roles/reconcile",
            Some(serde_json::json!({ "actor_id": "admin-1", "team": "winning" })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].as_str().unwrap().contains("platform outage"));
    }
}
