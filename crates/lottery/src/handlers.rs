//! HTTP handlers for the lottery API

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

use crate::{
    auth::{Authenticator, Participant},
    config::LotteryConfig,
    database::Database,
    error::LotteryError,
    metrics,
    rate_limit::{limit_requests, RateLimiter},
    results::{Resolution, ResultResolver},
    rounds::{OpenOutcome, RoundLifecycle, RoundStatus},
    tickets::TicketAdmission,
    validator::{draw_from_json, ticket_from_json},
};

/// Shared state behind every route
pub struct LotteryApi {
    db: Arc<Database>,
    config: LotteryConfig,
    auth: Authenticator,
    rounds: RoundLifecycle,
    tickets: TicketAdmission,
    results: ResultResolver,
}

impl LotteryApi {
    pub fn new(db: Arc<Database>, config: LotteryConfig, auth: Authenticator) -> Self {
        Self {
            rounds: RoundLifecycle::new(db.clone()),
            tickets: TicketAdmission::new(db.clone()),
            results: ResultResolver::new(db.clone()),
            db,
            config,
            auth,
        }
    }

    pub fn rounds(&self) -> &RoundLifecycle {
        &self.rounds
    }
}

/// Response headers set on every answer unless a handler already set them
const SECURITY_HEADERS: &[(&str, &str)] = &[
    (
        "content-security-policy",
        "default-src 'self';base-uri 'self';font-src 'self' https: data:;\
         form-action 'self';frame-ancestors 'self';img-src 'self' data:;\
         object-src 'none';script-src 'self';script-src-attr 'none';\
         style-src 'self' https: 'unsafe-inline';upgrade-insecure-requests",
    ),
    ("cross-origin-opener-policy", "same-origin"),
    ("cross-origin-resource-policy", "same-origin"),
    ("origin-agent-cluster", "?1"),
    ("referrer-policy", "no-referrer"),
    ("strict-transport-security", "max-age=31536000; includeSubDomains"),
    ("x-content-type-options", "nosniff"),
    ("x-dns-prefetch-control", "off"),
    ("x-download-options", "noopen"),
    ("x-frame-options", "SAMEORIGIN"),
    ("x-permitted-cross-domain-policies", "none"),
    ("x-xss-protection", "0"),
];

/// Build the HTTP router.
///
/// API and ticket routes are rate limited per client address; `/health` and
/// `/metrics` are left out so health checks and scrapers do not use up the budget.
pub fn router(api: Arc<LotteryApi>) -> Router {
    let limiter = Arc::new(RateLimiter::new(
        api.config.rate_limit_max_requests,
        Duration::from_secs(api.config.rate_limit_window_secs),
    ));

    let limited = Router::new()
        .route("/api/round/status", get(round_status))
        .route("/api/tickets", post(submit_ticket))
        .route("/api/new-round", post(new_round))
        .route("/api/close", post(close_round))
        .route("/api/store-results", post(store_results))
        .route("/public/ticket/{code}", get(ticket_result))
        .route("/auth/user", get(current_user))
        .layer(middleware::from_fn_with_state(limiter, limit_requests));

    let mut app = Router::new()
        .merge(limited)
        .route("/health", get(health))
        .route("/metrics", get(metrics::metrics_handler));

    for &(name, value) in SECURITY_HEADERS {
        app = app.layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        ));
    }

    app.layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(api)
}

impl IntoResponse for LotteryError {
    fn into_response(self) -> Response {
        let status = match &self {
            LotteryError::Validation(_) => StatusCode::BAD_REQUEST,
            LotteryError::NoActiveRound
            | LotteryError::DuplicateTicket
            | LotteryError::InvalidState(_) => StatusCode::CONFLICT,
            LotteryError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            LotteryError::Forbidden(_) => StatusCode::FORBIDDEN,
            LotteryError::Database(_)
            | LotteryError::Serialization(_)
            | LotteryError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if self.is_internal() {
            error!("Request failed: {}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn malformed_body(rejection: JsonRejection) -> Response {
    debug!("Malformed request body: {}", rejection.body_text());
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "Request body must be a JSON object" })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTicketRequest {
    pub id_number: Option<String>,
    pub numbers: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTicketResponse {
    pub success: bool,
    pub ticket_code: String,
    pub receipt_url: String,
    pub round_id: i32,
}

#[derive(Debug, Deserialize)]
pub struct StoreResultsRequest {
    pub numbers: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<Participant>,
}

async fn round_status(
    State(api): State<Arc<LotteryApi>>,
) -> Result<Json<RoundStatus>, LotteryError> {
    Ok(Json(api.rounds.current_round_status().await?))
}

async fn submit_ticket(
    State(api): State<Arc<LotteryApi>>,
    headers: HeaderMap,
    body: Result<Json<SubmitTicketRequest>, JsonRejection>,
) -> Result<Response, LotteryError> {
    let participant = api.auth.require_participant(&headers)?;
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return Ok(malformed_body(rejection)),
    };

    let candidate = match ticket_from_json(request.id_number.as_deref(), request.numbers.as_ref()) {
        Ok(candidate) => candidate,
        Err(e) => {
            debug!("Ticket from {} rejected: {}", participant.id, e);
            metrics::record_ticket_rejected(e.code());
            return Err(e.into());
        }
    };

    let ticket = api.tickets.admit(candidate, &participant.id).await?;
    let response = SubmitTicketResponse {
        success: true,
        receipt_url: api.config.receipt_url(&ticket.code),
        ticket_code: ticket.code,
        round_id: ticket.round_id,
    };
    Ok(Json(response).into_response())
}

async fn new_round(
    State(api): State<Arc<LotteryApi>>,
    headers: HeaderMap,
) -> Result<StatusCode, LotteryError> {
    let client = api.auth.require_machine(&headers)?;
    match api.rounds.open_round().await? {
        OpenOutcome::Opened(round) => info!("{} opened round {}", client.client_id, round.id),
        OpenOutcome::AlreadyOpen => debug!("{} requested a round while one is open", client.client_id),
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn close_round(
    State(api): State<Arc<LotteryApi>>,
    headers: HeaderMap,
) -> Result<StatusCode, LotteryError> {
    let client = api.auth.require_machine(&headers)?;
    let closed = api.rounds.close_round().await?;
    debug!("{} closed {} round(s)", client.client_id, closed);
    Ok(StatusCode::NO_CONTENT)
}

async fn store_results(
    State(api): State<Arc<LotteryApi>>,
    headers: HeaderMap,
    body: Result<Json<StoreResultsRequest>, JsonRejection>,
) -> Result<Response, LotteryError> {
    let client = api.auth.require_machine(&headers)?;
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return Ok(malformed_body(rejection)),
    };

    let numbers = draw_from_json(request.numbers.as_ref()).inspect_err(|e| {
        warn!("Draw from {} rejected: {}", client.client_id, e);
    })?;
    api.rounds.record_draw(numbers).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// An unknown code is an ordinary answer (`status: notFound`) with 200
async fn ticket_result(
    State(api): State<Arc<LotteryApi>>,
    Path(code): Path<String>,
) -> Result<Json<Resolution>, LotteryError> {
    Ok(Json(api.results.resolve(&code).await?))
}

async fn current_user(
    State(api): State<Arc<LotteryApi>>,
    headers: HeaderMap,
) -> Json<UserResponse> {
    let user = api.auth.participant(&headers);
    Json(UserResponse {
        authenticated: user.is_some(),
        user,
    })
}

async fn health(State(api): State<Arc<LotteryApi>>) -> Response {
    match api.db.health_check().await {
        Ok(()) => Json(json!({ "status": "ok" })).into_response(),
        Err(e) => {
            error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
                .into_response()
        }
    }
}
