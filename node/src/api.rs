//! # HTTP API
//!
//! The axum router exposing the session protocol and the wallet-linking
//! callback. Handlers translate JSON bodies into gateway requests and map
//! [`GatewayError`] onto status codes; nothing else lives here.
//!
//! ## Endpoints
//!
//! | Method | Path                        | Description                          |
//! |--------|-----------------------------|--------------------------------------|
//! | GET    | `/health`                   | Liveness probe                       |
//! | GET    | `/status`                   | Node status summary                  |
//! | POST   | `/session/start`            | Open a registration or purchase      |
//! | POST   | `/session/continue`         | Apply one user input                 |
//! | POST   | `/session/end`              | Terminate a dialog (idempotent)      |
//! | POST   | `/wallet/callback`          | Complete a wallet-linking token      |
//! | GET    | `/wallet/connection/:id`    | Poll a wallet-linking token          |

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, MatchedPath, Path, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use ussd_gateway::dialog::pattern::{PatternError, PurchaseRequest};
use ussd_gateway::format::DeviceType;
use ussd_gateway::linking::LinkStatus;
use ussd_gateway::ratelimit::OperationClass;
use ussd_gateway::{
    ContinueRequest, FlowRequest, Gateway, GatewayError, GatewayReply, StartRequest,
};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared state for all handlers. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub metrics: SharedMetrics,
    /// Reported by `/status`.
    pub version: String,
}

impl AppState {
    /// Count a failure in metrics and wrap it for the response.
    fn reject(&self, error: GatewayError) -> ApiError {
        if let GatewayError::RateLimited { class, .. } = &error {
            self.metrics
                .rate_limited_total
                .with_label_values(&[class.as_str()])
                .inc();
        }
        ApiError(error)
    }

    fn record_reply(&self, reply: &GatewayReply) {
        if reply.end {
            let outcome = reply.outcome.map(|o| o.as_str()).unwrap_or("unknown");
            self.metrics
                .dialogs_ended_total
                .with_label_values(&[outcome])
                .inc();
        }
        self.refresh_gauges();
    }

    fn refresh_gauges(&self) {
        self.metrics
            .active_sessions
            .set(self.gateway.sessions().len() as i64);
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full [`Router`] with all routes, the per-IP limit, CORS and
/// request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/session/start", post(start_handler))
        .route("/session/continue", post(continue_handler))
        .route("/session/end", post(end_handler))
        .route("/wallet/callback", post(wallet_callback_handler))
        .route("/wallet/connection/:id", get(connection_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            track_request,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// General per-IP rate limit plus latency recording. `/health` is exempt
/// from the limit.
async fn track_request(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());

    if route != "/health" {
        let ip = client_ip(&request);
        if let Err(e) = state.gateway.check_rate(OperationClass::General, &ip) {
            tracing::warn!(%ip, route = %route, "general rate limit exceeded");
            return state.reject(e).into_response();
        }
    }

    let started = Instant::now();
    let response = next.run(request).await;
    state
        .metrics
        .request_latency_seconds
        .with_label_values(&[route.as_str()])
        .observe(started.elapsed().as_secs_f64());
    response
}

/// First `x-forwarded-for` hop, then `x-real-ip`, then the socket peer.
fn client_ip(request: &Request) -> String {
    let headers = request.headers();
    forwarded_ip(headers)
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    header_str("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .or_else(|| header_str("x-real-ip"))
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_owned)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Body of every error response.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    /// Always `true`: an error ends the exchange from the caller's side.
    pub end: bool,
    /// RFC 3339.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// A [`GatewayError`] on its way to the client.
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::SessionNotFound | GatewayError::ConnectionNotFound => {
                StatusCode::NOT_FOUND
            }
            GatewayError::Conflict(_) => StatusCode::CONFLICT,
            GatewayError::Collaborator(_) => StatusCode::BAD_GATEWAY,
            GatewayError::CapacityExceeded => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let GatewayError::Internal(detail) = &self.0 {
            tracing::error!(%detail, "internal error");
        }
        let retry_after = self.0.retry_after_secs();
        let body = ErrorResponse {
            // `Internal` displays without its detail.
            error: self.0.to_string(),
            end: true,
            timestamp: chrono::Utc::now().to_rfc3339(),
            retry_after,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Unwrap a JSON body, turning extractor rejections into validation errors.
fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError(GatewayError::Validation(rejection.body_text())))
}

// ---------------------------------------------------------------------------
// Request & Response Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowKind {
    Registration,
    Purchase,
}

/// Body of `POST /session/start`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartBody {
    pub session_id: String,
    pub phone_number: String,
    #[serde(default)]
    pub device_type: Option<String>,
    /// Defaults to `purchase` when purchase details are present, otherwise
    /// `registration`.
    #[serde(default)]
    pub flow: Option<FlowKind>,
    #[serde(default)]
    pub purchase: Option<PurchaseRequest>,
    /// Dial string such as `*384*1000*1234#`.
    #[serde(default)]
    pub service_code: Option<String>,
}

impl StartBody {
    fn into_request(self) -> Result<StartRequest, GatewayError> {
        let has_purchase = self.purchase.is_some() || self.service_code.is_some();
        let kind = self.flow.unwrap_or(if has_purchase {
            FlowKind::Purchase
        } else {
            FlowKind::Registration
        });

        let flow = match kind {
            FlowKind::Registration => FlowRequest::Registration,
            FlowKind::Purchase => match (self.purchase, self.service_code) {
                (Some(purchase), _) => FlowRequest::Purchase(purchase),
                (None, Some(code)) => FlowRequest::Purchase(
                    code.parse()
                        .map_err(|e: PatternError| GatewayError::Validation(e.to_string()))?,
                ),
                (None, None) => {
                    return Err(GatewayError::Validation(
                        "purchase details or service code required".into(),
                    ))
                }
            },
        };

        Ok(StartRequest {
            session_id: self.session_id,
            phone_number: self.phone_number,
            device: DeviceType::from_hint(self.device_type.as_deref()),
            flow,
        })
    }
}

/// Body of `POST /session/continue`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueBody {
    pub session_id: String,
    pub phone_number: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub nonce: Option<String>,
}

/// Body of `POST /session/end`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndBody {
    pub session_id: String,
}

/// Body of `POST /wallet/callback`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletCallbackBody {
    pub connection_id: String,
    pub wallet_address: String,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletCallbackResponse {
    pub success: bool,
    pub connection_id: String,
    pub wallet_address: String,
    pub status: String,
    pub already_linked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_verified: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionResponse {
    pub connection_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    pub expires_in_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub version: String,
    pub active_sessions: usize,
    pub pending_links: usize,
    pub timestamp: String,
}

fn status_label(status: LinkStatus) -> &'static str {
    match status {
        LinkStatus::Pending => "pending",
        LinkStatus::Connected => "connected",
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — 200 while the process is up.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// `GET /status`
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.refresh_gauges();
    Json(StatusResponse {
        version: state.version.clone(),
        active_sessions: state.gateway.sessions().len(),
        pending_links: state.gateway.links().len(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// `POST /session/start`
async fn start_handler(
    State(state): State<AppState>,
    body: Result<Json<StartBody>, JsonRejection>,
) -> Result<Json<GatewayReply>, ApiError> {
    let request = parse_body(body)?
        .into_request()
        .map_err(|e| state.reject(e))?;
    let reply = state
        .gateway
        .start(request)
        .await
        .map_err(|e| state.reject(e))?;

    if reply.session_id.is_some() {
        state.metrics.sessions_started_total.inc();
    }
    state.record_reply(&reply);
    Ok(Json(reply))
}

/// `POST /session/continue`
async fn continue_handler(
    State(state): State<AppState>,
    body: Result<Json<ContinueBody>, JsonRejection>,
) -> Result<Json<GatewayReply>, ApiError> {
    let body = parse_body(body)?;
    let result = state
        .gateway
        .continue_session(ContinueRequest {
            session_id: body.session_id,
            phone_number: body.phone_number,
            text: body.text,
            nonce: body.nonce,
        })
        .await;

    match result {
        Ok(reply) => {
            state.record_reply(&reply);
            Ok(Json(reply))
        }
        Err(e) => {
            state.refresh_gauges();
            Err(state.reject(e))
        }
    }
}

/// `POST /session/end`
async fn end_handler(
    State(state): State<AppState>,
    body: Result<Json<EndBody>, JsonRejection>,
) -> Result<Json<GatewayReply>, ApiError> {
    let body = parse_body(body)?;
    let reply = state
        .gateway
        .end(&body.session_id)
        .map_err(|e| state.reject(e))?;
    state.refresh_gauges();
    Ok(Json(reply))
}

/// `POST /wallet/callback`
async fn wallet_callback_handler(
    State(state): State<AppState>,
    body: Result<Json<WalletCallbackBody>, JsonRejection>,
) -> Result<Json<WalletCallbackResponse>, ApiError> {
    let body = parse_body(body)?;
    let result = state
        .gateway
        .wallet_callback(
            &body.connection_id,
            &body.wallet_address,
            body.signature.as_deref(),
            body.message.as_deref(),
        )
        .await;

    let label = match &result {
        Ok(link) if link.already_linked => "already_linked",
        Ok(_) => "linked",
        Err(_) => "rejected",
    };
    state
        .metrics
        .wallet_callbacks_total
        .with_label_values(&[label])
        .inc();

    let link = result.map_err(|e| state.reject(e))?;
    Ok(Json(WalletCallbackResponse {
        success: true,
        connection_id: link.connection_id,
        wallet_address: link.wallet_address,
        status: status_label(link.status).to_string(),
        already_linked: link.already_linked,
        signature_verified: link.signature_verified,
    }))
}

/// `GET /wallet/connection/:id`
async fn connection_handler(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
) -> Result<Json<ConnectionResponse>, ApiError> {
    let view = state
        .gateway
        .connection_status(&connection_id)
        .map_err(|e| state.reject(e))?;
    Ok(Json(ConnectionResponse {
        connection_id: view.connection_id,
        status: status_label(view.status).to_string(),
        wallet_address: view.wallet_address,
        expires_in_secs: view.expires_in_secs,
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
