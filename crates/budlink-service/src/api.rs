//! REST API endpoints.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/api/health` | Liveness check |
//! | GET | `/api/status` | Scheduler snapshot |
//! | GET | `/api/links` | Live links as reported by the bridge |
//! | GET | `/api/campaigns` | Running campaigns |
//! | POST | `/api/campaigns` | Start a campaign |
//! | DELETE | `/api/campaigns?mode=phone\|tws\|all` | Stop campaigns |
//! | DELETE | `/api/campaigns/{address}` | Stop one campaign (`?except=true` stops all others) |
//! | POST | `/api/campaigns/reconnect` | Reconnect every remembered device |
//! | POST | `/api/link-events` | Report a link event |
//! | GET | `/api/reconnect-table?max=` | Read the reconnect table |
//! | PUT | `/api/reconnect-table` | Replace one half of the table |
//! | POST | `/api/reconnect-table/sync` | Replace the phones with a peer's list |
//! | POST | `/api/reconnect-table/refresh-active` | Refresh the active-audio flags |
//! | POST | `/api/reconnect-table/clear` | Disconnect and forget a device class |
//! | DELETE | `/api/reconnect-table/{address}` | Forget one phone |
//! | GET | `/api/tws/pair-first?role=` | Whether a first TWS reconnect is running |
//! | POST | `/api/tws/role-confirmed` | The peer confirmed its role |
//! | POST | `/api/power-off` | Stop everything before power off |
//!
//! # Error Handling
//!
//! All endpoints return structured JSON errors via [`AppError`]. Rejected
//! campaign starts map to 409 (or 404 when the phone is not remembered),
//! malformed input to 400, and a stopped scheduler to 503.
//!
//! # Example
//!
//! ```no_run
//! use budlink_service::api;
//! # use std::sync::Arc;
//! # fn example(state: Arc<budlink_service::AppState>) {
//! let app: axum::Router = api::router().with_state(state);
//! # }
//! ```

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use budlink_core::{
    CampaignKind, CampaignRequest, CampaignStatus, ConnectorStatus, LinkInfo, RejectReason,
    StopMode, TwsMode,
};
use budlink_types::{BdAddr, DeviceClass, PersistedEntry, ProfileSet, Role, TableHalf};

use crate::config::PolicySettings;
use crate::state::{AppState, LinkReport};

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(get_status))
        .route("/api/links", get(list_links))
        .route(
            "/api/campaigns",
            get(list_campaigns)
                .post(start_campaign)
                .delete(stop_campaigns),
        )
        .route("/api/campaigns/reconnect", post(reconnect_paired))
        .route("/api/campaigns/{address}", delete(stop_device))
        .route("/api/link-events", post(report_link_event))
        .route(
            "/api/reconnect-table",
            get(get_reconnect_table).put(put_reconnect_table),
        )
        .route("/api/reconnect-table/sync", post(sync_reconnect_table))
        .route("/api/reconnect-table/refresh-active", post(refresh_active))
        .route("/api/reconnect-table/clear", post(clear_reconnect_table))
        .route("/api/reconnect-table/{address}", delete(forget_device))
        .route("/api/tws/pair-first", get(tws_pair_first))
        .route("/api/tws/role-confirmed", post(tws_role_confirmed))
        .route("/api/power-off", post(power_off))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

async fn get_status(State(state): State<Arc<AppState>>) -> Result<Json<ConnectorStatus>, AppError> {
    Ok(Json(state.handle.status().await?))
}

async fn list_links(State(state): State<Arc<AppState>>) -> Json<Vec<LinkInfo>> {
    Json(state.registry.links())
}

async fn list_campaigns(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CampaignStatus>>, AppError> {
    let status = state.handle.status().await?;
    Ok(Json(status.campaigns))
}

/// Body of `POST /api/campaigns`.
#[derive(Debug, Deserialize)]
pub struct StartCampaignRequest {
    pub address: BdAddr,
    /// `none` starts a phone campaign.
    #[serde(default)]
    pub tws_mode: TwsMode,
    /// Profiles to bring up. Omitted means the reconnect table's record.
    pub profiles: Option<ProfileSet>,
    pub hfp_first: Option<bool>,
    /// Overrides the configured default policy.
    pub policy: Option<PolicySettings>,
}

/// Response of an accepted campaign start.
#[derive(Debug, Serialize)]
pub struct CampaignStartedResponse {
    pub address: BdAddr,
    pub kind: CampaignKind,
}

async fn start_campaign(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StartCampaignRequest>,
) -> Result<(StatusCode, Json<CampaignStartedResponse>), AppError> {
    let policy = match &body.policy {
        Some(policy) => policy.to_policy(),
        None => state.default_policy().await,
    };

    let request = CampaignRequest {
        address: body.address,
        tws_mode: body.tws_mode,
        wanted: body.profiles,
        hfp_first: body.hfp_first,
        policy,
    };

    let kind = request.kind();
    state.handle.start_campaign(request).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CampaignStartedResponse {
            address: body.address,
            kind,
        }),
    ))
}

/// Which campaigns `DELETE /api/campaigns` stops.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopScope {
    Phone,
    Tws,
    #[default]
    All,
}

#[derive(Debug, Deserialize)]
pub struct StopQuery {
    #[serde(default)]
    pub mode: StopScope,
}

async fn stop_campaigns(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StopQuery>,
) -> Result<StatusCode, AppError> {
    let mode = match query.mode {
        StopScope::Phone => StopMode::Phone,
        StopScope::Tws => StopMode::Tws,
        StopScope::All => StopMode::All,
    };
    state.handle.stop(mode).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct StopDeviceQuery {
    /// Stop everything except this device.
    #[serde(default)]
    pub except: bool,
}

async fn stop_device(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
    Query(query): Query<StopDeviceQuery>,
) -> Result<StatusCode, AppError> {
    let address = parse_address(&address)?;
    let mode = if query.except {
        StopMode::AllExcept(address)
    } else {
        StopMode::Device(address)
    };
    state.handle.stop(mode).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct ReconnectResponse {
    pub started: usize,
}

async fn reconnect_paired(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReconnectResponse>, AppError> {
    let policy = state.default_policy().await;
    let started = state.handle.reconnect_paired(policy).await?;
    Ok(Json(ReconnectResponse { started }))
}

async fn report_link_event(
    State(state): State<Arc<AppState>>,
    Json(report): Json<LinkReport>,
) -> Result<StatusCode, AppError> {
    state.report_link(report).await?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
pub struct TableQuery {
    pub max: Option<usize>,
}

async fn get_reconnect_table(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TableQuery>,
) -> Result<Json<Vec<Option<PersistedEntry>>>, AppError> {
    let max = match query.max {
        Some(max) => max,
        None => state.config.read().await.connect.capacity,
    };
    Ok(Json(state.handle.get_persisted_table(max).await?))
}

/// Body of `PUT /api/reconnect-table`.
#[derive(Debug, Deserialize)]
pub struct PutTableRequest {
    pub entries: Vec<PersistedEntry>,
    #[serde(default = "default_half")]
    pub half: TableHalf,
}

fn default_half() -> TableHalf {
    TableHalf::Both
}

async fn put_reconnect_table(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PutTableRequest>,
) -> Result<StatusCode, AppError> {
    state
        .handle
        .set_persisted_table(body.entries, body.half)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn sync_reconnect_table(
    State(state): State<Arc<AppState>>,
    Json(entries): Json<Vec<PersistedEntry>>,
) -> Result<StatusCode, AppError> {
    state.handle.sync_remote_paired_list(entries).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn refresh_active(State(state): State<Arc<AppState>>) -> Result<StatusCode, AppError> {
    state.handle.update_active().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Body of `POST /api/reconnect-table/clear`.
#[derive(Debug, Deserialize)]
pub struct ClearTableRequest {
    pub class: DeviceClass,
}

async fn clear_reconnect_table(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ClearTableRequest>,
) -> Result<StatusCode, AppError> {
    state.handle.clear_list(body.class).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn forget_device(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> Result<StatusCode, AppError> {
    let address = parse_address(&address)?;
    state.handle.clear_device(address).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct PairFirstQuery {
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct PairFirstResponse {
    pub pair_first: bool,
}

async fn tws_pair_first(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PairFirstQuery>,
) -> Result<Json<PairFirstResponse>, AppError> {
    let pair_first = state.handle.is_tws_pair_first(query.role).await?;
    Ok(Json(PairFirstResponse { pair_first }))
}

async fn tws_role_confirmed(State(state): State<Arc<AppState>>) -> Result<StatusCode, AppError> {
    state.handle.tws_role_confirmed().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn power_off(State(state): State<Arc<AppState>>) -> Result<StatusCode, AppError> {
    state.handle.power_off().await?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_address(raw: &str) -> Result<BdAddr, AppError> {
    raw.parse()
        .map_err(|e| AppError::BadRequest(format!("Invalid address '{raw}': {e}")))
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Unavailable(String),
    Internal(String),
}

impl From<budlink_core::Error> for AppError {
    fn from(e: budlink_core::Error) -> Self {
        use budlink_core::Error;

        match e {
            Error::CampaignRejected(RejectReason::NotInReconnectTable) => {
                AppError::NotFound(e.to_string())
            }
            Error::CampaignRejected(_) => AppError::Conflict(e.to_string()),
            Error::InvalidRequest(_) | Error::InvalidConfig(_) | Error::Parse(_) => {
                AppError::BadRequest(e.to_string())
            }
            Error::ServiceStopped => AppError::Unavailable(e.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
