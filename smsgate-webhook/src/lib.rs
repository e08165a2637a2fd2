use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use smsgate_core::{
    ActivationRequest, DeviceId, DeviceInfo, REPLY_ERROR_CODE_IN_USE, REPLY_ERROR_INVALID_CODE,
    generate_device_id, validate_activation_code,
};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{info, warn};

pub const ACTIVATE_PATH: &str = "/api/activate";
/// Only the most recent payloads are kept for inspection.
pub const MAX_RECEIVED: usize = 256;
pub const MAX_DEVICE_FIELD_CHARS: usize = 128;
pub const REPLY_ERROR_INVALID_DEVICE_INFO: &str = "invalid_device_info";

#[derive(Debug, Default)]
struct WebhookState {
    received: VecDeque<ActivationRequest>,
    /// `None` accepts every code. Otherwise maps each known code to the
    /// device that claimed it.
    codes: Option<HashMap<String, Option<DeviceId>>>,
}

#[derive(Debug, Clone)]
pub struct AppState {
    inner: Arc<RwLock<WebhookState>>,
}

impl AppState {
    /// Webhook-only mode: every well-formed payload is acknowledged.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(WebhookState::default())),
        }
    }

    /// Verifying mode: only the listed codes activate, each at most once.
    #[must_use]
    pub fn with_codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let codes = codes
            .into_iter()
            .map(|code| (code.into().trim().to_owned(), None))
            .collect();
        Self {
            inner: Arc::new(RwLock::new(WebhookState {
                received: VecDeque::new(),
                codes: Some(codes),
            })),
        }
    }

    pub async fn received(&self) -> Vec<ActivationRequest> {
        self.inner.read().await.received.iter().cloned().collect()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(ACTIVATE_PATH, post(activate_handler))
        .route("/api/activations", get(list_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), String> {
    info!(
        "webhook listening on {}",
        listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_owned())
    );
    axum::serve(listener, build_router(state))
        .await
        .map_err(|err| err.to_string())
}

async fn healthz_handler() -> impl IntoResponse {
    Json(json!({"ok": true}))
}

async fn list_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.received().await)
}

async fn activate_handler(
    State(state): State<AppState>,
    Json(request): Json<ActivationRequest>,
) -> impl IntoResponse {
    let Ok(code) = validate_activation_code(&request.activation_code).map(str::to_owned) else {
        warn!("rejecting activation with malformed code");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": REPLY_ERROR_INVALID_CODE})),
        );
    };

    if !device_info_fits(&request.device_info) {
        warn!("rejecting activation with oversized device info");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": REPLY_ERROR_INVALID_DEVICE_INFO})),
        );
    }

    let mut inner = state.inner.write().await;
    info!(
        model = %request.device_info.model,
        manufacturer = %request.device_info.manufacturer,
        "activation payload received"
    );
    if inner.received.len() >= MAX_RECEIVED {
        inner.received.pop_front();
    }
    inner.received.push_back(request);

    let Some(codes) = inner.codes.as_mut() else {
        return (StatusCode::OK, Json(json!({"ok": true})));
    };

    match codes.get_mut(&code) {
        None => {
            warn!("unknown activation code");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": REPLY_ERROR_INVALID_CODE})),
            )
        }
        Some(Some(device_id)) => {
            warn!(%device_id, "activation code already claimed");
            (
                StatusCode::CONFLICT,
                Json(json!({"error": REPLY_ERROR_CODE_IN_USE})),
            )
        }
        Some(claim) => {
            let device_id = generate_device_id(now_unix_ms());
            info!(%device_id, "activation code claimed");
            *claim = Some(device_id.clone());
            (
                StatusCode::OK,
                Json(json!({"ok": true, "device_id": device_id})),
            )
        }
    }
}

fn device_info_fits(info: &DeviceInfo) -> bool {
    [&info.model, &info.manufacturer, &info.android_version]
        .iter()
        .all(|field| field.chars().count() <= MAX_DEVICE_FIELD_CHARS)
}

fn now_unix_ms() -> u64 {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    duration.as_millis() as u64
}
