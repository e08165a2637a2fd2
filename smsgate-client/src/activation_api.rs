use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use smsgate_core::{ActivationOutcome, ActivationReply, ActivationRequest, CoreError, DeviceInfo};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use url::Url;

/// Replies above this size are treated as carrying no body.
pub const MAX_REPLY_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ActivateError {
    #[error(transparent)]
    InvalidRequest(#[from] CoreError),
    #[error("an activation request is already in flight")]
    InFlight,
}

/// Posts activation codes to the webhook.
///
/// Clones share one in-flight flag, so at most one request is outstanding per
/// client family. A call made while another is running fails with
/// [`ActivateError::InFlight`] before touching the network.
#[derive(Debug, Clone)]
pub struct ActivationClient {
    http: reqwest::Client,
    endpoint: Url,
    device_info: DeviceInfo,
    in_flight: Arc<AtomicBool>,
}

#[derive(Debug)]
struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl ActivationClient {
    pub fn new(endpoint: Url, device_info: DeviceInfo) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("smsgate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_http_client(http, endpoint, device_info))
    }

    pub fn with_http_client(http: reqwest::Client, endpoint: Url, device_info: DeviceInfo) -> Self {
        Self {
            http,
            endpoint,
            device_info,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Sends one activation attempt and waits for its outcome.
    pub async fn activate(&self, code: &str) -> Result<ActivationOutcome, ActivateError> {
        let request = ActivationRequest::new(code, self.device_info.clone())?;
        let _guard = self.begin()?;
        Ok(self.send(&request).await)
    }

    /// Like [`ActivationClient::activate`] but runs on the tokio runtime and
    /// hands back a cancellable task. Must be called from within a runtime.
    ///
    /// The in-flight slot belongs to the returned task, not to the worker, so
    /// cancelling or dropping the task frees it immediately.
    pub fn spawn(&self, code: &str) -> Result<ActivationTask, ActivateError> {
        let request = ActivationRequest::new(code, self.device_info.clone())?;
        let guard = self.begin()?;
        let client = self.clone();
        let handle = tokio::spawn(async move { client.send(&request).await });
        Ok(ActivationTask {
            handle,
            guard: Some(guard),
        })
    }

    fn begin(&self) -> Result<InFlightGuard, ActivateError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| ActivateError::InFlight)?;
        Ok(InFlightGuard {
            flag: Arc::clone(&self.in_flight),
        })
    }

    async fn send(&self, request: &ActivationRequest) -> ActivationOutcome {
        info!(endpoint = %self.endpoint, "sending activation request");

        let response = match self
            .http
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let outcome = classify_transport_error(&err);
                warn!(?outcome, "activation request failed: {}", err);
                return outcome;
            }
        };

        let status = response.status();
        let reply = match read_reply_body(response).await {
            Ok(Some(body)) => ActivationReply::parse(&body),
            Ok(None) => {
                warn!(%status, max = MAX_REPLY_BYTES, "activation reply too large, ignoring body");
                None
            }
            Err(err) => {
                warn!(%status, "failed to read activation response body: {}", err);
                None
            }
        };

        let outcome = classify_response(status.as_u16(), reply, now_unix_ms());
        info!(%status, ?outcome, "activation response received");
        outcome
    }
}

/// Reads at most [`MAX_REPLY_BYTES`] of the body. `None` means the reply was
/// larger and was abandoned part way.
async fn read_reply_body(
    mut response: reqwest::Response,
) -> Result<Option<Vec<u8>>, reqwest::Error> {
    let max = MAX_REPLY_BYTES as u64;
    if response.content_length().is_some_and(|len| len > max) {
        return Ok(None);
    }
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if (body.len() + chunk.len()) as u64 > max {
            return Ok(None);
        }
        body.extend_from_slice(&chunk);
    }
    Ok(Some(body))
}

/// Maps an HTTP response to an outcome.
///
/// An `error` field in the reply wins over the status code. Otherwise a 2xx
/// is an acknowledged activation, 409 means the code was already claimed,
/// 400/410/422 reject the code, 408/429/5xx are worth re-submitting, and
/// anything else is a server error.
pub fn classify_response(
    status: u16,
    reply: Option<ActivationReply>,
    unix_ms: u64,
) -> ActivationOutcome {
    if let Some(outcome) = reply.as_ref().and_then(ActivationReply::error_outcome) {
        return outcome;
    }
    match status {
        200..=299 => ActivationOutcome::accepted(reply, unix_ms),
        409 => ActivationOutcome::CodeInUse,
        400 | 410 | 422 => ActivationOutcome::InvalidCode,
        408 | 429 | 500..=599 => ActivationOutcome::NetworkError,
        _ => ActivationOutcome::ServerError,
    }
}

fn classify_transport_error(err: &reqwest::Error) -> ActivationOutcome {
    if err.is_connect() || err.is_timeout() || err.is_request() {
        ActivationOutcome::NetworkError
    } else {
        ActivationOutcome::ServerError
    }
}

fn now_unix_ms() -> u64 {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    duration.as_millis() as u64
}

/// A running activation attempt. Dropping it aborts the request and frees the
/// client's in-flight slot.
#[derive(Debug)]
pub struct ActivationTask {
    handle: JoinHandle<ActivationOutcome>,
    guard: Option<InFlightGuard>,
}

impl ActivationTask {
    /// Aborts the worker and releases the in-flight slot straight away; the
    /// aborted worker may still be winding down on the runtime.
    pub fn cancel(&mut self) {
        self.handle.abort();
        self.guard.take();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the outcome. `None` means the task was cancelled; a worker
    /// that died any other way reports [`ActivationOutcome::ServerError`].
    pub async fn outcome(mut self) -> Option<ActivationOutcome> {
        let result = (&mut self.handle).await;
        self.guard.take();
        match result {
            Ok(outcome) => Some(outcome),
            Err(err) if err.is_cancelled() => None,
            Err(err) => {
                error!("activation worker failed: {}", err);
                Some(ActivationOutcome::ServerError)
            }
        }
    }
}

impl Drop for ActivationTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
