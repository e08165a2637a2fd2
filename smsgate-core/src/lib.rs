use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod flow;
pub mod repository;

pub use flow::{
    FixedPermission, FlowController, FlowState, InactiveReason, Navigation, PermissionProbe,
    PermissionPrompt, Screen, StatusView,
};
pub use repository::{
    ActivationRecord, ActivationRepository, ActivationState, MemoryRepository, StoreError,
};

pub const DEFAULT_USER_NAME: &str = "משתמש";
pub const DEVICE_ID_PREFIX: &str = "DEV-";
pub const UNKNOWN_DEVICE_ID: &str = "---";
pub const MAX_ACTIVATION_CODE_LEN: usize = 128;

pub const REPLY_ERROR_INVALID_CODE: &str = "invalid_code";
pub const REPLY_ERROR_CODE_IN_USE: &str = "code_in_use";

pub type DeviceId = String;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceInfo {
    pub model: String,
    pub manufacturer: String,
    pub android_version: String,
}

/// Payload posted to the activation webhook.
///
/// Only [`ActivationRequest::new`] builds one from user input, so `activation_code`
/// is always trimmed and non-empty on the sending side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivationRequest {
    pub activation_code: String,
    pub device_info: DeviceInfo,
}

impl ActivationRequest {
    pub fn new(code: &str, device_info: DeviceInfo) -> Result<Self, CoreError> {
        let activation_code = validate_activation_code(code)?;
        Ok(Self {
            activation_code: activation_code.to_owned(),
            device_info,
        })
    }
}

/// Optional JSON body a webhook may answer with. Webhook-only endpoints send
/// nothing useful, so every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivationReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActivationReply {
    pub fn parse(body: &[u8]) -> Option<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        serde_json::from_slice(body).ok()
    }

    pub fn error_outcome(&self) -> Option<ActivationOutcome> {
        match self.error.as_deref()? {
            REPLY_ERROR_INVALID_CODE => Some(ActivationOutcome::InvalidCode),
            REPLY_ERROR_CODE_IN_USE => Some(ActivationOutcome::CodeInUse),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationOutcome {
    Success {
        device_id: DeviceId,
        user_name: String,
    },
    InvalidCode,
    CodeInUse,
    ServerError,
    NetworkError,
}

impl ActivationOutcome {
    /// Success outcome for a webhook that acknowledged delivery, filling in
    /// whatever the reply did not provide.
    pub fn accepted(reply: Option<ActivationReply>, unix_ms: u64) -> Self {
        let reply = reply.unwrap_or_default();
        let device_id = reply
            .device_id
            .map(|id| id.trim().to_owned())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| generate_device_id(unix_ms));
        let user_name = reply
            .user_name
            .map(|name| name.trim().to_owned())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_USER_NAME.to_owned());
        ActivationOutcome::Success {
            device_id,
            user_name,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ActivationOutcome::Success { .. })
    }

    pub fn form_error(&self) -> Option<FormError> {
        match self {
            ActivationOutcome::Success { .. } => None,
            ActivationOutcome::InvalidCode => Some(FormError::InvalidCode),
            ActivationOutcome::CodeInUse => Some(FormError::CodeInUse),
            ActivationOutcome::ServerError | ActivationOutcome::NetworkError => {
                Some(FormError::ServerConnection)
            }
        }
    }
}

/// Inline error shown under the activation code field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormError {
    EmptyCode,
    InvalidCode,
    CodeInUse,
    ServerConnection,
}

impl FormError {
    pub fn message(self) -> &'static str {
        match self {
            // The empty-code case reuses the invalid-code wording.
            FormError::EmptyCode | FormError::InvalidCode => "Invalid activation code",
            FormError::CodeInUse => "This activation code is already in use",
            FormError::ServerConnection => "Could not reach the server, please try again",
        }
    }
}

impl std::fmt::Display for FormError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("activation code must not be empty")]
    EmptyActivationCode,
    #[error("activation code is too long ({len} > {max} chars)")]
    ActivationCodeTooLong { len: usize, max: usize },
}

impl CoreError {
    pub fn form_error(&self) -> FormError {
        match self {
            CoreError::EmptyActivationCode => FormError::EmptyCode,
            CoreError::ActivationCodeTooLong { .. } => FormError::InvalidCode,
        }
    }
}

pub fn validate_activation_code(code: &str) -> Result<&str, CoreError> {
    let code = code.trim();
    if code.is_empty() {
        return Err(CoreError::EmptyActivationCode);
    }
    let len = code.chars().count();
    if len > MAX_ACTIVATION_CODE_LEN {
        return Err(CoreError::ActivationCodeTooLong {
            len,
            max: MAX_ACTIVATION_CODE_LEN,
        });
    }
    Ok(code)
}

/// `DEV-` followed by the millisecond timestamp in upper-case base 36.
///
/// Not globally unique; two devices activated in the same millisecond collide.
pub fn generate_device_id(unix_ms: u64) -> DeviceId {
    format!("{DEVICE_ID_PREFIX}{}", to_base36_upper(unix_ms))
}

fn to_base36_upper(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    if value == 0 {
        return "0".to_owned();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
