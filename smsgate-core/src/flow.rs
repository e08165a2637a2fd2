use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use crate::UNKNOWN_DEVICE_ID;
use crate::repository::{ActivationRepository, ActivationState, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Activation,
    PermissionExplanation,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InactiveReason {
    NoPermission,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Unactivated,
    AwaitingPermission,
    Active,
    PausedOrNoPermission(InactiveReason),
}

impl FlowState {
    pub fn status_message(self) -> &'static str {
        match self {
            FlowState::Unactivated => "Not activated",
            FlowState::AwaitingPermission => "Waiting for SMS permission",
            FlowState::Active => "Active",
            FlowState::PausedOrNoPermission(InactiveReason::NoPermission) => "No permission",
            FlowState::PausedOrNoPermission(InactiveReason::Paused) => "Paused",
        }
    }
}

/// Something the host has to do on the controller's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionPrompt {
    /// Show the OS runtime permission dialog.
    RequestPermission,
    /// The user denied the dialog; offer to open the app's settings page.
    OpenSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    Stay,
    To(Screen),
    Prompt(PermissionPrompt),
}

/// OS-reported SMS-receive permission.
pub trait PermissionProbe {
    fn has_sms_permission(&self) -> bool;
}

impl<P: PermissionProbe + ?Sized> PermissionProbe for &P {
    fn has_sms_permission(&self) -> bool {
        (**self).has_sms_permission()
    }
}

#[derive(Debug, Default)]
pub struct FixedPermission {
    granted: AtomicBool,
}

impl FixedPermission {
    pub fn new(granted: bool) -> Self {
        Self {
            granted: AtomicBool::new(granted),
        }
    }

    pub fn set(&self, granted: bool) {
        self.granted.store(granted, Ordering::SeqCst);
    }
}

impl PermissionProbe for FixedPermission {
    fn has_sms_permission(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusView {
    pub user_name: String,
    pub device_id: String,
    pub state: FlowState,
    pub status_message: &'static str,
    pub toggle_label: &'static str,
    pub last_connection: String,
}

/// Decides which screen is shown from the persisted record and the OS
/// permission state. Holds no state of its own beyond the current screen.
pub struct FlowController<R, P> {
    repository: R,
    permission: P,
    screen: Screen,
}

impl<R: ActivationRepository, P: PermissionProbe> FlowController<R, P> {
    pub fn new(repository: R, permission: P) -> Self {
        Self {
            repository,
            permission,
            screen: Screen::Activation,
        }
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn permission(&self) -> &P {
        &self.permission
    }

    pub fn state(&self) -> Result<FlowState, StoreError> {
        if !self.repository.is_activated()? {
            return Ok(FlowState::Unactivated);
        }
        if !self.permission.has_sms_permission() {
            if self.screen == Screen::PermissionExplanation {
                return Ok(FlowState::AwaitingPermission);
            }
            return Ok(FlowState::PausedOrNoPermission(InactiveReason::NoPermission));
        }
        if self.repository.is_service_paused()? {
            return Ok(FlowState::PausedOrNoPermission(InactiveReason::Paused));
        }
        Ok(FlowState::Active)
    }

    pub fn enter(&mut self, screen: Screen) -> Result<Navigation, StoreError> {
        self.screen = screen;
        self.settle(screen)
    }

    pub fn resume(&mut self) -> Result<Navigation, StoreError> {
        let origin = self.screen;
        self.settle(origin)
    }

    pub fn activation_succeeded(
        &mut self,
        device_id: &str,
        user_name: &str,
    ) -> Result<Navigation, StoreError> {
        self.repository.record_activation(device_id, user_name)?;
        info!(device_id, "device activated");
        self.screen = Screen::PermissionExplanation;
        match self.settle(Screen::Activation)? {
            Navigation::Stay => Ok(Navigation::To(Screen::PermissionExplanation)),
            other => Ok(other),
        }
    }

    pub fn request_permission(&mut self) -> Result<Navigation, StoreError> {
        if !self.repository.is_activated()? {
            return self.go(Screen::Activation);
        }
        if self.permission.has_sms_permission() {
            return self.go(Screen::Status);
        }
        Ok(Navigation::Prompt(PermissionPrompt::RequestPermission))
    }

    pub fn permission_result(&mut self, granted: bool) -> Result<Navigation, StoreError> {
        if !self.repository.is_activated()? {
            return self.go(Screen::Activation);
        }
        if granted {
            info!("sms permission granted");
            return self.go(Screen::Status);
        }
        info!("sms permission denied");
        Ok(Navigation::Prompt(PermissionPrompt::OpenSettings))
    }

    /// The "later" choice on the permission screen.
    pub fn defer_permission(&mut self) -> Result<Navigation, StoreError> {
        if !self.repository.is_activated()? {
            return self.go(Screen::Activation);
        }
        self.go(Screen::Status)
    }

    pub fn toggle_pause(&mut self) -> Result<Navigation, StoreError> {
        if !self.repository.is_activated()? {
            return self.go(Screen::Activation);
        }
        if !self.permission.has_sms_permission() {
            return self.go(Screen::PermissionExplanation);
        }
        let paused = !self.repository.is_service_paused()?;
        self.repository.set_service_paused(paused)?;
        info!(paused, "service pause toggled");
        Ok(Navigation::Stay)
    }

    pub fn disconnect(&mut self) -> Result<Navigation, StoreError> {
        self.repository.reset()?;
        info!("device disconnected");
        self.go(Screen::Activation)
    }

    pub fn status_view(&self) -> Result<Option<StatusView>, StoreError> {
        self.status_view_at(now_unix_ms())
    }

    pub fn status_view_at(&self, now_ms: i64) -> Result<Option<StatusView>, StoreError> {
        let record = self.repository.load()?;
        let ActivationState::Activated {
            device_id,
            user_name,
        } = record.activation()
        else {
            return Ok(None);
        };
        let state = self.state()?;
        let toggle_label = match state {
            FlowState::PausedOrNoPermission(InactiveReason::Paused) => "Resume",
            FlowState::Active => "Pause",
            _ => "Grant permission",
        };
        Ok(Some(StatusView {
            user_name,
            device_id: if device_id.is_empty() {
                UNKNOWN_DEVICE_ID.to_owned()
            } else {
                device_id
            },
            state,
            status_message: state.status_message(),
            toggle_label,
            last_connection: describe_last_connection(record.last_connection, now_ms),
        }))
    }

    fn go(&mut self, screen: Screen) -> Result<Navigation, StoreError> {
        if self.screen == screen {
            return Ok(Navigation::Stay);
        }
        debug!(from = ?self.screen, to = ?screen, "navigating");
        self.screen = screen;
        Ok(Navigation::To(screen))
    }

    /// Applies entry redirects until the current screen is stable and reports
    /// the final screen relative to `origin`.
    fn settle(&mut self, origin: Screen) -> Result<Navigation, StoreError> {
        let activated = self.repository.is_activated()?;
        let granted = self.permission.has_sms_permission();

        let target = match (self.screen, activated) {
            (_, false) => Screen::Activation,
            (Screen::Activation, true) if granted => Screen::Status,
            (Screen::Activation, true) => Screen::PermissionExplanation,
            (Screen::PermissionExplanation, true) if granted => Screen::Status,
            (screen, true) => screen,
        };

        if target != self.screen {
            debug!(from = ?self.screen, to = ?target, "redirecting on entry");
        }
        self.screen = target;
        if target == origin {
            Ok(Navigation::Stay)
        } else {
            Ok(Navigation::To(target))
        }
    }
}

fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

pub fn describe_last_connection(last_connection_ms: i64, now_ms: i64) -> String {
    if last_connection_ms <= 0 {
        return "recently".to_owned();
    }
    let age_secs = now_ms.saturating_sub(last_connection_ms).max(0) / 1000;
    match age_secs {
        0..=59 => "recently".to_owned(),
        60..=3_599 => format!("{} min ago", age_secs / 60),
        3_600..=86_399 => format!("{} h ago", age_secs / 3_600),
        _ => format!("{} days ago", age_secs / 86_400),
    }
}
