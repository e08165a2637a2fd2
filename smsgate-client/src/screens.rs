use smsgate_core::{
    ActivationOutcome, ActivationRepository, FlowController, FormError, Navigation,
    PermissionProbe, PermissionPrompt, Screen, StatusView, StoreError,
};
use tracing::{debug, info, warn};

use crate::activation_api::{ActivateError, ActivationClient, ActivationTask};

/// Activation form: code input, submit control and the inline error.
///
/// The screen owns at most one pending request. `teardown` cancels it, and a
/// result that arrives after teardown is never applied.
#[derive(Debug)]
pub struct ActivationScreen {
    client: ActivationClient,
    pending: Option<ActivationTask>,
    error: Option<FormError>,
}

impl ActivationScreen {
    pub fn new(client: ActivationClient) -> Self {
        Self {
            client,
            pending: None,
            error: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    pub fn submit_enabled(&self) -> bool {
        !self.is_loading()
    }

    pub fn error(&self) -> Option<FormError> {
        self.error
    }

    /// Starts an activation attempt. Returns `false` when nothing was sent:
    /// the code failed local validation (see [`ActivationScreen::error`]) or a
    /// request is already outstanding.
    pub fn submit(&mut self, code: &str) -> bool {
        self.error = None;
        if !self.submit_enabled() {
            debug!("submit ignored while a request is pending");
            return false;
        }

        match self.client.spawn(code) {
            Ok(task) => {
                self.pending = Some(task);
                true
            }
            Err(ActivateError::InvalidRequest(err)) => {
                self.error = Some(err.form_error());
                false
            }
            Err(ActivateError::InFlight) => {
                warn!("another activation request is already running");
                false
            }
        }
    }

    /// Waits for the pending request and applies its outcome. Only a success
    /// writes to the repository.
    pub async fn finish<R, P>(
        &mut self,
        flow: &mut FlowController<R, P>,
    ) -> Result<Navigation, StoreError>
    where
        R: ActivationRepository,
        P: PermissionProbe,
    {
        let Some(task) = self.pending.take() else {
            return Ok(Navigation::Stay);
        };
        let Some(outcome) = task.outcome().await else {
            debug!("activation request was cancelled");
            return Ok(Navigation::Stay);
        };
        self.apply(outcome, flow)
    }

    pub async fn activate<R, P>(
        &mut self,
        flow: &mut FlowController<R, P>,
        code: &str,
    ) -> Result<Navigation, StoreError>
    where
        R: ActivationRepository,
        P: PermissionProbe,
    {
        if !self.submit(code) {
            return Ok(Navigation::Stay);
        }
        self.finish(flow).await
    }

    pub fn teardown(&mut self) {
        if let Some(mut task) = self.pending.take() {
            info!("cancelling pending activation request");
            task.cancel();
        }
    }

    fn apply<R, P>(
        &mut self,
        outcome: ActivationOutcome,
        flow: &mut FlowController<R, P>,
    ) -> Result<Navigation, StoreError>
    where
        R: ActivationRepository,
        P: PermissionProbe,
    {
        match outcome {
            ActivationOutcome::Success {
                device_id,
                user_name,
            } => flow.activation_succeeded(&device_id, &user_name),
            failure => {
                info!(outcome = ?failure, "activation rejected");
                self.error = failure.form_error();
                Ok(Navigation::Stay)
            }
        }
    }
}

impl Drop for ActivationScreen {
    fn drop(&mut self) {
        self.teardown();
    }
}

pub fn render_screen<R, P>(flow: &FlowController<R, P>) -> Result<String, StoreError>
where
    R: ActivationRepository,
    P: PermissionProbe,
{
    match flow.screen() {
        Screen::Activation => Ok(render_activation()),
        Screen::PermissionExplanation => Ok(render_permission_explanation()),
        Screen::Status => Ok(flow
            .status_view()?
            .map(|view| render_status(&view))
            .unwrap_or_else(render_activation)),
    }
}

pub fn render_activation() -> String {
    "Enter the activation code you received:\n  smsgate activate <CODE>".to_owned()
}

pub fn render_permission_explanation() -> String {
    [
        "This device needs permission to receive SMS messages so they can be forwarded.",
        "Grant the permission in the system dialog, or choose to do it later:",
        "  smsgate --sms-permission granted permission",
        "  smsgate permission --later",
    ]
    .join("\n")
}

pub fn render_prompt(prompt: PermissionPrompt) -> String {
    match prompt {
        PermissionPrompt::RequestPermission => {
            "Waiting for the SMS permission dialog to be answered.".to_owned()
        }
        PermissionPrompt::OpenSettings => {
            "SMS permission was denied. Open the app settings to grant it manually.".to_owned()
        }
    }
}

pub fn render_status(view: &StatusView) -> String {
    format!(
        "Hello, {}\nStatus: {}\nDevice ID: {}\nLast connection: {}\n[{}]",
        view.user_name, view.status_message, view.device_id, view.last_connection, view.toggle_label
    )
}
