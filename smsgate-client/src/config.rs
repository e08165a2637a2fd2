use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use smsgate_core::DeviceInfo;
use thiserror::Error;
use url::Url;

pub const DEFAULT_WEBHOOK_URL: &str = "http://127.0.0.1:8787/api/activate";
pub const STATE_DIR_ENV: &str = "SMSGATE_STATE_DIR";
const MAX_WEBHOOK_URL_LEN: usize = 2048;
const MAX_DEVICE_FIELD_LEN: usize = 128;

#[derive(Parser, Debug, Clone)]
#[command(name = "smsgate", about = "Activate this device and manage its SMS gateway status")]
pub struct ClientArgs {
    #[arg(long, default_value = DEFAULT_WEBHOOK_URL)]
    pub webhook_url: String,

    /// Directory holding the activation state and logs.
    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// SMS-receive permission as reported by the host OS.
    #[arg(long, value_enum, default_value_t = PermissionArg::Denied)]
    pub sms_permission: PermissionArg,

    #[arg(long)]
    pub model: Option<String>,
    #[arg(long)]
    pub manufacturer: Option<String>,
    #[arg(long)]
    pub os_version: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Submit an activation code.
    Activate { code: String },
    /// Show the permission explanation screen and apply the OS answer.
    Permission {
        /// Skip granting for now and go to the status screen.
        #[arg(long, default_value_t = false)]
        later: bool,
    },
    /// Show the status screen.
    Status,
    /// Pause or resume the service.
    Toggle,
    /// Forget the activation and return to the activation screen.
    Disconnect {
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionArg {
    Granted,
    Denied,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Please fix the following:\n\n- {}", .0.join("\n- "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub webhook_url: Url,
    pub state_dir: PathBuf,
    pub device_info: DeviceInfo,
    pub sms_permission: bool,
}

impl ClientConfig {
    pub fn from_args(args: &ClientArgs) -> Result<Self, ConfigError> {
        let mut errors = Vec::new();

        let webhook_url = match validate_webhook_url(&args.webhook_url) {
            Ok(url) => Some(url),
            Err(ConfigError::Invalid(mut problems)) => {
                errors.append(&mut problems);
                None
            }
        };

        let detected = detect_device_info();
        let device_info = DeviceInfo {
            model: device_field("Model", args.model.as_deref(), detected.model, &mut errors),
            manufacturer: device_field(
                "Manufacturer",
                args.manufacturer.as_deref(),
                detected.manufacturer,
                &mut errors,
            ),
            android_version: device_field(
                "OS version",
                args.os_version.as_deref(),
                detected.android_version,
                &mut errors,
            ),
        };

        match webhook_url {
            Some(webhook_url) if errors.is_empty() => Ok(Self {
                webhook_url,
                state_dir: resolve_state_dir(args.state_dir.as_deref()),
                device_info,
                sms_permission: args.sms_permission == PermissionArg::Granted,
            }),
            _ => Err(ConfigError::Invalid(errors)),
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }
}

fn device_field(
    label: &str,
    value: Option<&str>,
    detected: String,
    errors: &mut Vec<String>,
) -> String {
    let Some(value) = value else {
        return detected;
    };
    let value = value.trim();
    if value.is_empty() {
        errors.push(format!("{label} must not be empty."));
    } else if value.len() > MAX_DEVICE_FIELD_LEN {
        errors.push(format!(
            "{label} is too long ({} > {} chars).",
            value.len(),
            MAX_DEVICE_FIELD_LEN
        ));
    }
    value.to_owned()
}

pub fn validate_webhook_url(raw: &str) -> Result<Url, ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    let webhook_url = raw.trim();
    if webhook_url.is_empty() {
        errors.push("Webhook URL is required.".to_string());
    } else if webhook_url.len() > MAX_WEBHOOK_URL_LEN {
        errors.push(format!(
            "Webhook URL is too long ({} > {} chars).",
            webhook_url.len(),
            MAX_WEBHOOK_URL_LEN
        ));
    } else {
        match Url::parse(webhook_url) {
            Ok(url) => {
                let scheme = url.scheme();
                if scheme == "http" || scheme == "https" {
                    return Ok(url);
                }
                errors.push("Webhook URL must start with http:// or https://.".to_string());
            }
            Err(err) => {
                errors.push(format!("Webhook URL is invalid: {err}"));
            }
        }
    }

    Err(ConfigError::Invalid(errors))
}

pub fn resolve_state_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }
    if let Some(override_dir) = std::env::var_os(STATE_DIR_ENV) {
        return PathBuf::from(override_dir);
    }

    let base = std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local").join("share"))
        })
        .or_else(|| std::env::var_os("LOCALAPPDATA").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("smsgate")
}

pub fn detect_device_info() -> DeviceInfo {
    let model = std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::env::var("COMPUTERNAME").ok())
        .filter(|host| !host.trim().is_empty())
        .unwrap_or_else(|| "unknown-host".to_owned());
    DeviceInfo {
        model,
        manufacturer: std::env::consts::ARCH.to_owned(),
        android_version: std::env::consts::OS.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> ClientArgs {
        let mut argv = vec!["smsgate"];
        argv.extend_from_slice(extra);
        ClientArgs::try_parse_from(argv).expect("parse args")
    }

    #[test]
    fn webhook_url_accepts_http_and_https() {
        assert!(validate_webhook_url("http://127.0.0.1:8787/api/activate").is_ok());
        assert!(validate_webhook_url(" https://hooks.example.com/activate ").is_ok());
    }

    #[test]
    fn webhook_url_rejects_other_schemes() {
        let err = validate_webhook_url("ws://127.0.0.1/ws").unwrap_err();
        assert!(err.to_string().contains("http:// or https://"), "{err}");
    }

    #[test]
    fn webhook_url_rejects_empty_and_garbage() {
        assert!(validate_webhook_url("  ").is_err());
        let err = validate_webhook_url("not a url").unwrap_err();
        assert!(err.to_string().contains("invalid"), "{err}");
    }

    #[test]
    fn config_collects_every_problem() {
        let parsed = args(&["--webhook-url", "ftp://x", "--model", " ", "status"]);
        let ConfigError::Invalid(problems) = ClientConfig::from_args(&parsed).unwrap_err();
        assert_eq!(problems.len(), 2, "{problems:?}");
    }

    #[test]
    fn config_applies_overrides() {
        let parsed = args(&[
            "--state-dir",
            "/tmp/smsgate-test",
            "--sms-permission",
            "granted",
            "--model",
            "Pixel 7",
            "--manufacturer",
            "Google",
            "--os-version",
            "14",
            "activate",
            "ABC123",
        ]);
        let config = ClientConfig::from_args(&parsed).expect("valid config");
        assert!(config.sms_permission);
        assert_eq!(config.state_dir, PathBuf::from("/tmp/smsgate-test"));
        assert_eq!(config.device_info.model, "Pixel 7");
        assert_eq!(config.device_info.android_version, "14");
        assert_eq!(config.webhook_url.as_str(), DEFAULT_WEBHOOK_URL);
        assert_eq!(
            parsed.command,
            Command::Activate {
                code: "ABC123".to_owned()
            }
        );
    }

    #[test]
    fn explicit_state_dir_wins() {
        let dir = resolve_state_dir(Some(Path::new("/var/lib/smsgate")));
        assert_eq!(dir, PathBuf::from("/var/lib/smsgate"));
    }
}
