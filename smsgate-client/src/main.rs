use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::Path,
    sync::{Arc, Mutex},
};

use clap::Parser;
use smsgate_client::{
    ActivationClient, ActivationScreen, ClientArgs, ClientConfig, Command, FileRepository,
    screens::{render_prompt, render_screen},
};
use smsgate_core::{FixedPermission, FlowController, Navigation, Screen};
use tracing::{error, info, warn};
use tracing_subscriber::fmt::MakeWriter;

type Flow = FlowController<FileRepository, FixedPermission>;

#[derive(Clone)]
struct FileMakeWriter {
    file: Arc<Mutex<File>>,
}

struct FileWriterGuard {
    file: Arc<Mutex<File>>,
}

impl Write for FileWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut locked = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        locked.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut locked = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        locked.flush()
    }
}

impl<'a> MakeWriter<'a> for FileMakeWriter {
    type Writer = FileWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        FileWriterGuard {
            file: Arc::clone(&self.file),
        }
    }
}

#[tokio::main]
async fn main() {
    let args = ClientArgs::parse();
    let config = match ClientConfig::from_args(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    init_logging(&config.log_dir());
    info!(state_dir = %config.state_dir.display(), command = ?args.command, "smsgate starting");

    if let Err(err) = run(args.command, config).await {
        error!("{}", err);
        eprintln!("{err}");
        std::process::exit(1);
    }
}

async fn run(command: Command, config: ClientConfig) -> Result<(), String> {
    let repository = FileRepository::in_dir(&config.state_dir);
    let permission = FixedPermission::new(config.sms_permission);
    let mut flow = FlowController::new(repository, permission);

    match command {
        Command::Activate { code } => activate(&mut flow, &config, &code).await,
        Command::Permission { later } => {
            if enter(&mut flow, Screen::PermissionExplanation)? {
                return show(&flow);
            }
            let result = if later {
                flow.defer_permission()
            } else {
                // The OS dialog's answer is whatever --sms-permission reports.
                match flow.request_permission().map_err(|err| err.to_string())? {
                    Navigation::Prompt(_) => flow.permission_result(config.sms_permission),
                    other => Ok(other),
                }
            };
            let navigation = result.map_err(|err| err.to_string())?;
            if let Navigation::Prompt(prompt) = navigation {
                println!("{}\n", render_prompt(prompt));
            }
            show(&flow)
        }
        Command::Status => {
            enter(&mut flow, Screen::Status)?;
            show(&flow)
        }
        Command::Toggle => {
            if enter(&mut flow, Screen::Status)? {
                return show(&flow);
            }
            flow.toggle_pause().map_err(|err| err.to_string())?;
            show(&flow)
        }
        Command::Disconnect { yes } => {
            if enter(&mut flow, Screen::Status)? {
                return show(&flow);
            }
            if !yes {
                return Err("Disconnect this device? Re-run with --yes to confirm.".to_string());
            }
            flow.disconnect().map_err(|err| err.to_string())?;
            println!("Device disconnected.\n");
            show(&flow)
        }
    }
}

async fn activate(flow: &mut Flow, config: &ClientConfig, code: &str) -> Result<(), String> {
    if enter(flow, Screen::Activation)? {
        println!("This device is already activated.\n");
        return show(flow);
    }

    let client = ActivationClient::new(config.webhook_url.clone(), config.device_info.clone())
        .map_err(|err| format!("failed to build http client: {err}"))?;
    let mut screen = ActivationScreen::new(client);
    screen
        .activate(flow, code)
        .await
        .map_err(|err| err.to_string())?;

    if let Some(form_error) = screen.error() {
        warn!("activation failed: {}", form_error);
        return Err(form_error.to_string());
    }
    show(flow)
}

/// Enters `screen`; returns `true` when the flow redirected elsewhere.
fn enter(flow: &mut Flow, screen: Screen) -> Result<bool, String> {
    let navigation = flow.enter(screen).map_err(|err| err.to_string())?;
    Ok(navigation != Navigation::Stay)
}

fn show(flow: &Flow) -> Result<(), String> {
    let text = render_screen(flow).map_err(|err| err.to_string())?;
    println!("{text}");
    Ok(())
}

fn init_logging(log_dir: &Path) {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();

    let log_path = log_dir.join("smsgate.log");
    let file = match std::fs::create_dir_all(log_dir)
        .and_then(|()| OpenOptions::new().create(true).append(true).open(&log_path))
    {
        Ok(file) => file,
        Err(err) => {
            eprintln!("failed to open log file {}: {err}", log_path.display());
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(io::stderr)
                .init();
            return;
        }
    };

    let make_writer = FileMakeWriter {
        file: Arc::new(Mutex::new(file)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(make_writer)
        .init();
}
