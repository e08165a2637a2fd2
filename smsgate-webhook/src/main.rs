use clap::Parser;
use smsgate_webhook::{AppState, serve};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "smsgate-webhook")]
struct WebhookArgs {
    #[arg(long, default_value = "127.0.0.1:8787")]
    bind_address: String,

    /// Accepted activation code; repeat for several. Without any, every code
    /// is acknowledged.
    #[arg(long = "code")]
    codes: Vec<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(err) = run(WebhookArgs::parse()).await {
        error!("{}", err);
        std::process::exit(1);
    }
}

async fn run(args: WebhookArgs) -> Result<(), String> {
    let listener = tokio::net::TcpListener::bind(&args.bind_address)
        .await
        .map_err(|err| format!("failed to bind {}: {err}", args.bind_address))?;

    let state = if args.codes.is_empty() {
        info!("webhook starting on {} (accepting any code)", args.bind_address);
        AppState::new()
    } else {
        info!(
            "webhook starting on {} ({} known codes)",
            args.bind_address,
            args.codes.len()
        );
        AppState::with_codes(args.codes)
    };

    serve(listener, state)
        .await
        .map_err(|err| format!("webhook server failed: {err}"))
}
