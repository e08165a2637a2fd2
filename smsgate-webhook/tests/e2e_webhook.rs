use reqwest::StatusCode;
use serde_json::{Value, json};
use smsgate_webhook::{
    ACTIVATE_PATH, AppState, MAX_DEVICE_FIELD_CHARS, MAX_RECEIVED, build_router,
};
use tokio::{net::TcpListener, sync::oneshot};

fn payload(code: &str) -> Value {
    json!({
        "activation_code": code,
        "device_info": {
            "model": "Pixel 7",
            "manufacturer": "Google",
            "android_version": "14"
        }
    })
}

#[tokio::test]
async fn webhook_only_mode_acknowledges_any_code() {
    let state = AppState::new();
    let (base, shutdown_tx) = start_webhook(state.clone()).await;
    let http = reqwest::Client::new();

    let response = http
        .post(format!("{base}{ACTIVATE_PATH}"))
        .json(&payload("ABC123"))
        .send()
        .await
        .expect("post activation");
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body, json!({"ok": true}));

    let received = state.received().await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].activation_code, "ABC123");
    assert_eq!(received[0].device_info.manufacturer, "Google");

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn known_code_is_claimed_once() {
    let (base, shutdown_tx) = start_webhook(AppState::with_codes(["ABC123"])).await;
    let http = reqwest::Client::new();
    let url = format!("{base}{ACTIVATE_PATH}");

    let first = http
        .post(&url)
        .json(&payload("ABC123"))
        .send()
        .await
        .expect("first activation");
    assert_eq!(first.status(), StatusCode::OK);
    let body: Value = first.json().await.expect("json body");
    let device_id = body["device_id"].as_str().expect("device id in reply");
    assert!(device_id.starts_with("DEV-"), "unexpected id {device_id}");

    let second = http
        .post(&url)
        .json(&payload("ABC123"))
        .send()
        .await
        .expect("second activation");
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let body: Value = second.json().await.expect("json body");
    assert_eq!(body, json!({"error": "code_in_use"}));

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn unknown_and_blank_codes_are_rejected() {
    let state = AppState::with_codes(["ABC123"]);
    let (base, shutdown_tx) = start_webhook(state.clone()).await;
    let http = reqwest::Client::new();
    let url = format!("{base}{ACTIVATE_PATH}");

    for code in ["NOPE", "   "] {
        let response = http
            .post(&url)
            .json(&payload(code))
            .send()
            .await
            .expect("post activation");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = response.json().await.expect("json body");
        assert_eq!(body, json!({"error": "invalid_code"}));
    }

    // Blank codes are dropped before being recorded.
    assert_eq!(state.received().await.len(), 1);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn received_log_keeps_only_latest_payloads() {
    let state = AppState::new();
    let (base, shutdown_tx) = start_webhook(state.clone()).await;
    let http = reqwest::Client::new();
    let url = format!("{base}{ACTIVATE_PATH}");

    let total = MAX_RECEIVED + 5;
    for n in 0..total {
        let response = http
            .post(&url)
            .json(&payload(&format!("CODE{n}")))
            .send()
            .await
            .expect("post activation");
        assert_eq!(response.status(), StatusCode::OK);
    }

    let received = state.received().await;
    assert_eq!(received.len(), MAX_RECEIVED);
    assert_eq!(received[0].activation_code, "CODE5");
    assert_eq!(
        received[MAX_RECEIVED - 1].activation_code,
        format!("CODE{}", total - 1)
    );

    let listed: Vec<Value> = http
        .get(format!("{base}/api/activations"))
        .send()
        .await
        .expect("list activations")
        .json()
        .await
        .expect("json body");
    assert_eq!(listed.len(), MAX_RECEIVED);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn oversized_device_info_is_rejected() {
    let state = AppState::new();
    let (base, shutdown_tx) = start_webhook(state.clone()).await;

    let mut body = payload("ABC123");
    body["device_info"]["model"] = json!("M".repeat(MAX_DEVICE_FIELD_CHARS + 1));

    let response = reqwest::Client::new()
        .post(format!("{base}{ACTIVATE_PATH}"))
        .json(&body)
        .send()
        .await
        .expect("post activation");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let reply: Value = response.json().await.expect("json body");
    assert_eq!(reply, json!({"error": "invalid_device_info"}));
    assert!(state.received().await.is_empty());

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn healthz_reports_ok() {
    let (base, shutdown_tx) = start_webhook(AppState::new()).await;

    let body: Value = reqwest::get(format!("{base}/healthz"))
        .await
        .expect("get healthz")
        .json()
        .await
        .expect("json body");
    assert_eq!(body, json!({"ok": true}));

    let _ = shutdown_tx.send(());
}

async fn start_webhook(state: AppState) -> (String, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral webhook socket");
    let address = listener.local_addr().expect("webhook local addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let server = axum::serve(listener, build_router(state)).with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });
    tokio::spawn(async move {
        let _ = server.await;
    });

    (format!("http://{}", address), shutdown_tx)
}
