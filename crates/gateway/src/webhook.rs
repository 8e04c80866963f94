use {
    axum::{
        body::Bytes,
        extract::State,
        http::{HeaderMap, StatusCode},
    },
    bunnydrop_telegram::{SharedState, spawn_update},
    secrecy::{ExposeSecret, Secret},
    teloxide::types::Update,
    tracing::{debug, warn},
};

use crate::server::AppState;

pub const WEBHOOK_PATH: &str = "/telegram/webhook";

/// Header Telegram uses to echo the `secret_token` given to `setWebhook`.
pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Webhook receiver state.
#[derive(Clone)]
pub struct WebhookState {
    pub bot: SharedState,
    pub secret: Option<Secret<String>>,
}

impl WebhookState {
    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(secret) = &self.secret else {
            return true;
        };
        headers
            .get(SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|given| constant_time_eq(given, secret.expose_secret()))
    }
}

/// Constant-time string comparison.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Accept one update and answer immediately; the message is handled in the
/// background so Telegram never waits on a transfer.
pub async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let Some(webhook) = &state.webhook else {
        return StatusCode::NOT_FOUND;
    };
    if !webhook.authorized(&headers) {
        warn!("telegram webhook request with missing or wrong secret token");
        return StatusCode::UNAUTHORIZED;
    }

    match serde_json::from_slice::<Update>(&body) {
        Ok(update) => {
            debug!(update_id = update.id.0, "telegram webhook update");
            spawn_update(&webhook.bot, update);
            StatusCode::OK
        },
        Err(e) => {
            warn!(error = %e, "unparseable telegram webhook update");
            StatusCode::BAD_REQUEST
        },
    }
}
