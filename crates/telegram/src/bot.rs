use std::time::Duration;

use {
    reqwest::Url,
    secrecy::{ExposeSecret, Secret},
    teloxide::{
        ApiError, RequestError,
        payloads::SetWebhookSetters,
        prelude::*,
        types::AllowedUpdate,
        utils::command::BotCommands,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    handlers::{self, Command},
    state::SharedState,
};

/// Long-poll timeout passed to `getUpdates`, in seconds.
const POLL_TIMEOUT_SECS: u32 = 30;

/// Build a bot and verify the token with `getMe`.
///
/// Returns the bot and its username.
pub async fn connect(token: &Secret<String>) -> Result<(Bot, Option<String>)> {
    connect_at(token, None).await
}

async fn connect_at(token: &Secret<String>, api_url: Option<Url>) -> Result<(Bot, Option<String>)> {
    // Client timeout must outlast the long-polling timeout so the HTTP client
    // doesn't abort the request before Telegram responds.
    let client = teloxide::net::default_reqwest_settings()
        .timeout(Duration::from_secs(u64::from(POLL_TIMEOUT_SECS) + 15))
        .build()
        .map_err(|e| Error::Client {
            message: e.to_string(),
        })?;
    let mut bot = Bot::with_client(token.expose_secret(), client);
    if let Some(api_url) = api_url {
        bot = bot.set_api_url(api_url);
    }

    let me = bot.get_me().await?;
    let username = me.username.clone();
    info!(username = ?username, "telegram bot connected");
    Ok((bot, username))
}

/// Register `/start` and `/help` for autocomplete in Telegram clients.
pub async fn register_commands(bot: &Bot) {
    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("failed to register bot commands: {e}");
    }
}

/// Point Telegram at `url`, optionally with a secret echoed back in
/// `X-Telegram-Bot-Api-Secret-Token`.
pub async fn setup_webhook(bot: &Bot, url: &str, secret: Option<&Secret<String>>) -> Result<()> {
    let parsed = Url::parse(url).map_err(|e| Error::InvalidWebhookUrl {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    let mut request = bot
        .set_webhook(parsed)
        .allowed_updates(vec![AllowedUpdate::Message]);
    if let Some(secret) = secret {
        request = request.secret_token(secret.expose_secret().clone());
    }
    request.await?;

    info!(url, "telegram webhook registered");
    Ok(())
}

/// Undo [`setup_webhook`]. Polling needs this too: Telegram refuses
/// `getUpdates` while a webhook is set.
pub async fn remove_webhook(bot: &Bot) -> Result<()> {
    bot.delete_webhook().send().await?;
    debug!("telegram webhook cleared");
    Ok(())
}

/// Start the manual `getUpdates` loop.
///
/// Each message is handled on its own task; the loop runs until the
/// returned token is cancelled or another instance takes over the token.
pub async fn start_polling(state: SharedState) -> Result<CancellationToken> {
    remove_webhook(&state.bot).await?;

    let cancel = CancellationToken::new();
    let loop_cancel = cancel.clone();
    tokio::spawn(async move {
        info!("starting telegram polling loop");
        let mut offset: i32 = 0;

        loop {
            let request = state
                .bot
                .get_updates()
                .offset(offset)
                .timeout(POLL_TIMEOUT_SECS)
                .allowed_updates(vec![AllowedUpdate::Message]);

            let result = tokio::select! {
                _ = loop_cancel.cancelled() => {
                    info!("telegram polling stopped");
                    break;
                },
                result = request.send() => result,
            };

            match result {
                Ok(updates) => {
                    if !updates.is_empty() {
                        debug!(count = updates.len(), "got telegram updates");
                    }
                    for update in updates {
                        offset = update.id.as_offset();
                        handlers::spawn_update(&state, update);
                    }
                },
                Err(RequestError::Api(ApiError::TerminatedByOtherGetUpdates)) => {
                    warn!(
                        "telegram polling disabled: another instance is already running with this token"
                    );
                    loop_cancel.cancel();
                    break;
                },
                Err(e) => {
                    warn!(error = %e, "telegram getUpdates failed");
                    tokio::select! {
                        _ = loop_cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(5)) => {},
                    }
                },
            }
        }
    });

    Ok(cancel)
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[tokio::test]
    async fn connect_reports_username() {
        let mut server = mockito::Server::new_async().await;
        let get_me = server
            .mock("POST", "/bottest-token/GetMe")
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "ok": true,
                    "result": {
                        "id": 42,
                        "is_bot": true,
                        "first_name": "Bunnydrop",
                        "username": "bunnydrop_bot",
                        "can_join_groups": true,
                        "can_read_all_group_messages": false,
                        "supports_inline_queries": false,
                        "can_connect_to_business": false,
                        "has_main_web_app": false
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let api_url = Url::parse(&format!("{}/", server.url())).unwrap();
        let (_bot, username) = connect_at(&Secret::new("test-token".into()), Some(api_url))
            .await
            .unwrap();

        assert_eq!(username.as_deref(), Some("bunnydrop_bot"));
        get_me.assert_async().await;
    }

    #[tokio::test]
    async fn connect_surfaces_rejected_token() {
        let mut server = mockito::Server::new_async().await;
        let _get_me = server
            .mock("POST", "/bottest-token/GetMe")
            .with_status(401)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"ok": false, "error_code": 401, "description": "Unauthorized"}).to_string(),
            )
            .create_async()
            .await;

        let api_url = Url::parse(&format!("{}/", server.url())).unwrap();
        let err = connect_at(&Secret::new("test-token".into()), Some(api_url))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Telegram(_)), "{err}");
    }

    #[test]
    fn client_error_names_the_cause() {
        let err = Error::Client {
            message: "tls backend unavailable".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to build telegram http client: tls backend unavailable"
        );
    }
}
