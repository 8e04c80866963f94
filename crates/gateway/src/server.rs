use std::{sync::Arc, time::Duration};

use {
    anyhow::Context,
    axum::{
        Router,
        routing::{get, post},
    },
    bunnydrop_config::{BunnydropConfig, TransportMode, validate},
    bunnydrop_relay::{RelayService, Uploaded},
    bunnydrop_telegram::{BotState, SharedState},
    tokio_util::sync::CancellationToken,
    tower_http::trace::TraceLayer,
    tracing::{info, warn},
};

use crate::webhook::{WEBHOOK_PATH, WebhookState, webhook_handler};

/// How long in-flight transfers may run after a shutdown signal.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(30);

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct AppState {
    /// Present in webhook mode only.
    pub webhook: Option<WebhookState>,
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the HTTP router (shared between production startup and tests).
pub fn build_app(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(health_handler))
        .route("/health", get(health_handler));

    if state.webhook.is_some() {
        router = router.route(WEBHOOK_PATH, post(webhook_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Run the bot until ctrl-c / SIGTERM.
///
/// Configuration is validated before anything touches the network: an
/// invalid config fails here without binding the port.
pub async fn start_gateway(config: BunnydropConfig, bind: &str, port: u16) -> anyhow::Result<()> {
    let warnings = validate(&config, true).into_result()?;
    for diagnostic in &warnings {
        warn!(path = diagnostic.path, "{}", diagnostic.message);
    }

    let relay = RelayService::from_config(&config).context("failed to build relay")?;
    info!(
        storage_zone = %config.storage.zone,
        storage = %config.storage.base_url(),
        pull_zone = %config.pull_zone.base_url(),
        streamed = config.transfer.max_buffered_bytes == 0,
        "relay configured"
    );

    let token = config
        .telegram
        .token
        .as_ref()
        .context("telegram token is missing")?;
    let (bot, username) = bunnydrop_telegram::connect(token)
        .await
        .context("failed to connect to telegram")?;
    bunnydrop_telegram::register_commands(&bot).await;
    let bot_state: SharedState = Arc::new(BotState::new(bot, username, relay));

    let listener = tokio::net::TcpListener::bind((bind, port))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    info!(addr = %listener.local_addr()?, "listening");

    let (app_state, cancel) = match config.telegram.mode {
        TransportMode::Polling => {
            let cancel = bunnydrop_telegram::start_polling(Arc::clone(&bot_state)).await?;
            (AppState::default(), cancel)
        },
        TransportMode::Webhook => {
            let url = config
                .telegram
                .webhook_url
                .as_deref()
                .context("telegram webhook url is missing")?;
            bunnydrop_telegram::setup_webhook(
                &bot_state.bot,
                url,
                config.telegram.webhook_secret.as_ref(),
            )
            .await?;
            let webhook = WebhookState {
                bot: Arc::clone(&bot_state),
                secret: config.telegram.webhook_secret.clone(),
            };
            (
                AppState {
                    webhook: Some(webhook),
                },
                CancellationToken::new(),
            )
        },
    };

    axum::serve(listener, build_app(app_state))
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    cancel.cancel();
    if config.telegram.mode == TransportMode::Webhook
        && let Err(e) = bunnydrop_telegram::remove_webhook(&bot_state.bot).await
    {
        warn!(error = %e, "failed to remove telegram webhook");
    }

    bot_state.tasks.close();
    if tokio::time::timeout(SHUTDOWN_DRAIN, bot_state.tasks.wait())
        .await
        .is_err()
    {
        warn!(
            in_flight = bot_state.tasks.len(),
            "shutdown drain timed out, abandoning transfers"
        );
    }
    info!("bunnydrop stopped");
    Ok(())
}

/// Relay one text input from the terminal, without a bot.
pub async fn relay_once(config: &BunnydropConfig, input: &str) -> anyhow::Result<Uploaded> {
    let warnings = validate(config, false).into_result()?;
    for diagnostic in &warnings {
        warn!(path = diagnostic.path, "{}", diagnostic.message);
    }

    let relay = RelayService::from_config(config)?;
    let request = relay.resolver().resolve_text(input)?;
    Ok(relay.pipeline().transfer(&request).await?)
}

/// Resolves on SIGINT, SIGTERM, or when `cancel` fires (another instance took
/// over the bot token).
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = sigterm => info!("received SIGTERM, shutting down"),
        _ = cancel.cancelled() => info!("telegram transport stopped, shutting down"),
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler() -> &'static str {
    "alive"
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::webhook::SECRET_HEADER,
        axum::{
            body::{Body, to_bytes},
            http::{Request, StatusCode},
        },
        bunnydrop_relay::{
            DestinationConfig, InputResolver, RelayPipeline, TransferSettings,
        },
        secrecy::Secret,
        serde_json::json,
        tower::ServiceExt,
    };

    fn bot_state() -> SharedState {
        let destination = DestinationConfig::new(
            "https://storage.bunnycdn.com",
            "videos",
            Secret::new("storage-key".into()),
            "https://cdn.example.com",
        )
        .unwrap();
        let pipeline = RelayPipeline::new(destination, TransferSettings::default()).unwrap();
        let relay = RelayService::new(InputResolver::default(), pipeline);
        Arc::new(BotState::new(teloxide::Bot::new("test-token"), None, relay))
    }

    fn webhook_app(secret: Option<&str>) -> Router {
        build_app(AppState {
            webhook: Some(WebhookState {
                bot: bot_state(),
                secret: secret.map(|s| Secret::new(s.to_string())),
            }),
        })
    }

    fn edited_update() -> String {
        json!({
            "update_id": 7,
            "edited_message": {
                "message_id": 1,
                "date": 1,
                "edit_date": 2,
                "chat": { "id": 42, "type": "private", "first_name": "Alice" },
                "text": "edited"
            }
        })
        .to_string()
    }

    fn webhook_request(secret: Option<&str>, body: String) -> Request<Body> {
        let mut builder = Request::post(WEBHOOK_PATH).header("content-type", "application/json");
        if let Some(secret) = secret {
            builder = builder.header(SECRET_HEADER, secret);
        }
        builder.body(Body::from(body)).unwrap()
    }

    #[tokio::test]
    async fn health_routes_return_alive() {
        for path in ["/", "/health"] {
            let response = build_app(AppState::default())
                .oneshot(Request::get(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = to_bytes(response.into_body(), 1024).await.unwrap();
            assert_eq!(&body[..], b"alive");
        }
    }

    #[tokio::test]
    async fn webhook_route_absent_in_polling_mode() {
        let response = build_app(AppState::default())
            .oneshot(webhook_request(None, edited_update()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn webhook_rejects_wrong_or_missing_secret() {
        for given in [None, Some("wrong")] {
            let response = webhook_app(Some("s3cret"))
                .oneshot(webhook_request(given, edited_update()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn webhook_accepts_update_with_secret() {
        let response = webhook_app(Some("s3cret"))
            .oneshot(webhook_request(Some("s3cret"), edited_update()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn webhook_without_secret_accepts_any_caller() {
        let response = webhook_app(None)
            .oneshot(webhook_request(None, edited_update()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn webhook_rejects_garbage() {
        let response = webhook_app(None)
            .oneshot(webhook_request(None, "not json".into()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_config_fails_before_binding() {
        let port_finder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = port_finder.local_addr().unwrap().port();
        drop(port_finder);

        let err = start_gateway(BunnydropConfig::default(), "127.0.0.1", port)
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("storage.zone"), "{message}");
        assert!(message.contains("telegram.token"), "{message}");

        // Port is still free: nothing was bound.
        std::net::TcpListener::bind(("127.0.0.1", port)).unwrap();
    }

    #[tokio::test]
    async fn relay_once_uploads_text_input() {
        let mut server = mockito::Server::new_async().await;
        let _get = server
            .mock("GET", "/a.mp4")
            .with_status(200)
            .with_body("DATA")
            .create_async()
            .await;
        let put = server
            .mock("PUT", "/videos/clip.mp4")
            .with_status(201)
            .create_async()
            .await;

        let mut config = BunnydropConfig::default();
        config.storage.host = Some(server.url());
        config.storage.zone = "videos".into();
        config.storage.api_key = Some(Secret::new("storage-key".into()));
        config.pull_zone.host = "cdn.example.com".into();

        let done = relay_once(&config, &format!("clip.mp4 {}/a.mp4", server.url()))
            .await
            .unwrap();
        assert_eq!(done.public_url, "https://cdn.example.com/clip.mp4");
        put.assert_async().await;
    }
}
