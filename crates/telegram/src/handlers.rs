use std::{sync::Arc, time::Instant};

use {
    bunnydrop_relay::{InboundEvent, MediaAttachment},
    teloxide::{
        prelude::*,
        types::{ChatAction, MediaKind, MessageKind, UpdateKind},
        utils::command::BotCommands,
    },
    tracing::{debug, info, warn},
};

use crate::{
    error::Result,
    outbound, reply,
    state::{BotState, SharedState},
};

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    /// Show how to send videos.
    Start,
    /// Show the accepted formats.
    Help,
}

/// Handle `update` on its own task so a slow transfer never blocks other chats.
pub fn spawn_update(state: &SharedState, update: Update) {
    state.tasks.spawn(handle_update(update, Arc::clone(state)));
}

/// Route one update. Only messages are handled.
pub async fn handle_update(update: Update, state: SharedState) {
    match update.kind {
        UpdateKind::Message(msg) => {
            let chat_id = msg.chat.id.0;
            debug!(chat_id, "received telegram message");
            if let Err(e) = handle_message(msg, &state).await {
                warn!(chat_id, error = %e, "error handling telegram message");
            }
        },
        other => debug!("ignoring non-message update: {other:?}"),
    }
}

/// Answer one message: command, relay job, or a hint about what is accepted.
///
/// Relay failures become replies; only failing to talk to Telegram is an error.
pub async fn handle_message(msg: Message, state: &BotState) -> Result<()> {
    let chat_id = msg.chat.id;
    let rules = state.relay.resolver().rules();

    if let Some(text) = msg.text()
        && text.starts_with('/')
    {
        let username = state.bot_username.as_deref().unwrap_or_default();
        if let Ok(command) = Command::parse(text, username) {
            debug!(chat_id = chat_id.0, ?command, "bot command");
            outbound::send_html(&state.bot, chat_id, None, &reply::usage(rules)).await?;
            return Ok(());
        }
    }

    let Some(event) = extract_event(&msg) else {
        if matches!(msg.kind, MessageKind::Common(_)) {
            debug!(chat_id = chat_id.0, "unsupported message kind");
            outbound::send_html(&state.bot, chat_id, Some(msg.id), &reply::unsupported(rules))
                .await?;
        }
        return Ok(());
    };

    outbound::send_action(&state.bot, chat_id, ChatAction::UploadVideo).await;

    let started = Instant::now();
    let text = match state.relay.handle(&event, &state.locator).await {
        Ok(uploaded) => {
            info!(
                chat_id = chat_id.0,
                filename = %uploaded.filename,
                bytes = uploaded.bytes,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "upload finished"
            );
            reply::success(&uploaded)
        },
        Err(e) => {
            warn!(chat_id = chat_id.0, error = %e, "relay request failed");
            reply::failure(&e)
        },
    };

    outbound::send_html(&state.bot, chat_id, Some(msg.id), &text).await?;
    Ok(())
}

/// Reduce a message to what the relay understands: its text, or a video.
///
/// Documents count when their MIME type is `video/*`.
#[must_use]
pub fn extract_event(msg: &Message) -> Option<InboundEvent> {
    let MessageKind::Common(common) = &msg.kind else {
        return None;
    };

    match &common.media_kind {
        MediaKind::Text(t) => Some(InboundEvent::TextLink(t.text.clone())),
        MediaKind::Video(v) => Some(InboundEvent::MediaAttachment(MediaAttachment {
            file_id: v.video.file.id.to_string(),
            unique_id: v.video.file.unique_id.to_string(),
            suggested_name: v.video.file_name.clone(),
            caption: v.caption.clone(),
            size: Some(u64::from(v.video.file.size)),
        })),
        MediaKind::Document(d)
            if d
                .document
                .mime_type
                .as_ref()
                .is_some_and(|m| m.essence_str().starts_with("video/")) =>
        {
            Some(InboundEvent::MediaAttachment(MediaAttachment {
                file_id: d.document.file.id.to_string(),
                unique_id: d.document.file.unique_id.to_string(),
                suggested_name: d.document.file_name.clone(),
                caption: d.caption.clone(),
                size: Some(u64::from(d.document.file.size)),
            }))
        },
        _ => None,
    }
}
