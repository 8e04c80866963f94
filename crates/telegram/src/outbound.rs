use std::{future::Future, time::Duration};

use {
    teloxide::{
        RequestError,
        payloads::SendMessageSetters,
        prelude::*,
        types::{ChatAction, MessageId, ParseMode, ReplyParameters},
    },
    tracing::warn,
};

use crate::error::Result;

const TELEGRAM_RETRY_AFTER_MAX_RETRIES: usize = 4;

/// Send `html` as a reply, falling back to plain text if Telegram rejects
/// the markup.
pub async fn send_html(
    bot: &Bot,
    chat_id: ChatId,
    reply_to: Option<MessageId>,
    html: &str,
) -> Result<MessageId> {
    let reply_params =
        reply_to.map(|id| ReplyParameters::new(id).allow_sending_without_reply());

    let sent = run_with_retry(chat_id, "send message (html)", || {
        let mut req = bot.send_message(chat_id, html).parse_mode(ParseMode::Html);
        if let Some(rp) = &reply_params {
            req = req.reply_parameters(rp.clone());
        }
        async move { req.await }
    })
    .await;

    match sent {
        Ok(message) => Ok(message.id),
        Err(e) => {
            warn!(
                chat_id = chat_id.0,
                error = %e,
                "telegram HTML send failed, retrying as plain text"
            );
            let plain = html_to_plain(html);
            let message = run_with_retry(chat_id, "send message (plain)", || {
                let mut req = bot.send_message(chat_id, plain.as_str());
                if let Some(rp) = &reply_params {
                    req = req.reply_parameters(rp.clone());
                }
                async move { req.await }
            })
            .await?;
            Ok(message.id)
        },
    }
}

/// Best effort; a failed chat action never fails the request.
pub async fn send_action(bot: &Bot, chat_id: ChatId, action: ChatAction) {
    if let Err(e) = bot.send_chat_action(chat_id, action).await {
        warn!(chat_id = chat_id.0, error = %e, "failed to send chat action");
    }
}

async fn run_with_retry<T, F, Fut>(
    chat_id: ChatId,
    operation: &'static str,
    mut request: F,
) -> std::result::Result<T, RequestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, RequestError>>,
{
    let mut retries = 0usize;

    loop {
        match request().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let Some(wait) = retry_after_duration(&err) else {
                    return Err(err);
                };

                if retries >= TELEGRAM_RETRY_AFTER_MAX_RETRIES {
                    warn!(
                        chat_id = chat_id.0,
                        operation,
                        retries,
                        retry_after_secs = wait.as_secs(),
                        "telegram rate limit persisted after retries"
                    );
                    return Err(err);
                }

                retries += 1;
                warn!(
                    chat_id = chat_id.0,
                    operation,
                    retries,
                    retry_after_secs = wait.as_secs(),
                    "telegram rate limited, waiting before retry"
                );
                tokio::time::sleep(wait).await;
            },
        }
    }
}

fn retry_after_duration(error: &RequestError) -> Option<Duration> {
    match error {
        RequestError::RetryAfter(wait) => Some(wait.duration()),
        _ => None,
    }
}

/// Drop tags and decode the entities our replies use.
fn html_to_plain(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {},
        }
    }
    out.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use {super::*, teloxide::ApiError};

    #[test]
    fn retry_after_duration_ignores_other_errors() {
        let err = RequestError::Api(ApiError::BotBlocked);
        assert_eq!(retry_after_duration(&err), None);
    }

    #[test]
    fn plain_fallback_strips_markup() {
        let html = "✅ <b>Uploaded</b>\n<a href=\"https://cdn.example.com/a.mp4\">Watch</a> &lt;ok&gt; &amp;";
        assert_eq!(html_to_plain(html), "✅ Uploaded\nWatch <ok> &");
    }
}
