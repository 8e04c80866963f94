use {
    async_trait::async_trait,
    bunnydrop_relay::{AttachmentLocator, MediaAttachment, TransferError},
    reqwest::Url,
    teloxide::prelude::*,
    tracing::debug,
};

/// Largest file the Bot API lets a bot download.
pub const BOT_API_DOWNLOAD_LIMIT: u64 = 20 * 1024 * 1024;

/// Resolves attachments to `{api_url}/file/bot<token>/<file_path>`.
///
/// The returned URL embeds the bot token; the relay never echoes source
/// URLs in failure details.
#[derive(Clone)]
pub struct TelegramFileLocator {
    bot: Bot,
}

impl TelegramFileLocator {
    #[must_use]
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl AttachmentLocator for TelegramFileLocator {
    async fn download_url(&self, attachment: &MediaAttachment) -> Result<Url, TransferError> {
        if let Some(size) = attachment.size
            && size > BOT_API_DOWNLOAD_LIMIT
        {
            return Err(TransferError::fetch(format!(
                "file is {size} bytes, bots can only download up to {BOT_API_DOWNLOAD_LIMIT}; \
                 send it as a link instead"
            )));
        }

        let file = self
            .bot
            .get_file(attachment.file_id.as_str())
            .await
            .map_err(|e| TransferError::fetch(format!("telegram getFile failed: {e}")))?;
        debug!(file_path = %file.path, "telegram file located");

        self.bot
            .api_url()
            .join(&format!("file/bot{}/{}", self.bot.token(), file.path))
            .map_err(|e| TransferError::fetch(format!("bad telegram file path: {e}")))
    }
}
